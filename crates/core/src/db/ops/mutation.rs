//! Row mutations: insert, update, delete, and the index maintenance
//! each one owes.

use super::{OpResult, TxContext};
use crate::db::filter::Expr;
use crate::db::ops::schema_ops::{build_tree, unique_violation};
use crate::db::table::TableFile;
use crate::error::{ConstraintError, DBError, DataError};
use itertools::Itertools;
use liminaldb_index::IndexFile;
use liminaldb_lib::schema::{ColumnDef, TableSchema};
use liminaldb_lib::value::{DataKind, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Checks a literal against a column, widening integers into float
/// columns and parsing datetime strings. Returns the stored value.
pub fn coerce(value: Value, col: &ColumnDef) -> Result<Value, DBError> {
    if value.is_null() {
        if col.nullable {
            return Ok(Value::Null);
        }
        return Err(DataError::NotNullable {
            column: col.name.clone(),
        }
        .into());
    }
    let mismatch = |value: Value| -> DBError {
        DataError::TypeMismatch {
            column: col.name.clone(),
            expected: col.kind.name(),
            value,
        }
        .into()
    };
    match (col.kind, value) {
        (DataKind::Int64, Value::Int64(v)) => Ok(Value::Int64(v)),
        (DataKind::Float64, Value::Float64(v)) => Ok(Value::Float64(v)),
        (DataKind::Float64, Value::Int64(v)) => Ok(Value::Float64(v as f64)),
        (DataKind::Str, Value::Str(s)) => {
            if s.len() > col.len as usize {
                return Err(DataError::StringOverflow {
                    column: col.name.clone(),
                    max: col.len,
                }
                .into());
            }
            Ok(Value::Str(s))
        }
        (DataKind::Bool, Value::Bool(v)) => Ok(Value::Bool(v)),
        (DataKind::DateTime, Value::DateTime(v)) => Ok(Value::DateTime(v)),
        (DataKind::DateTime, Value::Str(s)) => match Value::parse_datetime(&s) {
            Some(secs) => Ok(Value::DateTime(secs)),
            None => Err(mismatch(Value::Str(s))),
        },
        (_, value) => Err(mismatch(value)),
    }
}

fn tuples_equal(a: &[&Value], b: &[&Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.compare(y) == Some(Ordering::Equal))
}

fn project<'r>(schema: &TableSchema, row: &'r [Value], cols: &[String]) -> Vec<&'r Value> {
    cols.iter()
        .filter_map(|col| schema.column(col).map(|(pos, _)| &row[pos]))
        .collect()
}

pub fn insert(
    ctx: &mut TxContext<'_>,
    table: &str,
    columns: &[String],
    rows: &[Vec<Value>],
) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    let schema = file.schema.clone();

    // Positions of the named insert columns within the row tuple.
    let positions: Vec<usize> = if columns.is_empty() {
        (0..schema.columns.len()).collect()
    } else {
        columns
            .iter()
            .map(|name| {
                schema
                    .column(name)
                    .map(|(pos, _)| pos)
                    .ok_or_else(|| DataError::UnknownColumn { column: name.clone() })
            })
            .collect::<Result<_, _>>()?
    };

    let mut new_rows = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != positions.len() {
            return Err(DataError::ArityMismatch {
                expected: positions.len(),
                given: row.len(),
            }
            .into());
        }
        let mut full = vec![Value::Null; schema.columns.len()];
        for (&pos, value) in positions.iter().zip(row) {
            full[pos] = value.clone();
        }
        for (value, col) in full.iter_mut().zip(&schema.columns) {
            let checked = coerce(std::mem::replace(value, Value::Null), col)?;
            *value = checked;
        }
        new_rows.push(full);
    }

    check_primary_key(&schema, &file.rows, &new_rows)?;
    check_foreign_keys(ctx, &schema, &new_rows)?;

    let first_new_id = file.rows.len() as i64;
    file.rows.extend(new_rows.iter().cloned());
    ctx.write_table(&file)?;

    for meta in &schema.indexes {
        let mut index = ctx.read_index(table, &meta.name)?;
        for (offset, row) in new_rows.iter().enumerate() {
            let values = project(&schema, row, &meta.cols);
            let Some(key) = IndexFile::key_from_values(&values) else {
                continue;
            };
            if index.unique && index.tree.contains(&key) {
                return Err(unique_violation(table, &meta.name, meta.primary, &key.to_string()));
            }
            index.tree.insert(key, first_new_id + offset as i64);
        }
        ctx.write_index(&index)?;
    }

    log::debug!("tx {} inserted {} row(s) into `{table}`", ctx.txid, new_rows.len());
    Ok(OpResult::RowsAffected(new_rows.len() as u64))
}

/// Primary-key uniqueness by row scan, against both the stored rows and
/// the rest of the incoming batch.
fn check_primary_key(
    schema: &TableSchema,
    existing: &[Vec<Value>],
    incoming: &[Vec<Value>],
) -> Result<(), DBError> {
    let pk_cols: Vec<String> = schema
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.clone())
        .collect();
    if pk_cols.is_empty() {
        return Ok(());
    }
    for (i, row) in incoming.iter().enumerate() {
        let key = project(schema, row, &pk_cols);
        let clash = existing
            .iter()
            .chain(incoming.iter().take(i))
            .any(|other| tuples_equal(&key, &project(schema, other, &pk_cols)));
        if clash {
            let rendered = key.iter().join("|");
            return Err(ConstraintError::PrimaryKeyViolation {
                table: schema.table_name.clone(),
                key: rendered,
            }
            .into());
        }
    }
    Ok(())
}

/// Every foreign key of every new row must match a row in the
/// referenced table; the referenced table is read under a shared lock
/// and scanned. Rows with a null in any local column are exempt.
fn check_foreign_keys(
    ctx: &mut TxContext<'_>,
    schema: &TableSchema,
    incoming: &[Vec<Value>],
) -> Result<(), DBError> {
    for fk in &schema.foreign_keys {
        let referenced = ctx.read_table(&fk.ref_table)?;
        let local_cols: Vec<String> = fk.pairs.iter().map(|(l, _)| l.clone()).collect();
        let ref_cols: Vec<String> = fk.pairs.iter().map(|(_, r)| r.clone()).collect();
        for row in incoming {
            let local = project(schema, row, &local_cols);
            if local.iter().any(|v| v.is_null()) {
                continue;
            }
            let matched = referenced
                .rows
                .iter()
                .any(|candidate| tuples_equal(&local, &project(&referenced.schema, candidate, &ref_cols)));
            if !matched {
                let rendered = local.iter().join("|");
                return Err(ConstraintError::ForeignKeyInsert {
                    fk: fk.name.clone(),
                    ref_table: fk.ref_table.clone(),
                    key: rendered,
                }
                .into());
            }
        }
    }
    Ok(())
}

pub fn update(
    ctx: &mut TxContext<'_>,
    table: &str,
    assignments: &[(String, Expr)],
    filter: Option<&Expr>,
) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    let schema = file.schema.clone();

    for (name, _) in assignments {
        if schema.column(name).is_none() {
            return Err(DataError::UnknownColumn { column: name.clone() }.into());
        }
    }

    let mut affected = 0u64;
    for row in &mut file.rows {
        let selected = match filter {
            Some(expr) => expr.matches(&schema, row)?,
            None => true,
        };
        if !selected {
            continue;
        }
        // Assignments see the pre-update row.
        let old = row.clone();
        for (name, expr) in assignments {
            let (pos, col) = schema.column(name).expect("validated above");
            let value = expr.eval(&schema, &old)?;
            row[pos] = coerce(value, col)?;
        }
        affected += 1;
    }

    if affected > 0 {
        ctx.write_table(&file)?;
        // Rebuild every index that covers an assigned column, so unique
        // constraints stay sound and no stale keys remain.
        let changed: HashSet<&str> = assignments.iter().map(|(name, _)| name.as_str()).collect();
        for meta in &schema.indexes {
            if !meta.cols.iter().any(|c| changed.contains(c.as_str())) {
                continue;
            }
            let mut index = ctx.read_index(table, &meta.name)?;
            index.tree = build_tree(&file, &index, meta.primary)?;
            ctx.write_index(&index)?;
        }
    }

    log::debug!("tx {} updated {affected} row(s) in `{table}`", ctx.txid);
    Ok(OpResult::RowsAffected(affected))
}

pub fn delete(ctx: &mut TxContext<'_>, table: &str, filter: Option<&Expr>) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    let schema = file.schema.clone();

    let mut doomed = vec![false; file.rows.len()];
    for (row_id, row) in file.rows.iter().enumerate() {
        doomed[row_id] = match filter {
            Some(expr) => expr.matches(&schema, row)?,
            None => true,
        };
    }
    let removed = doomed.iter().filter(|&&d| d).count() as u64;
    if removed == 0 {
        return Ok(OpResult::RowsAffected(0));
    }

    check_delete_references(ctx, &file, &doomed)?;

    // Surviving rows keep their order; row ids are renumbered by
    // position, so every index is rebuilt from scratch.
    let mut keep = doomed.iter().map(|&d| !d);
    file.rows.retain(|_| keep.next().unwrap());
    ctx.write_table(&file)?;
    for meta in &schema.indexes {
        let mut index = ctx.read_index(table, &meta.name)?;
        index.tree = build_tree(&file, &index, meta.primary)?;
        ctx.write_index(&index)?;
    }

    log::debug!("tx {} deleted {removed} row(s) from `{table}`", ctx.txid);
    Ok(OpResult::RowsAffected(removed))
}

/// Rejects the delete if any other table's foreign key still references
/// a doomed row.
fn check_delete_references(ctx: &mut TxContext<'_>, file: &TableFile, doomed: &[bool]) -> Result<(), DBError> {
    let table = &file.schema.table_name;
    for other in ctx.list_tables()? {
        if &other == table {
            continue;
        }
        let referencing = ctx.read_table(&other)?;
        for fk in &referencing.schema.foreign_keys {
            if &fk.ref_table != table {
                continue;
            }
            let local_cols: Vec<String> = fk.pairs.iter().map(|(l, _)| l.clone()).collect();
            let ref_cols: Vec<String> = fk.pairs.iter().map(|(_, r)| r.clone()).collect();
            for row in &referencing.rows {
                let local = project(&referencing.schema, row, &local_cols);
                if local.iter().any(|v| v.is_null()) {
                    continue;
                }
                let still_referenced = file
                    .rows
                    .iter()
                    .zip(doomed)
                    .filter(|(_, &d)| d)
                    .any(|(victim, _)| tuples_equal(&local, &project(&file.schema, victim, &ref_cols)));
                if still_referenced {
                    return Err(ConstraintError::ForeignKeyDelete {
                        fk: fk.name.clone(),
                        referencing: other.clone(),
                        table: table.clone(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}
