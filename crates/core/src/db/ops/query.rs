//! Row reads: projection, filtering, and single-column-equality index
//! selection.

use super::{OpResult, TxContext};
use crate::db::filter::Expr;
use crate::db::ops::mutation::coerce;
use crate::error::{DBError, DataError};
use liminaldb_index::{IndexFile, IndexKey};
use liminaldb_lib::schema::{IndexSchema, TableSchema};
use liminaldb_lib::value::Value;

pub fn read_rows(
    ctx: &mut TxContext<'_>,
    table: &str,
    projection: Option<&[String]>,
    filter: Option<&Expr>,
) -> Result<OpResult, DBError> {
    let file = ctx.read_table(table)?;
    let schema = &file.schema;

    if let Some(cols) = projection {
        for col in cols {
            if schema.column(col).is_none() {
                return Err(DataError::UnknownColumn { column: col.clone() }.into());
            }
        }
    }

    // An unfiltered, unprojected read is a whole-table snapshot.
    let Some(filter) = filter else {
        if projection.is_none() {
            return Ok(OpResult::Snapshot(file));
        }
        let rows = file.rows.iter().map(|row| project_row(schema, row, projection)).collect();
        return Ok(OpResult::Query {
            columns: projected_names(schema, projection),
            rows,
        });
    };

    // Candidate rows come from an index when a top-level equality
    // matches a single-column index; the full predicate is re-checked
    // against every candidate either way.
    let mut rows = Vec::new();
    match select_index(ctx, schema, filter)? {
        Some(row_ids) => {
            for row_id in row_ids {
                let Some(row) = file.rows.get(row_id as usize) else {
                    continue;
                };
                if filter.matches(schema, row)? {
                    rows.push(project_row(schema, row, projection));
                }
            }
        }
        None => {
            for row in &file.rows {
                if filter.matches(schema, row)? {
                    rows.push(project_row(schema, row, projection));
                }
            }
        }
    }

    Ok(OpResult::Query {
        columns: projected_names(schema, projection),
        rows,
    })
}

fn projected_names(schema: &TableSchema, projection: Option<&[String]>) -> Vec<String> {
    match projection {
        Some(cols) => cols.to_vec(),
        None => schema.columns.iter().map(|c| c.name.clone()).collect(),
    }
}

fn project_row(schema: &TableSchema, row: &[Value], projection: Option<&[String]>) -> Vec<Value> {
    match projection {
        Some(cols) => cols
            .iter()
            .map(|col| {
                let (pos, _) = schema.column(col).expect("projection validated");
                row[pos].clone()
            })
            .collect(),
        None => row.to_vec(),
    }
}

/// Picks the best single-column index hit by a top-level `col = literal`
/// equality (primary > unique > any) and returns the matching row ids in
/// row order. `None` means full scan.
fn select_index(
    ctx: &mut TxContext<'_>,
    schema: &TableSchema,
    filter: &Expr,
) -> Result<Option<Vec<i64>>, DBError> {
    let mut best: Option<(&IndexSchema, Value)> = None;
    for (col, literal) in filter.equality_candidates() {
        let Some((_, def)) = schema.column(col) else {
            continue;
        };
        let Ok(value) = coerce(literal, def) else {
            // A literal the column cannot hold matches nothing; let the
            // scan path evaluate it to false.
            continue;
        };
        for index in &schema.indexes {
            if index.cols.len() != 1 || index.cols[0] != col {
                continue;
            }
            let better = match &best {
                None => true,
                Some((current, _)) => rank(index) > rank(current),
            };
            if better {
                best = Some((index, value.clone()));
            }
        }
    }

    let Some((meta, value)) = best else {
        return Ok(None);
    };
    let Some(key) = IndexKey::from_value(&value) else {
        return Ok(None);
    };
    let name = meta.name.clone();
    let index: IndexFile = ctx.read_index(&schema.table_name, &name)?;
    let mut row_ids = index.tree.search(&key).to_vec();
    row_ids.sort_unstable();
    log::debug!(
        "index `{name}` served equality on `{}` with {} candidate(s)",
        schema.table_name,
        row_ids.len()
    );
    Ok(Some(row_ids))
}

fn rank(index: &IndexSchema) -> u8 {
    match (index.primary, index.unique) {
        (true, _) => 2,
        (false, true) => 1,
        (false, false) => 0,
    }
}
