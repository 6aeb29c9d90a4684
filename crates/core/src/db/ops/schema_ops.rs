//! Schema-level operations: table and index lifecycle, column addition,
//! constraint removal, metadata reads.

use super::{NewColumn, OpResult, TxContext};
use crate::db::ops::mutation::coerce;
use crate::error::{ConstraintError, DBError, IndexError, TableError};
use liminaldb_index::{BTree, IndexFile, DEFAULT_DEGREE};
use liminaldb_lib::schema::{IndexSchema, SchemaError, TableSchema};
use liminaldb_lib::value::{DataKind, Value};

pub fn create_table(ctx: &mut TxContext<'_>, schema: &TableSchema) -> Result<OpResult, DBError> {
    schema.validate()?;
    let name = schema.table_name.clone();
    ctx.lock_write(&name)?;
    if ctx.table_exists(&name) {
        return Err(TableError::Exists(name).into());
    }
    // Referenced tables must exist before a foreign key can point at them.
    for fk in &schema.foreign_keys {
        let referenced = ctx.read_table(&fk.ref_table)?;
        for (_, ref_col) in &fk.pairs {
            if referenced.schema.column(ref_col).is_none() {
                return Err(TableError::ColumnNotFound(fk.ref_table.clone(), ref_col.clone()).into());
            }
        }
    }

    let table = crate::db::table::TableFile::new(schema.clone());
    ctx.write_table(&table)?;
    for index in &schema.indexes {
        let file = IndexFile::new(index.name.clone(), name.clone(), index.cols.clone(), index.unique);
        ctx.write_index(&file)?;
    }
    log::info!("created table `{name}`");
    Ok(OpResult::Message(format!("Table `{name}` created")))
}

pub fn drop_table(ctx: &mut TxContext<'_>, table: &str) -> Result<OpResult, DBError> {
    ctx.lock_write(table)?;
    if !ctx.table_exists(table) {
        return Err(TableError::NotFound(table.to_owned()).into());
    }
    ctx.shadow.drop_table(table, &ctx.db.table_dir(table))?;
    log::info!("dropped table `{table}`");
    Ok(OpResult::Message(format!("Table `{table}` dropped")))
}

pub fn add_columns(ctx: &mut TxContext<'_>, table: &str, columns: &[NewColumn]) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    for added in columns {
        let def = &added.def;
        if def.name.is_empty() {
            return Err(SchemaError::EmptyColumnName { table: table.to_owned() }.into());
        }
        if file.schema.column(&def.name).is_some() {
            return Err(TableError::DuplicateColumn(def.name.clone()).into());
        }
        if def.kind == DataKind::Str && def.len == 0 {
            return Err(SchemaError::ZeroLengthString { column: def.name.clone() }.into());
        }
        let fill = if file.rows.is_empty() {
            None
        } else if let Some(default) = &added.default {
            Some(coerce(default.clone(), def)?)
        } else if def.nullable {
            Some(Value::Null)
        } else {
            return Err(TableError::ColumnNeedsDefault(def.name.clone()).into());
        };
        file.schema.columns.push(def.clone());
        if let Some(fill) = fill {
            for row in &mut file.rows {
                row.push(fill.clone());
            }
        }
    }
    ctx.write_table(&file)?;
    Ok(OpResult::Message(format!("{} column(s) added to `{table}`", columns.len())))
}

pub fn drop_constraint(ctx: &mut TxContext<'_>, table: &str, name: &str) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    let before = file.schema.foreign_keys.len();
    file.schema.foreign_keys.retain(|fk| fk.name != name);
    if file.schema.foreign_keys.len() == before {
        return Err(ConstraintError::NotFound(table.to_owned(), name.to_owned()).into());
    }
    ctx.write_table(&file)?;
    Ok(OpResult::Message(format!("Constraint `{name}` dropped from `{table}`")))
}

pub fn read_metadata(ctx: &mut TxContext<'_>, table: &str) -> Result<OpResult, DBError> {
    let file = ctx.read_table(table)?;
    Ok(OpResult::Metadata(file.schema))
}

pub fn list_indexes(ctx: &mut TxContext<'_>, table: &str) -> Result<OpResult, DBError> {
    let file = ctx.read_table(table)?;
    Ok(OpResult::Indexes(file.schema.indexes))
}

pub fn create_index(
    ctx: &mut TxContext<'_>,
    table: &str,
    name: &str,
    columns: &[String],
    unique: bool,
) -> Result<OpResult, DBError> {
    let mut file = ctx.read_table_mut(table)?;
    if file.schema.index(name).is_some() {
        return Err(IndexError::Exists(table.to_owned(), name.to_owned()).into());
    }
    for col in columns {
        if file.schema.column(col).is_none() {
            return Err(TableError::ColumnNotFound(table.to_owned(), col.clone()).into());
        }
    }

    let mut index = IndexFile::new(name.to_owned(), table.to_owned(), columns.to_vec(), unique);
    index.tree = build_tree(&file, &index, false)?;

    file.schema.indexes.push(IndexSchema {
        name: name.to_owned(),
        cols: columns.to_vec(),
        unique,
        primary: false,
    });
    ctx.write_table(&file)?;
    ctx.write_index(&index)?;
    log::info!("created index `{name}` on `{table}`");
    Ok(OpResult::Message(format!("Index `{name}` created on `{table}`")))
}

pub fn drop_index(ctx: &mut TxContext<'_>, table: Option<&str>, name: &str) -> Result<OpResult, DBError> {
    let table = match table {
        Some(table) => table.to_owned(),
        None => resolve_index_table(ctx, name)?,
    };
    let mut file = ctx.read_table_mut(&table)?;
    let Some(index) = file.schema.index(name) else {
        return Err(IndexError::NotFound(table, name.to_owned()).into());
    };
    if index.primary {
        return Err(IndexError::PrimaryUndroppable(name.to_owned()).into());
    }
    file.schema.indexes.retain(|i| i.name != name);
    ctx.write_table(&file)?;
    ctx.remove_index_file(&table, name)?;
    log::info!("dropped index `{name}` on `{table}`");
    Ok(OpResult::Message(format!("Index `{name}` dropped from `{table}`")))
}

/// Finds which table carries an index, for `DROP INDEX` statements that
/// name no table.
fn resolve_index_table(ctx: &mut TxContext<'_>, name: &str) -> Result<String, DBError> {
    for table in ctx.list_tables()? {
        let file = ctx.read_table(&table)?;
        if file.schema.index(name).is_some() {
            return Ok(table);
        }
    }
    Err(IndexError::NotFound(String::new(), name.to_owned()).into())
}

/// Builds an index tree over the current row sequence, enforcing
/// uniqueness as keys are added.
pub(super) fn build_tree(
    file: &crate::db::table::TableFile,
    index: &IndexFile,
    primary: bool,
) -> Result<BTree, DBError> {
    let mut tree = BTree::new(DEFAULT_DEGREE);
    let positions: Vec<usize> = index
        .cols
        .iter()
        .filter_map(|col| file.schema.column(col).map(|(pos, _)| pos))
        .collect();
    for (row_id, row) in file.rows.iter().enumerate() {
        let values: Vec<&Value> = positions.iter().map(|&pos| &row[pos]).collect();
        let Some(key) = IndexFile::key_from_values(&values) else {
            continue;
        };
        if index.unique && tree.contains(&key) {
            return Err(unique_violation(&file.schema.table_name, &index.name, primary, &key.to_string()));
        }
        tree.insert(key, row_id as i64);
    }
    Ok(tree)
}

pub(super) fn unique_violation(table: &str, index: &str, primary: bool, key: &str) -> DBError {
    if primary {
        ConstraintError::PrimaryKeyViolation {
            table: table.to_owned(),
            key: key.to_owned(),
        }
        .into()
    } else {
        ConstraintError::UniqueViolation {
            table: table.to_owned(),
            index: index.to_owned(),
            key: key.to_owned(),
        }
        .into()
    }
}
