//! Typed operation records and their execution against the storage
//! layer.
//!
//! The engine dispatches on the operation tag; every operation runs
//! inside a transaction context that routes file I/O through the shadow
//! manager and lock acquisition through the lock manager.

mod mutation;
mod query;
mod schema_ops;

use crate::db::filter::Expr;
use crate::db::locks::{LockManager, LockMode, TxId};
use crate::db::paths::DbPath;
use crate::db::shadow::ShadowTx;
use crate::db::table::TableFile;
use crate::error::{DBError, IndexError, TableError};
use liminaldb_index::IndexFile;
use liminaldb_lib::schema::{ColumnDef, IndexSchema, TableSchema};
use liminaldb_lib::value::Value;

/// A column added by `AddColumns`, with an optional back-fill default.
#[derive(Clone, Debug)]
pub struct NewColumn {
    pub def: ColumnDef,
    pub default: Option<Value>,
}

/// One operation of a transaction batch.
#[derive(Clone, Debug)]
pub enum Operation {
    CreateTable {
        schema: TableSchema,
    },
    DropTable {
        table: String,
    },
    AddColumns {
        table: String,
        columns: Vec<NewColumn>,
    },
    DropConstraint {
        table: String,
        name: String,
    },
    ReadMetadata {
        table: String,
    },
    ListIndexes {
        table: String,
    },
    WriteRows {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    UpdateRows {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
    DeleteRows {
        table: String,
        filter: Option<Expr>,
    },
    ReadRows {
        table: String,
        projection: Option<Vec<String>>,
        filter: Option<Expr>,
    },
    CreateIndex {
        table: String,
        name: String,
        columns: Vec<String>,
        unique: bool,
    },
    DropIndex {
        /// Resolved by metadata scan when the statement names no table.
        table: Option<String>,
        name: String,
    },
}

/// The per-operation result of a batch reply.
#[derive(Clone, Debug)]
pub enum OpResult {
    Query {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    /// A full table snapshot, for unfiltered `SELECT *`.
    Snapshot(TableFile),
    Metadata(TableSchema),
    Indexes(Vec<IndexSchema>),
    RowsAffected(u64),
    Message(String),
}

/// Executes one operation inside its transaction.
pub fn execute(ctx: &mut TxContext<'_>, op: &Operation) -> Result<OpResult, DBError> {
    match op {
        Operation::CreateTable { schema } => schema_ops::create_table(ctx, schema),
        Operation::DropTable { table } => schema_ops::drop_table(ctx, table),
        Operation::AddColumns { table, columns } => schema_ops::add_columns(ctx, table, columns),
        Operation::DropConstraint { table, name } => schema_ops::drop_constraint(ctx, table, name),
        Operation::ReadMetadata { table } => schema_ops::read_metadata(ctx, table),
        Operation::ListIndexes { table } => schema_ops::list_indexes(ctx, table),
        Operation::WriteRows { table, columns, rows } => mutation::insert(ctx, table, columns, rows),
        Operation::UpdateRows {
            table,
            assignments,
            filter,
        } => mutation::update(ctx, table, assignments, filter.as_ref()),
        Operation::DeleteRows { table, filter } => mutation::delete(ctx, table, filter.as_ref()),
        Operation::ReadRows {
            table,
            projection,
            filter,
        } => query::read_rows(ctx, table, projection.as_deref(), filter.as_ref()),
        Operation::CreateIndex {
            table,
            name,
            columns,
            unique,
        } => schema_ops::create_index(ctx, table, name, columns, *unique),
        Operation::DropIndex { table, name } => schema_ops::drop_index(ctx, table.as_deref(), name),
    }
}

/// Transaction-scoped view of the database: lock state plus the shadow
/// path resolver. All operation I/O goes through this.
pub struct TxContext<'a> {
    pub txid: TxId,
    pub db: &'a DbPath,
    pub locks: &'a LockManager,
    pub shadow: ShadowTx,
}

impl<'a> TxContext<'a> {
    pub fn new(txid: TxId, db: &'a DbPath, locks: &'a LockManager) -> Self {
        TxContext {
            txid,
            db,
            locks,
            shadow: ShadowTx::new(db, txid),
        }
    }

    /// Takes the shared lock for a read-only touch of `table`.
    pub fn lock_read(&mut self, table: &str) -> Result<(), DBError> {
        self.locks.acquire(self.txid, table, LockMode::Shared)?;
        Ok(())
    }

    /// Takes the exclusive lock (escalating a shared hold) and
    /// materializes shadow copies of the table's files.
    pub fn lock_write(&mut self, table: &str) -> Result<(), DBError> {
        self.locks.acquire(self.txid, table, LockMode::Exclusive)?;
        self.shadow.materialize_table(self.db, table)?;
        Ok(())
    }

    /// Whether the table is visible to this transaction.
    pub fn table_exists(&self, table: &str) -> bool {
        if self.shadow.is_dropped(table) {
            return false;
        }
        let canonical = self.db.table_file(table);
        self.shadow.resolve(&canonical).exists()
    }

    /// Reads a table under a shared lock.
    pub fn read_table(&mut self, table: &str) -> Result<TableFile, DBError> {
        self.lock_read(table)?;
        self.read_table_unlocked(table)
    }

    /// Reads a table under the exclusive lock, ready for mutation.
    pub fn read_table_mut(&mut self, table: &str) -> Result<TableFile, DBError> {
        self.lock_write(table)?;
        self.read_table_unlocked(table)
    }

    fn read_table_unlocked(&self, table: &str) -> Result<TableFile, DBError> {
        if !self.table_exists(table) {
            return Err(TableError::NotFound(table.to_owned()).into());
        }
        let canonical = self.db.table_file(table);
        TableFile::read_from(self.shadow.resolve(&canonical))
    }

    /// Writes a table into the transaction's shadow directory. The
    /// caller must already hold the exclusive lock via
    /// [`Self::read_table_mut`] or [`Self::lock_write`].
    pub fn write_table(&mut self, table: &TableFile) -> Result<(), DBError> {
        let name = &table.schema.table_name;
        let canonical = self.db.table_file(name);
        let shadow = self.shadow.write_path(name, &canonical)?;
        table.write_to(&shadow)
    }

    pub fn read_index(&mut self, table: &str, index: &str) -> Result<IndexFile, DBError> {
        let canonical = self.db.index_file(table, index);
        let path = self.shadow.resolve(&canonical);
        if !path.exists() {
            return Err(IndexError::NotFound(table.to_owned(), index.to_owned()).into());
        }
        let bytes = std::fs::read(path)?;
        IndexFile::decode(&bytes).map_err(DBError::corrupt(path.to_owned()))
    }

    pub fn write_index(&mut self, index: &IndexFile) -> Result<(), DBError> {
        let canonical = self.db.index_file(&index.table, &index.name);
        let shadow = self.shadow.write_path(&index.table, &canonical)?;
        std::fs::write(shadow, index.encode())?;
        Ok(())
    }

    pub fn remove_index_file(&mut self, table: &str, index: &str) -> Result<(), DBError> {
        let canonical = self.db.index_file(table, index);
        self.shadow.remove_file(&canonical)
    }

    /// Tables visible to this transaction: the canonical directory scan
    /// plus tables created in this transaction, minus dropped ones.
    pub fn list_tables(&self) -> Result<Vec<String>, DBError> {
        let mut tables = crate::db::table::list_tables(self.db)?;
        tables.extend(self.shadow.created_tables());
        tables.sort_unstable();
        tables.dedup();
        tables.retain(|t| !self.shadow.is_dropped(t));
        Ok(tables)
    }
}
