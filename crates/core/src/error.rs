use liminaldb_lib::buffer::DecodeError;
use liminaldb_lib::schema::SchemaError;
use liminaldb_lib::value::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("table `{0}` already exists")]
    Exists(String),
    #[error("table `{0}` not found")]
    NotFound(String),
    #[error("column `{1}` not found in table `{0}`")]
    ColumnNotFound(String, String),
    #[error("column `{0}` already exists")]
    DuplicateColumn(String),
    #[error("cannot add non-nullable column `{0}` without a default to a non-empty table")]
    ColumnNeedsDefault(String),
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("index `{1}` not found on table `{0}`")]
    NotFound(String, String),
    #[error("index `{1}` already exists on table `{0}`")]
    Exists(String, String),
    #[error("primary-key index `{0}` may not be dropped")]
    PrimaryUndroppable(String),
}

#[derive(Error, Debug)]
pub enum ConstraintError {
    #[error("primary-key violation on table `{table}`: duplicate key {key}")]
    PrimaryKeyViolation { table: String, key: String },
    #[error("unique constraint `{index}` violation on table `{table}`: duplicate key {key}")]
    UniqueViolation {
        table: String,
        index: String,
        key: String,
    },
    #[error("foreign key `{fk}` violation: no row in `{ref_table}` matches {key}")]
    ForeignKeyInsert {
        fk: String,
        ref_table: String,
        key: String,
    },
    #[error("foreign key `{fk}` on table `{referencing}` still references rows being deleted from `{table}`")]
    ForeignKeyDelete {
        fk: String,
        referencing: String,
        table: String,
    },
    #[error("constraint `{1}` not found on table `{0}`")]
    NotFound(String, String),
}

#[derive(Error, Debug)]
pub enum DataError {
    #[error("type mismatch for column `{column}`: expected {expected}, got {value}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        value: Value,
    },
    #[error("value for column `{column}` exceeds declared length {max}")]
    StringOverflow { column: String, max: u16 },
    #[error("column `{column}` is not nullable")]
    NotNullable { column: String },
    #[error("unknown column `{column}`")]
    UnknownColumn { column: String },
    #[error("row has {given} values but {expected} columns were named")]
    ArityMismatch { expected: usize, given: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    #[error("transaction {0} aborted: deadlock detected")]
    Deadlock(u64),
    #[error("lock wait cancelled for transaction {0}")]
    Cancelled(u64),
}

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("unsupported feature: {feature}")]
    Unsupported { feature: String },
    #[error("SQL parse error: {0}")]
    Parse(#[from] sqlparser::parser::ParserError),
}

#[derive(Error, Debug)]
pub enum DBError {
    #[error("SchemaError: {0}")]
    Schema(#[from] SchemaError),
    #[error("TableError: {0}")]
    Table(#[from] TableError),
    #[error("IndexError: {0}")]
    Index(#[from] IndexError),
    #[error("ConstraintError: {0}")]
    Constraint(#[from] ConstraintError),
    #[error("DataError: {0}")]
    Data(#[from] DataError),
    #[error("ConcurrencyError: {0}")]
    Concurrency(#[from] ConcurrencyError),
    #[error("corrupt file `{}`: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        source: DecodeError,
    },
    #[error("DecodeError: {0}")]
    Decode(#[from] DecodeError),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("PlanError: {0}")]
    Plan(#[from] PlanError),
    #[error("transaction reply channel closed")]
    ReplyChannelClosed,
}

impl DBError {
    /// Attaches the offending path to a decode failure.
    pub fn corrupt(path: impl Into<PathBuf>) -> impl FnOnce(DecodeError) -> DBError {
        move |source| DBError::Corrupt {
            path: path.into(),
            source,
        }
    }
}
