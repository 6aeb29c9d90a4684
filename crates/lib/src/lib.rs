pub mod buffer;
pub mod schema;
pub mod value;

pub use buffer::{BufReader, BufWriter, DecodeError};
pub use schema::{ColumnDef, ForeignKeyDef, IndexSchema, SchemaError, TableSchema};
pub use value::{DataKind, Value};
