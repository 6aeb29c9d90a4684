//! LiminalDB storage engine.
//!
//! A single-node relational engine: tables and B-tree indexes in a
//! custom binary format, schema and referential constraints,
//! multi-statement transactions backed by shadow files, and a
//! shared/exclusive lock manager.

pub mod db;
pub mod error;
pub mod format;
pub mod sql;

pub use db::engine::{Engine, TxFinish};
pub use db::paths::DbPath;
pub use error::DBError;
