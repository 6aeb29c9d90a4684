//! On-disk B-tree indexes.
//!
//! An index file carries a small header naming the index, its table and
//! columns, followed by the serialized tree. Keys map to lists of row
//! ids; a unique index holds exactly one row id per key, enforced by
//! the caller before insertion.

pub mod btree;
pub mod key;

pub use btree::{BTree, DEFAULT_DEGREE};
pub use key::IndexKey;

use liminaldb_lib::buffer::{BufReader, BufWriter, DecodeError};
use liminaldb_lib::value::Value;

/// A fully materialized index file.
#[derive(Clone, Debug)]
pub struct IndexFile {
    pub name: String,
    pub table: String,
    pub cols: Vec<String>,
    pub unique: bool,
    pub tree: BTree,
}

impl IndexFile {
    pub fn new(name: impl Into<String>, table: impl Into<String>, cols: Vec<String>, unique: bool) -> Self {
        IndexFile {
            name: name.into(),
            table: table.into(),
            cols,
            unique,
            tree: BTree::new(DEFAULT_DEGREE),
        }
    }

    /// Derives the tree key for one row's projected column values.
    ///
    /// A single column indexes its raw value; multiple columns index the
    /// pipe-joined textual representation. Rows with a null in any keyed
    /// column are not indexed (a scan re-checks the full predicate, and
    /// equality against null never matches).
    pub fn key_from_values(values: &[&Value]) -> Option<IndexKey> {
        if values.iter().any(|v| v.is_null()) {
            return None;
        }
        match values {
            [single] => IndexKey::from_value(single),
            many => {
                let joined = many
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join("|");
                Some(IndexKey::Str(joined))
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.put_str(&self.name);
        buf.put_str(&self.table);
        buf.put_u16(self.cols.len() as u16);
        for col in &self.cols {
            buf.put_str(col);
        }
        buf.put_u8(self.unique as u8);
        let mut tree = Vec::new();
        self.tree.encode(&mut tree);
        buf.put_u32(tree.len() as u32);
        buf.put_slice(&tree);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let reader = &mut &*bytes;
        let name = reader.get_str()?.to_owned();
        let table = reader.get_str()?.to_owned();
        let col_count = reader.get_u16()? as usize;
        let mut cols = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            cols.push(reader.get_str()?.to_owned());
        }
        let unique = reader.get_u8()? != 0;
        let tree_size = reader.get_u32()? as usize;
        let mut tree_bytes = reader.get_slice(tree_size)?;
        let tree = BTree::decode(&mut tree_bytes)?;
        Ok(IndexFile {
            name,
            table,
            cols,
            unique,
            tree,
        })
    }
}
