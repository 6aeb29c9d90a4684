//! Typed layout of the database directory.
//!
//! ```text
//! db/
//!   tables/<table>/<table>.bin          table file
//!   tables/<table>/<table>_<index>.idx  one file per index
//!   shadow/<txid>/<table>/...           per-transaction scratch
//! ```

use std::path::{Path, PathBuf};

#[derive(Clone, Debug)]
pub struct DbPath(PathBuf);

impl DbPath {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DbPath(root.into())
    }

    pub fn root(&self) -> &Path {
        &self.0
    }

    pub fn tables_dir(&self) -> PathBuf {
        self.0.join("tables")
    }

    pub fn table_dir(&self, table: &str) -> PathBuf {
        self.tables_dir().join(table)
    }

    pub fn table_file(&self, table: &str) -> PathBuf {
        self.table_dir(table).join(format!("{table}.bin"))
    }

    pub fn index_file(&self, table: &str, index: &str) -> PathBuf {
        self.table_dir(table).join(format!("{table}_{index}.idx"))
    }

    pub fn shadow_dir(&self) -> PathBuf {
        self.0.join("shadow")
    }

    pub fn tx_shadow_dir(&self, txid: u64) -> PathBuf {
        self.shadow_dir().join(txid.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let db = DbPath::new("/data/db");
        assert_eq!(db.table_file("users"), PathBuf::from("/data/db/tables/users/users.bin"));
        assert_eq!(
            db.index_file("users", "pk_users"),
            PathBuf::from("/data/db/tables/users/users_pk_users.idx")
        );
        assert_eq!(db.tx_shadow_dir(7), PathBuf::from("/data/db/shadow/7"));
    }
}
