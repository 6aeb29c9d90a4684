//! Per-transaction shadow files.
//!
//! Every mutation a transaction makes lands in a private scratch
//! directory, `db/shadow/<txid>/<table>/`, mirroring the canonical
//! table directories. Commit publishes the scratch files over the
//! canonical ones with one rename per file; rollback deletes the
//! scratch directory. Other transactions never observe shadow state.

use crate::db::paths::DbPath;
use crate::error::DBError;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub struct ShadowTx {
    txid: u64,
    dir: PathBuf,
    /// canonical path -> shadow path, for every file this transaction owns.
    files: HashMap<PathBuf, PathBuf>,
    /// Canonical paths that did not exist when first shadow-written.
    new_files: HashSet<PathBuf>,
    /// Canonical files to delete at commit (e.g. a dropped index).
    removed_files: HashSet<PathBuf>,
    dropped_tables: HashSet<String>,
    materialized: HashSet<String>,
}

impl ShadowTx {
    pub fn new(db: &DbPath, txid: u64) -> Self {
        ShadowTx {
            txid,
            dir: db.tx_shadow_dir(txid),
            files: HashMap::new(),
            new_files: HashSet::new(),
            removed_files: HashSet::new(),
            dropped_tables: HashSet::new(),
            materialized: HashSet::new(),
        }
    }

    pub fn txid(&self) -> u64 {
        self.txid
    }

    /// Whether this transaction has dropped the table.
    pub fn is_dropped(&self, table: &str) -> bool {
        self.dropped_tables.contains(table)
    }

    /// Names of tables created inside this transaction, which exist only
    /// under the shadow directory until commit.
    pub fn created_tables(&self) -> Vec<String> {
        self.new_files
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "bin"))
            .filter_map(|p| p.parent()?.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }

    /// Copies the table's main file and every index file into the shadow
    /// directory, once per table per transaction. A table with no
    /// canonical directory (created inside this transaction) has nothing
    /// to copy.
    pub fn materialize_table(&mut self, db: &DbPath, table: &str) -> Result<(), DBError> {
        if !self.materialized.insert(table.to_owned()) {
            return Ok(());
        }
        let table_dir = db.table_dir(table);
        if !table_dir.is_dir() {
            return Ok(());
        }
        let shadow_dir = self.dir.join(table);
        fs::create_dir_all(&shadow_dir)?;
        for entry in fs::read_dir(&table_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let canonical = entry.path();
            let shadow = shadow_dir.join(entry.file_name());
            fs::copy(&canonical, &shadow)?;
            self.files.insert(canonical, shadow);
        }
        log::debug!("tx {} materialized shadow for table `{}`", self.txid, table);
        Ok(())
    }

    /// Resolves a path for reading: the shadow copy if this transaction
    /// owns one, else the canonical file.
    pub fn resolve<'a>(&'a self, canonical: &'a Path) -> &'a Path {
        self.files.get(canonical).map(PathBuf::as_path).unwrap_or(canonical)
    }

    /// Resolves a path for writing, registering the shadow file on first
    /// use. New tables simply live under the shadow directory until
    /// commit.
    pub fn write_path(&mut self, table: &str, canonical: &Path) -> Result<PathBuf, DBError> {
        // Writing to a table un-drops it within this transaction.
        self.dropped_tables.remove(table);
        if let Some(shadow) = self.files.get(canonical) {
            return Ok(shadow.clone());
        }
        let file_name = canonical.file_name().expect("table files have names");
        let shadow_dir = self.dir.join(table);
        fs::create_dir_all(&shadow_dir)?;
        let shadow = shadow_dir.join(file_name);
        if !canonical.exists() {
            self.new_files.insert(canonical.to_owned());
        }
        self.removed_files.remove(canonical);
        self.files.insert(canonical.to_owned(), shadow.clone());
        Ok(shadow)
    }

    /// Marks a table dropped: its shadow files are discarded and its
    /// canonical directory is removed at commit.
    pub fn drop_table(&mut self, table: &str, table_dir: &Path) -> Result<(), DBError> {
        self.dropped_tables.insert(table.to_owned());
        let owned: Vec<PathBuf> = self
            .files
            .keys()
            .filter(|canonical| canonical.starts_with(table_dir))
            .cloned()
            .collect();
        for canonical in owned {
            if let Some(shadow) = self.files.remove(&canonical) {
                ignore_missing(fs::remove_file(shadow))?;
            }
            self.new_files.remove(&canonical);
        }
        Ok(())
    }

    /// Marks a single canonical file (an index being dropped) for
    /// deletion at commit, discarding any shadow copy.
    pub fn remove_file(&mut self, canonical: &Path) -> Result<(), DBError> {
        if let Some(shadow) = self.files.remove(canonical) {
            ignore_missing(fs::remove_file(shadow))?;
        }
        if self.new_files.remove(canonical) {
            return Ok(());
        }
        self.removed_files.insert(canonical.to_owned());
        Ok(())
    }

    /// Publishes the transaction in one pass: new files first so their
    /// directories exist, then overwrite renames, then file deletions and
    /// dropped table directories, then the scratch directory itself.
    pub fn commit(self, db: &DbPath) -> Result<(), DBError> {
        let (new, existing): (Vec<_>, Vec<_>) = self
            .files
            .iter()
            .partition(|(canonical, _)| self.new_files.contains(*canonical));

        for (canonical, shadow) in new.into_iter().chain(existing) {
            if let Some(parent) = canonical.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(shadow, canonical)?;
        }
        for canonical in &self.removed_files {
            ignore_missing(fs::remove_file(canonical))?;
        }
        for table in &self.dropped_tables {
            ignore_missing(fs::remove_dir_all(db.table_dir(table)))?;
        }
        ignore_missing(fs::remove_dir_all(&self.dir))?;
        log::debug!("tx {} committed", self.txid);
        Ok(())
    }

    /// Discards the scratch directory. Already-missing files are fine.
    pub fn rollback(self) {
        if let Err(e) = ignore_missing(fs::remove_dir_all(&self.dir)) {
            log::error!("tx {} failed to clean shadow dir: {e}", self.txid);
        } else {
            log::debug!("tx {} rolled back", self.txid);
        }
    }
}

fn ignore_missing(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::table::TableFile;
    use liminaldb_lib::schema::{ColumnDef, TableSchema};
    use liminaldb_lib::value::{DataKind, Value};

    fn users_table() -> TableFile {
        let schema = TableSchema::new(
            "users",
            vec![ColumnDef::new("id", DataKind::Int64).primary_key(true)],
            vec![],
        )
        .unwrap();
        TableFile::new(schema)
    }

    fn setup() -> (tempfile::TempDir, DbPath) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbPath::new(dir.path().join("db"));
        (dir, db)
    }

    #[test]
    fn new_table_lives_in_shadow_until_commit() {
        let (_dir, db) = setup();
        let mut shadow = ShadowTx::new(&db, 1);

        let canonical = db.table_file("users");
        let path = shadow.write_path("users", &canonical).unwrap();
        users_table().write_to(&path).unwrap();

        assert!(!canonical.exists());
        shadow.commit(&db).unwrap();
        assert!(canonical.exists());
        assert!(!db.tx_shadow_dir(1).exists());
    }

    #[test]
    fn rollback_leaves_canonical_untouched() {
        let (_dir, db) = setup();
        let canonical = db.table_file("users");
        let mut table = users_table();
        table.write_to(&canonical).unwrap();
        let before = fs::read(&canonical).unwrap();

        let mut shadow = ShadowTx::new(&db, 2);
        shadow.materialize_table(&db, "users").unwrap();
        table.rows.push(vec![Value::Int64(1)]);
        let path = shadow.write_path("users", &canonical).unwrap();
        table.write_to(&path).unwrap();

        shadow.rollback();
        assert_eq!(fs::read(&canonical).unwrap(), before);
        assert!(!db.tx_shadow_dir(2).exists());
    }

    #[test]
    fn reads_resolve_to_shadow_after_write() {
        let (_dir, db) = setup();
        let canonical = db.table_file("users");
        users_table().write_to(&canonical).unwrap();

        let mut shadow = ShadowTx::new(&db, 3);
        assert_eq!(shadow.resolve(&canonical), canonical.as_path());
        shadow.materialize_table(&db, "users").unwrap();
        assert_ne!(shadow.resolve(&canonical), canonical.as_path());
    }

    #[test]
    fn dropped_table_directory_is_removed_at_commit() {
        let (_dir, db) = setup();
        users_table().write_to(&db.table_file("users")).unwrap();

        let mut shadow = ShadowTx::new(&db, 4);
        shadow.materialize_table(&db, "users").unwrap();
        shadow.drop_table("users", &db.table_dir("users")).unwrap();
        shadow.commit(&db).unwrap();
        assert!(!db.table_dir("users").exists());
    }

    #[test]
    fn removed_index_file_is_deleted_at_commit() {
        let (_dir, db) = setup();
        users_table().write_to(&db.table_file("users")).unwrap();
        let idx = db.index_file("users", "ix_extra");
        fs::write(&idx, b"index").unwrap();

        let mut shadow = ShadowTx::new(&db, 5);
        shadow.materialize_table(&db, "users").unwrap();
        shadow.remove_file(&idx).unwrap();
        shadow.commit(&db).unwrap();
        assert!(!idx.exists());
        assert!(db.table_file("users").exists());
    }

    #[test]
    fn index_created_and_dropped_in_one_tx_never_lands() {
        let (_dir, db) = setup();
        let mut shadow = ShadowTx::new(&db, 6);
        let idx = db.index_file("users", "ix_tmp");
        let path = shadow.write_path("users", &idx).unwrap();
        fs::write(path, b"index").unwrap();
        shadow.remove_file(&idx).unwrap();
        shadow.commit(&db).unwrap();
        assert!(!idx.exists());
    }
}
