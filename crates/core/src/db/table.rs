//! Reading and writing table files.
//!
//! A table file is: header (magic, version, metadata length), metadata
//! block, row-offsets array, row region. Everything is buffered in
//! memory and written in a single pass; durability across transactions
//! comes from the shadow manager's rename step, not from this module.

use crate::db::paths::DbPath;
use crate::error::DBError;
use liminaldb_lib::buffer::{get_count, BufReader, BufWriter, DecodeError};
use liminaldb_lib::schema::TableSchema;
use liminaldb_lib::value::Value;
use std::fs;
use std::path::Path;

pub const MAGIC: u32 = 0x4D44_4247;
pub const VERSION: u16 = 1;
/// magic + version + metadata length
pub const HEADER_LEN: usize = 4 + 2 + 4;

/// A fully materialized table: metadata plus the ordered row sequence.
///
/// A row id is the row's position in `rows`; ids are renumbered on
/// deletion.
#[derive(Clone, Debug, PartialEq)]
pub struct TableFile {
    pub schema: TableSchema,
    pub rows: Vec<Vec<Value>>,
}

impl TableFile {
    pub fn new(schema: TableSchema) -> Self {
        TableFile { schema, rows: Vec::new() }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut schema = self.schema.clone();
        schema.row_count = self.rows.len() as i64;

        let mut row_bytes = Vec::new();
        let mut offsets = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            offsets.push(row_bytes.len() as i64);
            encode_row(&schema, row, &mut row_bytes);
        }

        let mut metadata = Vec::new();
        schema.encode(&mut metadata);
        let offsets_len = 8 + 8 * offsets.len();
        schema.data_offset = (HEADER_LEN + metadata.len() + offsets_len) as u32;
        metadata.clear();
        schema.encode(&mut metadata);

        let mut buf = Vec::with_capacity(HEADER_LEN + metadata.len() + offsets_len + row_bytes.len());
        buf.put_u32(MAGIC);
        buf.put_u16(VERSION);
        buf.put_u32(metadata.len() as u32);
        buf.put_slice(&metadata);
        buf.put_i64(offsets.len() as i64);
        for offset in offsets {
            buf.put_i64(offset);
        }
        buf.put_slice(&row_bytes);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let reader = &mut &*bytes;
        let magic = reader.get_u32()?;
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = reader.get_u16()?;
        if version != VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let metadata_len = reader.get_u32()? as usize;
        let mut metadata = reader.get_slice(metadata_len)?;
        let schema = TableSchema::decode(&mut metadata)?;

        let offset_count = get_count(reader, "row offsets")?;
        for _ in 0..offset_count {
            reader.get_i64()?;
        }
        if offset_count as i64 != schema.row_count {
            return Err(DecodeError::InvalidCount {
                field: "row offsets",
                given: offset_count as i64,
            });
        }

        let mut rows = Vec::with_capacity(offset_count);
        for _ in 0..schema.row_count {
            rows.push(decode_row(&schema, reader)?);
        }
        Ok(TableFile { schema, rows })
    }

    pub fn read_from(path: &Path) -> Result<Self, DBError> {
        let bytes = fs::read(path)?;
        Self::decode(&bytes).map_err(DBError::corrupt(path))
    }

    pub fn write_to(&self, path: &Path) -> Result<(), DBError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.encode())?;
        Ok(())
    }
}

fn encode_row(schema: &TableSchema, row: &[Value], writer: &mut impl BufWriter) {
    for (col, value) in schema.columns.iter().zip(row) {
        if col.nullable {
            if value.is_null() {
                writer.put_u8(0);
                continue;
            }
            writer.put_u8(1);
        }
        value.encode(writer);
    }
}

fn decode_row<'de>(schema: &TableSchema, reader: &mut impl BufReader<'de>) -> Result<Vec<Value>, DecodeError> {
    let mut row = Vec::with_capacity(schema.columns.len());
    for col in &schema.columns {
        if col.nullable && reader.get_u8()? == 0 {
            row.push(Value::Null);
            continue;
        }
        row.push(Value::decode(col.kind, reader)?);
    }
    Ok(row)
}

/// Lists the tables present under the database root, by directory scan.
pub fn list_tables(db: &DbPath) -> Result<Vec<String>, DBError> {
    let tables_dir = db.tables_dir();
    if !tables_dir.exists() {
        return Ok(Vec::new());
    }
    let mut tables = Vec::new();
    for entry in fs::read_dir(&tables_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().join(format!("{name}.bin")).is_file() {
            tables.push(name);
        }
    }
    tables.sort_unstable();
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liminaldb_lib::schema::ColumnDef;
    use liminaldb_lib::value::DataKind;
    use pretty_assertions::assert_eq;

    fn sample_table() -> TableFile {
        let schema = TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", DataKind::Int64).primary_key(true),
                ColumnDef::new("name", DataKind::Str).with_len(50).nullable(true),
                ColumnDef::new("joined", DataKind::DateTime).nullable(true),
            ],
            vec![],
        )
        .unwrap();
        let mut table = TableFile::new(schema);
        table.rows.push(vec![Value::Int64(1), Value::Str("Alice".into()), Value::DateTime(1_700_000_000)]);
        table.rows.push(vec![Value::Int64(2), Value::Null, Value::Null]);
        table
    }

    #[test]
    fn file_roundtrip() {
        let table = sample_table();
        let bytes = table.encode();
        let decoded = TableFile::decode(&bytes).unwrap();
        assert_eq!(decoded.rows, table.rows);
        assert_eq!(decoded.schema.table_name, "users");
        assert_eq!(decoded.schema.row_count, 2);
    }

    #[test]
    fn data_offset_points_at_row_region() {
        let table = sample_table();
        let bytes = table.encode();
        let decoded = TableFile::decode(&bytes).unwrap();
        let offsets_len = 8 + 8 * table.rows.len();
        let metadata_len = u32::from_le_bytes(bytes[6..10].try_into().unwrap()) as usize;
        assert_eq!(
            decoded.schema.data_offset as usize,
            HEADER_LEN + metadata_len + offsets_len
        );
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut bytes = sample_table().encode();
        bytes[0] ^= 0xff;
        assert!(matches!(TableFile::decode(&bytes), Err(DecodeError::BadMagic(_))));
    }

    #[test]
    fn bad_version_is_corrupt() {
        let mut bytes = sample_table().encode();
        bytes[4] = 9;
        assert!(matches!(TableFile::decode(&bytes), Err(DecodeError::BadVersion(9))));
    }

    #[test]
    fn truncated_row_region_is_corrupt() {
        let bytes = sample_table().encode();
        assert!(TableFile::decode(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn write_read_through_fs() {
        let dir = tempfile::tempdir().unwrap();
        let db = DbPath::new(dir.path().join("db"));
        let table = sample_table();
        table.write_to(&db.table_file("users")).unwrap();
        let read = TableFile::read_from(&db.table_file("users")).unwrap();
        assert_eq!(read.rows, table.rows);
        assert_eq!(list_tables(&db).unwrap(), vec!["users".to_string()]);
    }
}
