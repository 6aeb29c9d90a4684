//! Table metadata: columns, foreign keys, index definitions, and the
//! metadata block codec for the table file format.

use crate::buffer::{get_count, BufReader, BufWriter, DecodeError};
use crate::value::DataKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("table name must not be empty")]
    EmptyTableName,
    #[error("table `{table}` has a column with an empty name")]
    EmptyColumnName { table: String },
    #[error("duplicate column `{column}` in table `{table}`")]
    DuplicateColumn { table: String, column: String },
    #[error("string column `{column}` must declare a non-zero length")]
    ZeroLengthString { column: String },
    #[error("primary key column `{column}` may not be nullable")]
    NullablePrimaryKey { column: String },
    #[error("table `{table}` has no primary key")]
    MissingPrimaryKey { table: String },
    #[error("table `{table}` must have at least one column")]
    NoColumns { table: String },
    #[error("foreign key `{fk}` references unknown local column `{column}`")]
    UnknownFkColumn { fk: String, column: String },
    #[error("index `{index}` references unknown column `{column}`")]
    UnknownIndexColumn { index: String, column: String },
}

/// A single column definition. Disk layout of a row follows the column
/// list order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: DataKind,
    /// Maximum length in bytes; required non-zero for `Str`, 0 otherwise.
    pub len: u16,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: DataKind) -> Self {
        ColumnDef {
            name: name.into(),
            kind,
            len: 0,
            nullable: false,
            primary_key: false,
        }
    }

    pub fn with_len(mut self, len: u16) -> Self {
        self.len = len;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        self
    }

    /// Rendered type, e.g. `int64` or `string(50)`.
    pub fn type_name(&self) -> String {
        match self.kind {
            DataKind::Str => format!("string({})", self.len),
            kind => kind.name().to_owned(),
        }
    }

    fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_str(&self.name);
        writer.put_i8(self.kind as i8);
        writer.put_u16(self.len);
        writer.put_u8(self.nullable as u8);
        writer.put_u8(self.primary_key as u8);
    }

    fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        Ok(ColumnDef {
            name: reader.get_str()?.to_owned(),
            kind: DataKind::from_i8(reader.get_i8()?)?,
            len: reader.get_u16()?,
            nullable: reader.get_u8()? != 0,
            primary_key: reader.get_u8()? != 0,
        })
    }
}

/// A named foreign key: ordered (local column, referenced column) pairs
/// against a referenced table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub name: String,
    pub ref_table: String,
    pub pairs: Vec<(String, String)>,
}

impl ForeignKeyDef {
    fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_str(&self.name);
        writer.put_str(&self.ref_table);
        writer.put_i64(self.pairs.len() as i64);
        for (local, referenced) in &self.pairs {
            writer.put_str(local);
            writer.put_str(referenced);
        }
    }

    fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        let name = reader.get_str()?.to_owned();
        let ref_table = reader.get_str()?.to_owned();
        let n = get_count(reader, "foreign key pairs")?;
        let mut pairs = Vec::with_capacity(n);
        for _ in 0..n {
            pairs.push((reader.get_str()?.to_owned(), reader.get_str()?.to_owned()));
        }
        Ok(ForeignKeyDef { name, ref_table, pairs })
    }
}

/// Index metadata as stored in the table file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub cols: Vec<String>,
    pub unique: bool,
    /// The auto-created primary-key index; may not be dropped.
    pub primary: bool,
}

impl IndexSchema {
    fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_str(&self.name);
        writer.put_i64(self.cols.len() as i64);
        for col in &self.cols {
            writer.put_str(col);
        }
        writer.put_u8(self.unique as u8);
        writer.put_u8(self.primary as u8);
    }

    fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        let name = reader.get_str()?.to_owned();
        let n = get_count(reader, "index columns")?;
        let mut cols = Vec::with_capacity(n);
        for _ in 0..n {
            cols.push(reader.get_str()?.to_owned());
        }
        Ok(IndexSchema {
            name,
            cols,
            unique: reader.get_u8()? != 0,
            primary: reader.get_u8()? != 0,
        })
    }
}

/// Full table metadata, the second block of a table file.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
    pub row_count: i64,
    /// Byte offset into the file where the row region begins.
    pub data_offset: u32,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    /// Derived name of the auto-created primary-key index.
    pub fn pk_index_name(table: &str) -> String {
        format!("pk_{table}")
    }

    /// Builds validated metadata for a new table, auto-creating the unique
    /// primary-key index over the declared primary-key columns.
    pub fn new(
        table_name: impl Into<String>,
        columns: Vec<ColumnDef>,
        foreign_keys: Vec<ForeignKeyDef>,
    ) -> Result<Self, SchemaError> {
        let table_name = table_name.into();
        let pk_cols: Vec<String> = columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect();
        let indexes = if pk_cols.is_empty() {
            Vec::new()
        } else {
            vec![IndexSchema {
                name: Self::pk_index_name(&table_name),
                cols: pk_cols,
                unique: true,
                primary: true,
            }]
        };
        let schema = TableSchema {
            table_name,
            columns,
            row_count: 0,
            data_offset: 0,
            foreign_keys,
            indexes,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Checks the structural invariants of the metadata.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.table_name.is_empty() {
            return Err(SchemaError::EmptyTableName);
        }
        if self.columns.is_empty() {
            return Err(SchemaError::NoColumns {
                table: self.table_name.clone(),
            });
        }
        let mut seen = std::collections::HashSet::new();
        let mut has_pk = false;
        for col in &self.columns {
            if col.name.is_empty() {
                return Err(SchemaError::EmptyColumnName {
                    table: self.table_name.clone(),
                });
            }
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.table_name.clone(),
                    column: col.name.clone(),
                });
            }
            if col.kind == DataKind::Str && col.len == 0 {
                return Err(SchemaError::ZeroLengthString {
                    column: col.name.clone(),
                });
            }
            if col.primary_key {
                has_pk = true;
                if col.nullable {
                    return Err(SchemaError::NullablePrimaryKey {
                        column: col.name.clone(),
                    });
                }
            }
        }
        if !has_pk {
            return Err(SchemaError::MissingPrimaryKey {
                table: self.table_name.clone(),
            });
        }
        for fk in &self.foreign_keys {
            for (local, _) in &fk.pairs {
                if self.column(local).is_none() {
                    return Err(SchemaError::UnknownFkColumn {
                        fk: fk.name.clone(),
                        column: local.clone(),
                    });
                }
            }
        }
        for index in &self.indexes {
            for col in &index.cols {
                if self.column(col).is_none() {
                    return Err(SchemaError::UnknownIndexColumn {
                        index: index.name.clone(),
                        column: col.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Finds a column by name, returning its position in the row tuple.
    pub fn column(&self, name: &str) -> Option<(usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .find(|(_, c)| c.name == name)
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|i| i.name == name)
    }

    pub fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_str(&self.table_name);
        writer.put_i64(self.columns.len() as i64);
        for col in &self.columns {
            col.encode(writer);
        }
        writer.put_i64(self.row_count);
        writer.put_u32(self.data_offset);
        writer.put_i64(self.foreign_keys.len() as i64);
        for fk in &self.foreign_keys {
            fk.encode(writer);
        }
        writer.put_i64(self.indexes.len() as i64);
        for index in &self.indexes {
            index.encode(writer);
        }
    }

    pub fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        let table_name = reader.get_str()?.to_owned();
        let n = get_count(reader, "columns")?;
        let mut columns = Vec::with_capacity(n);
        for _ in 0..n {
            columns.push(ColumnDef::decode(reader)?);
        }
        let row_count = reader.get_i64()?;
        let data_offset = reader.get_u32()?;
        let n = get_count(reader, "foreign keys")?;
        let mut foreign_keys = Vec::with_capacity(n);
        for _ in 0..n {
            foreign_keys.push(ForeignKeyDef::decode(reader)?);
        }
        let n = get_count(reader, "indexes")?;
        let mut indexes = Vec::with_capacity(n);
        for _ in 0..n {
            indexes.push(IndexSchema::decode(reader)?);
        }
        Ok(TableSchema {
            table_name,
            columns,
            row_count,
            data_offset,
            foreign_keys,
            indexes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_schema() -> TableSchema {
        TableSchema::new(
            "users",
            vec![
                ColumnDef::new("id", DataKind::Int64).primary_key(true),
                ColumnDef::new("name", DataKind::Str).with_len(50).nullable(true),
            ],
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn pk_index_is_auto_created() {
        let schema = users_schema();
        let pk = schema.index("pk_users").expect("pk index");
        assert!(pk.unique && pk.primary);
        assert_eq!(pk.cols, vec!["id".to_string()]);
    }

    #[test]
    fn duplicate_column_rejected() {
        let err = TableSchema::new(
            "t",
            vec![
                ColumnDef::new("a", DataKind::Int64).primary_key(true),
                ColumnDef::new("a", DataKind::Bool),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateColumn { .. }));
    }

    #[test]
    fn nullable_primary_key_rejected() {
        let err = TableSchema::new(
            "t",
            vec![ColumnDef::new("a", DataKind::Int64).primary_key(true).nullable(true)],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::NullablePrimaryKey { .. }));
    }

    #[test]
    fn missing_primary_key_rejected() {
        let err = TableSchema::new("t", vec![ColumnDef::new("a", DataKind::Int64)], vec![]).unwrap_err();
        assert!(matches!(err, SchemaError::MissingPrimaryKey { .. }));
    }

    #[test]
    fn zero_length_string_rejected() {
        let err = TableSchema::new(
            "t",
            vec![
                ColumnDef::new("a", DataKind::Int64).primary_key(true),
                ColumnDef::new("s", DataKind::Str),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, SchemaError::ZeroLengthString { .. }));
    }

    #[test]
    fn metadata_roundtrip() {
        let mut schema = users_schema();
        schema.row_count = 3;
        schema.data_offset = 96;
        schema.foreign_keys.push(ForeignKeyDef {
            name: "fk_users_orgs".into(),
            ref_table: "orgs".into(),
            pairs: vec![("id".into(), "owner_id".into())],
        });
        let mut buf = Vec::new();
        schema.encode(&mut buf);
        let decoded = TableSchema::decode(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, schema);
    }
}
