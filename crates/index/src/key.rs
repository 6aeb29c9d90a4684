//! Index keys and their total order.

use liminaldb_lib::buffer::{BufReader, BufWriter, DecodeError};
use liminaldb_lib::value::{DataKind, Value};
use std::cmp::Ordering;
use std::fmt;

/// A scalar key stored in a B-tree node.
///
/// Keys are tagged by kind on disk so a node deserializes without knowing
/// the indexed column's declared type. Nulls never enter an index.
#[derive(Clone, Debug)]
pub enum IndexKey {
    Int64(i64),
    Float64(f64),
    Str(String),
    Bool(bool),
    DateTime(i64),
}

impl IndexKey {
    pub fn kind(&self) -> DataKind {
        match self {
            IndexKey::Int64(_) => DataKind::Int64,
            IndexKey::Float64(_) => DataKind::Float64,
            IndexKey::Str(_) => DataKind::Str,
            IndexKey::Bool(_) => DataKind::Bool,
            IndexKey::DateTime(_) => DataKind::DateTime,
        }
    }

    /// Converts a cell value into a key. Nulls are not indexable.
    pub fn from_value(value: &Value) -> Option<IndexKey> {
        Some(match value {
            Value::Int64(v) => IndexKey::Int64(*v),
            Value::Float64(v) => IndexKey::Float64(*v),
            Value::Str(v) => IndexKey::Str(v.clone()),
            Value::Bool(v) => IndexKey::Bool(*v),
            Value::DateTime(v) => IndexKey::DateTime(*v),
            Value::Null => return None,
        })
    }

    /// Tagged encoding: `u8` kind followed by the typed payload.
    pub fn encode(&self, writer: &mut impl BufWriter) {
        writer.put_u8(self.kind() as u8);
        match self {
            IndexKey::Int64(v) => writer.put_i64(*v),
            IndexKey::Float64(v) => writer.put_f64(*v),
            IndexKey::Str(v) => writer.put_str(v),
            IndexKey::Bool(v) => writer.put_u8(*v as u8),
            IndexKey::DateTime(v) => writer.put_i64(*v),
        }
    }

    pub fn decode<'de>(reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        let tag = reader.get_u8()?;
        Ok(match DataKind::from_i8(tag as i8)? {
            DataKind::Int64 => IndexKey::Int64(reader.get_i64()?),
            DataKind::Float64 => IndexKey::Float64(reader.get_f64()?),
            DataKind::Str => IndexKey::Str(reader.get_str()?.to_owned()),
            DataKind::Bool => match reader.get_u8()? {
                0 => IndexKey::Bool(false),
                1 => IndexKey::Bool(true),
                b => return Err(DecodeError::InvalidBool(b)),
            },
            DataKind::DateTime => IndexKey::DateTime(reader.get_i64()?),
        })
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Int64(v) => write!(f, "{v}"),
            IndexKey::Float64(v) => write!(f, "{v}"),
            IndexKey::Str(v) => f.write_str(v),
            IndexKey::Bool(v) => write!(f, "{v}"),
            IndexKey::DateTime(v) => write!(f, "{v}"),
        }
    }
}

impl Ord for IndexKey {
    /// Same-kind keys compare natively; cross-kind keys fall back to their
    /// textual representations. Any single index holds same-kind keys, so
    /// the order is total where it matters.
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IndexKey::Int64(a), IndexKey::Int64(b)) => a.cmp(b),
            (IndexKey::Float64(a), IndexKey::Float64(b)) => a.total_cmp(b),
            (IndexKey::Str(a), IndexKey::Str(b)) => a.cmp(b),
            (IndexKey::Bool(a), IndexKey::Bool(b)) => a.cmp(b),
            (IndexKey::DateTime(a), IndexKey::DateTime(b)) => a.cmp(b),
            (a, b) => a.to_string().cmp(&b.to_string()),
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_orders_natively() {
        assert!(IndexKey::Int64(2) < IndexKey::Int64(10));
        assert!(IndexKey::Str("10".into()) < IndexKey::Str("2".into()));
        assert!(IndexKey::Bool(false) < IndexKey::Bool(true));
    }

    #[test]
    fn cross_kind_orders_textually() {
        // "10" < "2" lexicographically, regardless of the numeric kinds.
        assert!(IndexKey::Int64(10) < IndexKey::Str("2".into()));
    }

    #[test]
    fn tagged_roundtrip() {
        for key in [
            IndexKey::Int64(7),
            IndexKey::Float64(-0.5),
            IndexKey::Str("k".into()),
            IndexKey::Bool(true),
            IndexKey::DateTime(1_700_000_000),
        ] {
            let mut buf = Vec::new();
            key.encode(&mut buf);
            assert_eq!(IndexKey::decode(&mut buf.as_slice()).unwrap(), key);
        }
    }

    #[test]
    fn bad_tag_is_corrupt() {
        let buf = [0x7fu8];
        assert!(matches!(
            IndexKey::decode(&mut buf.as_slice()),
            Err(DecodeError::InvalidTag { .. })
        ));
    }
}
