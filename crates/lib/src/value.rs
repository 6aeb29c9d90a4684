//! Dynamically-typed cell values.
//!
//! A row is an ordered tuple of [`Value`]s matching its table's column
//! list. The codec and the comparators switch on the tag.

use crate::buffer::{BufReader, BufWriter, DecodeError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::cmp::Ordering;
use std::fmt;

/// On-disk type tag for a column or an index key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum DataKind {
    Int64 = 1,
    Float64 = 2,
    Str = 3,
    Bool = 4,
    DateTime = 5,
}

impl DataKind {
    pub fn from_i8(tag: i8) -> Result<Self, DecodeError> {
        match tag {
            1 => Ok(DataKind::Int64),
            2 => Ok(DataKind::Float64),
            3 => Ok(DataKind::Str),
            4 => Ok(DataKind::Bool),
            5 => Ok(DataKind::DateTime),
            tag => Err(DecodeError::InvalidTag {
                kind: "data kind",
                tag: tag as u8,
            }),
        }
    }

    /// Type name as rendered in `SHOW COLUMNS` output.
    pub fn name(self) -> &'static str {
        match self {
            DataKind::Int64 => "int64",
            DataKind::Float64 => "float64",
            DataKind::Str => "string",
            DataKind::Bool => "bool",
            DataKind::DateTime => "datetime",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single cell value.
///
/// Datetimes carry seconds since the Unix epoch and render as UTC.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int64(i64),
    Float64(f64),
    Str(String),
    Bool(bool),
    DateTime(i64),
    Null,
}

impl Value {
    /// The kind tag of this value, or `None` for null.
    pub fn kind(&self) -> Option<DataKind> {
        match self {
            Value::Int64(_) => Some(DataKind::Int64),
            Value::Float64(_) => Some(DataKind::Float64),
            Value::Str(_) => Some(DataKind::Str),
            Value::Bool(_) => Some(DataKind::Bool),
            Value::DateTime(_) => Some(DataKind::DateTime),
            Value::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encodes the value payload for a column of known kind.
    ///
    /// The nullable presence flag is the caller's concern; `Null` must not
    /// reach this method.
    pub fn encode(&self, writer: &mut impl BufWriter) {
        match self {
            Value::Int64(v) => writer.put_i64(*v),
            Value::Float64(v) => writer.put_f64(*v),
            Value::Str(v) => writer.put_str(v),
            Value::Bool(v) => writer.put_u8(*v as u8),
            Value::DateTime(v) => writer.put_i64(*v),
            Value::Null => unreachable!("null has no payload encoding"),
        }
    }

    /// Decodes a value payload of the given kind.
    pub fn decode<'de>(kind: DataKind, reader: &mut impl BufReader<'de>) -> Result<Self, DecodeError> {
        Ok(match kind {
            DataKind::Int64 => Value::Int64(reader.get_i64()?),
            DataKind::Float64 => Value::Float64(reader.get_f64()?),
            DataKind::Str => Value::Str(reader.get_str()?.to_owned()),
            DataKind::Bool => match reader.get_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                b => return Err(DecodeError::InvalidBool(b)),
            },
            DataKind::DateTime => Value::DateTime(reader.get_i64()?),
        })
    }

    /// Numeric view widened to double precision, for mixed int/float
    /// comparison and arithmetic.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Compares two values under predicate semantics.
    ///
    /// Numeric comparisons widen both sides to f64; strings, bools and
    /// datetimes compare natively; a datetime against a string literal
    /// compares by the literal's parsed seconds. Pairings with no
    /// defined ordering (including anything against null) return
    /// `None`, which predicate evaluation treats as false.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::Str(s)) => Some(a.cmp(&Self::parse_datetime(s)?)),
            (Value::Str(s), Value::DateTime(b)) => Some(Self::parse_datetime(s)?.cmp(b)),
            _ => {
                let (a, b) = (self.as_f64()?, other.as_f64()?);
                a.partial_cmp(&b)
            }
        }
    }

    /// Parses a datetime literal (`YYYY-MM-DD [HH:MM:SS]`) into epoch seconds.
    pub fn parse_datetime(text: &str) -> Option<i64> {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
            return Some(dt.and_utc().timestamp());
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc().timestamp())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{v}"),
            Value::DateTime(secs) => match DateTime::<Utc>::from_timestamp(*secs, 0) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
                None => write!(f, "{secs}"),
            },
            Value::Null => f.write_str("NULL"),
        }
    }
}
