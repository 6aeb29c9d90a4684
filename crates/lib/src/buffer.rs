//! Minimal utilities for reading and writing the on-disk binary format.
//!
//! All multi-byte integers are little-endian. Strings are length-prefixed
//! by a `u16` followed by that many UTF-8 bytes, with no trailing NUL.

use std::str::Utf8Error;
use thiserror::Error;

/// An error that occurred when decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("buffer has insufficient data: expected {expected} bytes, {given} remain")]
    BufferLength { expected: usize, given: usize },
    #[error("corrupt file: bad magic number {0:#010x}")]
    BadMagic(u32),
    #[error("corrupt file: unsupported version {0}")]
    BadVersion(u16),
    #[error("corrupt file: unrecognized {kind} tag {tag}")]
    InvalidTag { kind: &'static str, tag: u8 },
    #[error("corrupt file: byte {0} is not a valid bool")]
    InvalidBool(u8),
    #[error("corrupt file: string is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("corrupt file: invalid {field} count {given}")]
    InvalidCount { field: &'static str, given: i64 },
}

/// A byte sink the codec writes into.
///
/// Implemented for `Vec<u8>`; everything is buffered in memory and
/// flushed to disk in one write.
pub trait BufWriter {
    /// Writes the `slice` to the buffer.
    fn put_slice(&mut self, slice: &[u8]);

    fn put_u8(&mut self, val: u8) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_u16(&mut self, val: u16) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_u32(&mut self, val: u32) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_u64(&mut self, val: u64) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_i8(&mut self, val: i8) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_i32(&mut self, val: i32) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_i64(&mut self, val: i64) {
        self.put_slice(&val.to_le_bytes())
    }
    fn put_f64(&mut self, val: f64) {
        self.put_slice(&val.to_le_bytes())
    }

    /// Writes a `u16`-length-prefixed UTF-8 string.
    fn put_str(&mut self, val: &str) {
        self.put_u16(val.len() as u16);
        self.put_slice(val.as_bytes());
    }
}

impl BufWriter for Vec<u8> {
    fn put_slice(&mut self, slice: &[u8]) {
        self.extend_from_slice(slice);
    }
}

/// A byte source the codec reads from. Implemented for `&[u8]`.
pub trait BufReader<'de> {
    /// Reads and returns a byte slice of `size` length, advancing the cursor.
    fn get_slice(&mut self, size: usize) -> Result<&'de [u8], DecodeError>;

    /// Returns the number of bytes left to read.
    fn remaining(&self) -> usize;

    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        self.get_array().map(u8::from_le_bytes)
    }
    fn get_u16(&mut self) -> Result<u16, DecodeError> {
        self.get_array().map(u16::from_le_bytes)
    }
    fn get_u32(&mut self) -> Result<u32, DecodeError> {
        self.get_array().map(u32::from_le_bytes)
    }
    fn get_u64(&mut self) -> Result<u64, DecodeError> {
        self.get_array().map(u64::from_le_bytes)
    }
    fn get_i8(&mut self) -> Result<i8, DecodeError> {
        self.get_array().map(i8::from_le_bytes)
    }
    fn get_i32(&mut self) -> Result<i32, DecodeError> {
        self.get_array().map(i32::from_le_bytes)
    }
    fn get_i64(&mut self) -> Result<i64, DecodeError> {
        self.get_array().map(i64::from_le_bytes)
    }
    fn get_f64(&mut self) -> Result<f64, DecodeError> {
        self.get_array().map(f64::from_le_bytes)
    }

    /// Reads a `u16`-length-prefixed UTF-8 string.
    fn get_str(&mut self) -> Result<&'de str, DecodeError> {
        let len = self.get_u16()? as usize;
        let bytes = self.get_slice(len)?;
        Ok(std::str::from_utf8(bytes)?)
    }

    fn get_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.get_slice(N)?;
        let mut buf = [0; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }
}

impl<'de> BufReader<'de> for &'de [u8] {
    fn get_slice(&mut self, size: usize) -> Result<&'de [u8], DecodeError> {
        if self.len() < size {
            return Err(DecodeError::BufferLength {
                expected: size,
                given: self.len(),
            });
        }
        let (ret, rest) = self.split_at(size);
        *self = rest;
        Ok(ret)
    }

    fn remaining(&self) -> usize {
        self.len()
    }
}

/// Reads an `i64` count field, rejecting negative or absurd values so a
/// corrupt file cannot drive a multi-gigabyte allocation.
pub fn get_count<'de>(reader: &mut impl BufReader<'de>, field: &'static str) -> Result<usize, DecodeError> {
    let n = reader.get_i64()?;
    if n < 0 || n > (1 << 32) {
        return Err(DecodeError::InvalidCount { field, given: n });
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn str_roundtrip() {
        let mut buf = Vec::new();
        buf.put_str("héllo");
        buf.put_str("");
        let mut r = buf.as_slice();
        assert_eq!(r.get_str().unwrap(), "héllo");
        assert_eq!(r.get_str().unwrap(), "");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn short_read_errors() {
        let mut r: &[u8] = &[1, 2];
        assert_eq!(
            r.get_u32(),
            Err(DecodeError::BufferLength { expected: 4, given: 2 })
        );
    }

    #[test]
    fn negative_count_rejected() {
        let mut buf = Vec::new();
        buf.put_i64(-4);
        assert!(matches!(
            get_count(&mut buf.as_slice(), "columns"),
            Err(DecodeError::InvalidCount { .. })
        ));
    }

    proptest! {
        #[test]
        fn primitive_roundtrip(a in any::<u64>(), b in any::<i64>(), c in any::<f64>(), d in any::<u16>()) {
            let mut buf = Vec::new();
            buf.put_u64(a);
            buf.put_i64(b);
            buf.put_f64(c);
            buf.put_u16(d);
            let mut r = buf.as_slice();
            prop_assert_eq!(r.get_u64().unwrap(), a);
            prop_assert_eq!(r.get_i64().unwrap(), b);
            prop_assert_eq!(r.get_f64().unwrap().to_bits(), c.to_bits());
            prop_assert_eq!(r.get_u16().unwrap(), d);
        }
    }
}
