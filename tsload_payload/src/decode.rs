//! Parse framed rows back out of bytes.
//!
//! This is the inverse of [`crate::encoder`], used to check that what goes on
//! the wire is well-formed. It accepts any concatenation of whole frames.

use std::str::{self, FromStr};

use bytes::Bytes;

use crate::row::OwnedRow;

const CRLF: &[u8] = b"\r\n";

/// Errors produced by [`decode`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The input ended where a line was expected.
    #[error("Input ends at byte {offset}, expected another line")]
    Truncated {
        /// Byte offset of the missing line
        offset: usize,
    },
    /// A line started with the wrong marker.
    #[error("Expected marker '{expected}' at byte {offset}")]
    Marker {
        /// The marker that should open the line
        expected: char,
        /// Byte offset of the line
        offset: usize,
    },
    /// A line has no CRLF terminator.
    #[error("Line at byte {offset} is not CRLF terminated")]
    Terminator {
        /// Byte offset of the line
        offset: usize,
    },
    /// A numeric line did not parse.
    #[error("Line at byte {offset} is not a valid number")]
    Number {
        /// Byte offset of the line
        offset: usize,
    },
}

/// Decode every frame in `bytes`.
///
/// # Errors
///
/// Function will return an error if `bytes` is not a concatenation of
/// well-formed frames.
pub fn decode(bytes: &[u8]) -> Result<Vec<OwnedRow>, Error> {
    let mut reader = Reader { bytes, offset: 0 };
    let mut rows = Vec::new();
    while !reader.is_empty() {
        rows.push(reader.frame()?);
    }
    Ok(rows)
}

struct Reader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.offset)
    }

    fn frame(&mut self) -> Result<OwnedRow, Error> {
        let series = Bytes::copy_from_slice(self.line(b'+')?);
        let timestamp: u64 = self.number(b'+')?;
        let count: usize = self.number(b'*')?;
        // A value line is at least "+0\r\n". The count is untrusted.
        let mut values = Vec::with_capacity(count.min(self.remaining() / 4));
        for _ in 0..count {
            values.push(self.number(b'+')?);
        }
        Ok(OwnedRow {
            series,
            timestamp,
            values,
        })
    }

    /// Consume one line opened by `marker`, returning its body.
    fn line(&mut self, marker: u8) -> Result<&'a [u8], Error> {
        let offset = self.offset;
        let rest = self.bytes.get(offset..).unwrap_or_default();
        match rest.first() {
            None => return Err(Error::Truncated { offset }),
            Some(&first) if first != marker => {
                return Err(Error::Marker {
                    expected: char::from(marker),
                    offset,
                });
            }
            Some(_) => {}
        }
        let end = rest
            .windows(CRLF.len())
            .position(|window| window == CRLF)
            .ok_or(Error::Terminator { offset })?;
        self.offset = offset + end + CRLF.len();
        Ok(&rest[1..end])
    }

    fn number<T>(&mut self, marker: u8) -> Result<T, Error>
    where
        T: FromStr,
    {
        let offset = self.offset;
        let body = self.line(marker)?;
        str::from_utf8(body)
            .ok()
            .and_then(|text| text.parse().ok())
            .ok_or(Error::Number { offset })
    }
}
