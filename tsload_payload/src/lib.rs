//! The tsload payloads
//!
//! This library supports payload generation for the tsload project: a series
//! of rows whose values follow a random walk and whose timestamps advance by a
//! fixed step, framed into a bounded arena for vectored transmission.

#![deny(clippy::cargo)]
#![deny(missing_docs)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

use serde::Deserialize;

pub mod decode;
pub mod encoder;
pub mod row;
pub mod timestamp;
pub mod value;

pub use encoder::{FrameEncoder, Span};
pub use row::{OwnedRow, Row, RowGenerator};
pub use timestamp::Timestamps;
pub use value::RandomWalk;

/// Errors related to generation and framing
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq)]
pub enum Error {
    /// A formatted field did not fit in the remainder of the arena. The batch
    /// is full and must be flushed.
    #[error("Arena exhausted: field needs {required} bytes, {remaining} remain")]
    BufferOverflow {
        /// Bytes the field required
        required: usize,
        /// Bytes left in the arena
        remaining: usize,
    },
    /// A row was requested after the batch filled, without a reset.
    #[error("Encoder is full, reset before adding rows")]
    EncoderFull,
    /// A value slot outside of the walk was addressed.
    #[error("Value index {index} out of range for {count} values")]
    IndexOutOfRange {
        /// The requested index
        index: usize,
        /// The number of value slots
        count: usize,
    },
    /// See [`rand_distr::NormalError`]
    #[error("Invalid value distribution: {0}")]
    Distribution(#[from] rand_distr::NormalError),
    /// See [`decode::Error`]
    #[error("Frame decode failed: {0}")]
    Decode(#[from] decode::Error),
}

/// Configuration for one generated series
#[derive(Debug, Deserialize, serde::Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The series name. Treated as opaque bytes.
    pub name: String,
    /// See [`timestamp::Config`]
    pub timestamp: timestamp::Config,
    /// See [`value::Config`]
    #[serde(default)]
    pub values: value::Config,
}

impl Config {
    /// Returns true if the configuration is usable, false otherwise along with
    /// a reason.
    #[must_use]
    pub fn valid(&self) -> (bool, &'static str) {
        self.values.valid()
    }
}
