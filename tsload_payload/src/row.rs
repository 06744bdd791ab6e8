//! Rows: one series, one timestamp, one vector of values.

use bytes::Bytes;

use crate::{Config, Error, timestamp::Timestamps, value::RandomWalk};

/// A view over the current state of a [`RowGenerator`].
///
/// A `Row` borrows the generator it came from and so must be consumed before
/// the generator is advanced again. Convert into an [`OwnedRow`] to keep it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Row<'a> {
    /// The series name, written verbatim on the wire.
    pub series: &'a [u8],
    /// The row timestamp.
    pub timestamp: u64,
    /// The row values, one per slot of the underlying walk.
    pub values: &'a [f64],
}

/// An owned counterpart of [`Row`].
#[derive(Debug, Clone, PartialEq)]
pub struct OwnedRow {
    /// The series name.
    pub series: Bytes,
    /// The row timestamp.
    pub timestamp: u64,
    /// The row values.
    pub values: Vec<f64>,
}

impl From<Row<'_>> for OwnedRow {
    fn from(row: Row<'_>) -> Self {
        Self {
            series: Bytes::copy_from_slice(row.series),
            timestamp: row.timestamp,
            values: row.values.to_vec(),
        }
    }
}

/// Binds a series name to a timestamp sequence and a random walk.
#[derive(Debug, Clone)]
pub struct RowGenerator {
    series: Bytes,
    timestamps: Timestamps,
    values: RandomWalk,
}

impl RowGenerator {
    /// Create a new [`RowGenerator`]
    #[must_use]
    pub fn new<S>(series: S, timestamps: Timestamps, values: RandomWalk) -> Self
    where
        S: Into<Bytes>,
    {
        Self {
            series: series.into(),
            timestamps,
            values,
        }
    }

    /// Create a new [`RowGenerator`] from configuration. See
    /// [`RandomWalk::from_config`] for the treatment of `seed`.
    ///
    /// # Errors
    ///
    /// Function will return an error if the value configuration is invalid.
    pub fn from_config(config: &Config, seed: Option<[u8; 32]>) -> Result<Self, Error> {
        let values = RandomWalk::from_config(&config.values, seed)?;
        Ok(Self::new(
            config.name.clone(),
            Timestamps::from(config.timestamp),
            values,
        ))
    }

    /// Advance every value slot, then the timestamp, and return the new row.
    pub fn next_row(&mut self) -> Row<'_> {
        self.values.step();
        self.timestamps.tick();
        self.current()
    }

    /// The row at the current state, without advancing.
    #[must_use]
    pub fn current(&self) -> Row<'_> {
        Row {
            series: &self.series,
            timestamp: self.timestamps.current(),
            values: self.values.values(),
        }
    }

    /// The series name.
    #[must_use]
    pub fn series(&self) -> &Bytes {
        &self.series
    }

    /// The number of values in every row.
    #[must_use]
    pub fn width(&self) -> usize {
        self.values.len()
    }
}
