//! Fixed-step timestamp sequences.

use serde::Deserialize;

#[derive(Debug, Deserialize, serde::Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Timestamps`]
pub struct Config {
    /// The timestamp the sequence starts from. The first generated timestamp
    /// is `origin + step`.
    pub origin: u64,
    /// The distance between two successive timestamps.
    pub step: u64,
}

/// A monotonic sequence of timestamps separated by a constant step.
///
/// The k-th call to [`Timestamps::tick`] returns `origin + k * step`.
/// Overflow of the counter is not handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    current: u64,
    step: u64,
}

impl Timestamps {
    /// Create a new [`Timestamps`] starting at `origin`.
    #[must_use]
    pub fn new(origin: u64, step: u64) -> Self {
        Self {
            current: origin,
            step,
        }
    }

    /// The most recently produced timestamp, or the origin if none has been
    /// produced yet.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// The configured step.
    #[must_use]
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Advance by one step and return the new timestamp.
    pub fn tick(&mut self) -> u64 {
        self.current += self.step;
        self.current
    }
}

impl From<Config> for Timestamps {
    fn from(config: Config) -> Self {
        Self::new(config.origin, config.step)
    }
}

impl Iterator for Timestamps {
    type Item = u64;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.tick())
    }
}
