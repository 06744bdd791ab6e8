//! Random-walk value generation.
//!
//! Each [`RandomWalk`] holds a fixed number of parallel value slots. Every
//! step perturbs a slot by an additive draw from a normal distribution. The
//! walk owns its random source: by default it is seeded from OS entropy so
//! that two walks never share a stream, and a fixed seed may be supplied for
//! reproducible fixtures.

use rand::{SeedableRng, rngs::StdRng};
use rand_distr::{Distribution, Normal, NormalError};
use serde::Deserialize;

use crate::Error;

/// Default number of value slots.
#[must_use]
pub fn default_count() -> usize {
    1
}

/// Default standard deviation of a single step.
#[must_use]
pub fn default_stddev() -> f64 {
    1.0
}

#[derive(Debug, Deserialize, serde::Serialize, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
/// Configuration for [`RandomWalk`]
pub struct Config {
    /// The number of parallel value slots, fixed for the walk's lifetime.
    #[serde(default = "default_count")]
    pub count: usize,
    /// The value every slot starts at.
    #[serde(default)]
    pub initial: f64,
    /// The mean of the per-step perturbation.
    #[serde(default)]
    pub mean: f64,
    /// The standard deviation of the per-step perturbation.
    #[serde(default = "default_stddev")]
    pub stddev: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            count: default_count(),
            initial: 0.0,
            mean: 0.0,
            stddev: default_stddev(),
        }
    }
}

impl Config {
    /// Returns true if the configuration is usable, false otherwise along with
    /// a reason.
    #[must_use]
    pub fn valid(&self) -> (bool, &'static str) {
        if self.count == 0 {
            return (false, "values.count must be greater than zero");
        }
        if !self.stddev.is_finite() || self.stddev < 0.0 {
            return (false, "values.stddev must be finite and non-negative");
        }
        if !self.initial.is_finite() || !self.mean.is_finite() {
            return (false, "values.initial and values.mean must be finite");
        }
        (true, "")
    }
}

/// N independent random walks sharing one distribution and random source.
#[derive(Debug, Clone)]
pub struct RandomWalk {
    rng: StdRng,
    distribution: Normal<f64>,
    values: Vec<f64>,
}

impl RandomWalk {
    /// Create a new [`RandomWalk`] seeded from OS entropy.
    ///
    /// # Errors
    ///
    /// Function will return an error if `stddev` is negative or not finite.
    pub fn new(count: usize, initial: f64, mean: f64, stddev: f64) -> Result<Self, Error> {
        Self::with_rng(StdRng::from_os_rng(), count, initial, mean, stddev)
    }

    /// Create a new [`RandomWalk`] with a fixed seed. Two walks built from the
    /// same arguments produce the same values.
    ///
    /// # Errors
    ///
    /// Function will return an error if `stddev` is negative or not finite.
    pub fn with_seed(
        count: usize,
        initial: f64,
        mean: f64,
        stddev: f64,
        seed: [u8; 32],
    ) -> Result<Self, Error> {
        Self::with_rng(StdRng::from_seed(seed), count, initial, mean, stddev)
    }

    /// Create a new [`RandomWalk`] from configuration, seeded from `seed` when
    /// present and OS entropy otherwise.
    ///
    /// # Errors
    ///
    /// Function will return an error if `config.stddev` is negative or not
    /// finite.
    pub fn from_config(config: &Config, seed: Option<[u8; 32]>) -> Result<Self, Error> {
        match seed {
            Some(seed) => Self::with_seed(
                config.count,
                config.initial,
                config.mean,
                config.stddev,
                seed,
            ),
            None => Self::new(config.count, config.initial, config.mean, config.stddev),
        }
    }

    fn with_rng(
        rng: StdRng,
        count: usize,
        initial: f64,
        mean: f64,
        stddev: f64,
    ) -> Result<Self, Error> {
        // Normal accepts a negative std_dev and mirrors the distribution.
        if stddev < 0.0 {
            return Err(Error::Distribution(NormalError::BadVariance));
        }
        let distribution = Normal::new(mean, stddev)?;
        Ok(Self {
            rng,
            distribution,
            values: vec![initial; count],
        })
    }

    /// Perturb the slot at `index` and return its new value.
    ///
    /// # Errors
    ///
    /// Function will return [`Error::IndexOutOfRange`] if `index` is not less
    /// than [`RandomWalk::len`].
    pub fn next_value(&mut self, index: usize) -> Result<f64, Error> {
        let count = self.values.len();
        let slot = self
            .values
            .get_mut(index)
            .ok_or(Error::IndexOutOfRange { index, count })?;
        *slot += self.distribution.sample(&mut self.rng);
        Ok(*slot)
    }

    /// Perturb every slot once, in increasing index order.
    pub fn step(&mut self) {
        for slot in &mut self.values {
            *slot += self.distribution.sample(&mut self.rng);
        }
    }

    /// The current value of every slot.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// The number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the walk has no slots at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{Config, RandomWalk};
    use crate::Error;

    proptest! {
        #[test]
        fn width_is_fixed(seed: [u8; 32], count in 0..64usize, steps in 0..128usize) {
            let mut walk = RandomWalk::with_seed(count, 10.0, 0.0, 0.001, seed).unwrap();
            for _ in 0..steps {
                walk.step();
                prop_assert_eq!(walk.len(), count);
            }
            prop_assert_eq!(walk.values().len(), count);
        }

        #[test]
        fn seeded_walks_agree(seed: [u8; 32], count in 1..16usize, steps in 1..64usize) {
            let mut left = RandomWalk::with_seed(count, 0.0, 0.5, 2.0, seed).unwrap();
            let mut right = RandomWalk::with_seed(count, 0.0, 0.5, 2.0, seed).unwrap();
            for _ in 0..steps {
                left.step();
                right.step();
            }
            prop_assert_eq!(left.values(), right.values());
        }

        #[test]
        fn step_matches_per_index_draws(seed: [u8; 32], count in 1..16usize) {
            let mut stepped = RandomWalk::with_seed(count, 1.0, 0.0, 1.0, seed).unwrap();
            let mut indexed = RandomWalk::with_seed(count, 1.0, 0.0, 1.0, seed).unwrap();
            stepped.step();
            for index in 0..count {
                indexed.next_value(index).unwrap();
            }
            prop_assert_eq!(stepped.values(), indexed.values());
        }
    }

    #[test]
    fn next_value_returns_updated_slot() {
        let mut walk = RandomWalk::with_seed(2, 10.0, 0.0, 0.001, [7; 32]).unwrap();
        let value = walk.next_value(1).unwrap();
        assert_eq!(walk.values()[1], value);
        assert_eq!(walk.values()[0], 10.0);
        assert!((value - 10.0).abs() < 1.0);
    }

    #[test]
    fn zero_stddev_walks_by_mean() {
        let mut walk = RandomWalk::with_seed(3, 1.0, 0.5, 0.0, [0; 32]).unwrap();
        walk.step();
        walk.step();
        assert_eq!(walk.values(), &[2.0, 2.0, 2.0]);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut walk = RandomWalk::with_seed(2, 0.0, 0.0, 1.0, [0; 32]).unwrap();
        assert!(matches!(
            walk.next_value(2),
            Err(Error::IndexOutOfRange { index: 2, count: 2 })
        ));
        assert_eq!(walk.len(), 2);
    }

    #[test]
    fn negative_stddev_is_rejected() {
        assert!(matches!(
            RandomWalk::new(1, 0.0, 0.0, -1.0),
            Err(Error::Distribution(_))
        ));
        assert!(matches!(
            RandomWalk::with_seed(3, 0.0, 0.0, -f64::MIN_POSITIVE, [0; 32]),
            Err(Error::Distribution(_))
        ));
    }

    #[test]
    fn non_finite_stddev_is_rejected() {
        assert!(matches!(
            RandomWalk::with_seed(1, 0.0, 0.0, f64::NAN, [0; 32]),
            Err(Error::Distribution(_))
        ));
        assert!(matches!(
            RandomWalk::new(1, 0.0, 0.0, f64::INFINITY),
            Err(Error::Distribution(_))
        ));
    }

    #[test]
    fn entropy_seeded_walks_diverge() {
        let mut left = RandomWalk::new(4, 0.0, 0.0, 1.0).unwrap();
        let mut right = RandomWalk::new(4, 0.0, 0.0, 1.0).unwrap();
        left.step();
        right.step();
        assert_ne!(left.values(), right.values());
    }

    #[test]
    fn config_validity() {
        assert!(Config::default().valid().0);
        let zero = Config {
            count: 0,
            ..Config::default()
        };
        assert!(!zero.valid().0);
        let nan = Config {
            stddev: f64::NAN,
            ..Config::default()
        };
        assert!(!nan.valid().0);
    }
}
