//! This module controls configuration parsing from the end user, providing a
//! convenience mechanism for the rest of the program. Crashes are most likely
//! to originate from this code, intentionally.
use std::{
    fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::generator;

/// Errors produced by [`Config`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Error for a serde [`serde_yaml`].
    #[error("Failed to deserialize yaml: {0}")]
    SerdeYaml(#[from] serde_yaml::Error),
    /// Error reading config file
    #[error("Failed to read config file {path:?}: {source}")]
    ReadFile {
        /// File path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: Box<std::io::Error>,
    },
    /// The configuration parsed but describes an unusable series.
    #[error("Invalid series configuration: {0}")]
    InvalidSeries(&'static str),
    /// The arena cannot be zero bytes.
    #[error("arena_capacity must be greater than zero")]
    ZeroArena,
}

/// Main configuration struct for this program
#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The method by which to express telemetry
    #[serde(default)]
    pub telemetry: Option<Telemetry>,
    /// The generator to apply to the collector
    pub generator: generator::Config,
}

#[derive(Debug, Deserialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
/// Defines the manner of tsload's telemetry.
pub enum Telemetry {
    /// In prometheus mode tsload will emit its internal telemetry for scraping
    /// at a prometheus poll endpoint.
    Prometheus {
        /// Address and port for prometheus exporter
        addr: SocketAddr,
        /// Additional labels to include in every metric
        #[serde(default)]
        global_labels: FxHashMap<String, String>,
    },
}

impl Config {
    /// Parse and validate a YAML configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or describes an unusable
    /// series.
    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Self = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values that deserialize but cannot run.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first problem found.
    pub fn validate(&self) -> Result<(), Error> {
        let tcp = &self.generator.tcp;
        let (valid, reason) = tcp.series.valid();
        if !valid {
            return Err(Error::InvalidSeries(reason));
        }
        if tcp.arena_capacity.as_u64() == 0 {
            return Err(Error::ZeroArena);
        }
        Ok(())
    }
}

/// Load and validate configuration from a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or its contents are not a
/// valid configuration.
pub fn load_config_from_path(path: &Path) -> Result<Config, Error> {
    let contents = fs::read_to_string(path).map_err(|source| Error::ReadFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })?;
    Config::from_yaml(&contents)
}
