//! tsload generators
//!
//! The generator is responsible for pushing load into the collector. Rows are
//! not pre-computed: each batch is framed into the encoder's arena, written
//! with one vectored write, and then the arena is reused for the next batch.
//! The only protocol spoken today is TCP.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod tcp;

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Server`].
pub enum Error {
    /// See [`crate::generator::tcp::Error`] for details.
    #[error(transparent)]
    Tcp(#[from] tcp::Error),
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration for [`Server`]
pub struct Config {
    /// The ID assigned to this generator
    #[serde(default)]
    pub id: Option<String>,
    /// See [`crate::generator::tcp::Config`] for details.
    pub tcp: tcp::Config,
}

#[derive(Debug)]
/// The generator server.
pub enum Server {
    /// See [`crate::generator::tcp::Tcp`] for details.
    Tcp(tcp::Tcp),
}

impl Server {
    /// Create a new [`Server`]
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying sub-server creation
    /// signals error.
    pub fn new(config: &Config, shutdown: CancellationToken) -> Result<Self, Error> {
        let srv = Self::Tcp(tcp::Tcp::new(config.id.as_deref(), &config.tcp, shutdown)?);
        Ok(srv)
    }

    /// Run this [`Server`] to completion
    ///
    /// This function runs the sub-server to its completion, or until a
    /// shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Function will return an error if the underlying sub-server signals
    /// error.
    pub async fn run(self) -> Result<(), Error> {
        match self {
            Server::Tcp(inner) => inner.spin().await?,
        }
        Ok(())
    }
}
