//! The TCP protocol speaking generator.
//!
//! ## Metrics
//!
//! `bytes_written`: Bytes sent successfully
//! `batches_sent`: Batches sent successfully
//! `rows_encoded`: Rows contained in sent batches
//! `request_failure`: Number of failed writes; each occurrence stops the generator
//! `connection_failure`: Number of connection failures
//!

use std::{
    io::{self, IoSlice},
    net::{SocketAddr, ToSocketAddrs},
    num::NonZeroU64,
};

use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use tsload_payload::{FrameEncoder, encoder};

#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
/// Configuration of this generator.
pub struct Config {
    /// The address for the collector, resolved at startup
    pub addr: String,
    /// The series to generate
    pub series: tsload_payload::Config,
    /// The size of the arena that one batch is framed into
    #[serde(default = "encoder::default_arena_capacity")]
    pub arena_capacity: byte_unit::Byte,
    /// The seed for the random walk. Absent, the walk is seeded from OS
    /// entropy and runs are not reproducible.
    #[serde(default)]
    pub seed: Option<[u8; 32]>,
    /// Stop after this many batches have been sent
    #[serde(default)]
    pub maximum_batches: Option<NonZeroU64>,
}

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`Tcp`].
pub enum Error {
    /// Creation of the encoder failed.
    #[error("Payload error: {0}")]
    Payload(#[from] tsload_payload::Error),
    /// The series configuration is not usable.
    #[error("Invalid series configuration: {0}")]
    InvalidSeries(&'static str),
    /// The arena capacity does not fit in `usize`.
    #[error("Arena capacity {0} is too large")]
    Capacity(byte_unit::Byte),
    /// The arena cannot hold even one row.
    #[error("Arena of {capacity} bytes cannot hold a single row")]
    ArenaTooSmall {
        /// Arena capacity in bytes
        capacity: usize,
    },
    /// Error resolving the collector address
    #[error("Failed to resolve TCP address {addr}: {source}")]
    Resolve {
        /// Collector address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// The collector address resolved to no socket address
    #[error("TCP address {0} did not resolve to any socket address")]
    NoAddress(String),
    /// Error connecting to TCP endpoint
    #[error("Failed to connect to TCP address {addr}: {source}")]
    ConnectionFailed {
        /// Target address
        addr: String,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
    /// Error writing to TCP socket
    #[error("Failed to write batch of {batch_bytes} bytes to TCP address {addr}: {source}")]
    WriteFailed {
        /// Target address
        addr: String,
        /// Size of the batch being written
        batch_bytes: usize,
        /// Underlying IO error
        #[source]
        source: Box<io::Error>,
    },
}

#[derive(Debug)]
/// The TCP generator.
///
/// This generator is responsible for connecting to the collector via TCP and
/// streaming batches of framed rows until shut down.
pub struct Tcp {
    addr: SocketAddr,
    encoder: FrameEncoder,
    maximum_batches: Option<NonZeroU64>,
    metric_labels: Vec<(String, String)>,
    shutdown: CancellationToken,
}

impl Tcp {
    /// Create a new [`Tcp`] instance
    ///
    /// # Errors
    ///
    /// Creation will fail if the series configuration is invalid or the
    /// collector address does not resolve.
    pub fn new(id: Option<&str>, config: &Config, shutdown: CancellationToken) -> Result<Self, Error> {
        let (valid, reason) = config.series.valid();
        if !valid {
            return Err(Error::InvalidSeries(reason));
        }

        let capacity = usize::try_from(config.arena_capacity.as_u64())
            .map_err(|_| Error::Capacity(config.arena_capacity))?;
        let encoder = FrameEncoder::from_config(&config.series, capacity, config.seed)?;

        let addr = config
            .addr
            .to_socket_addrs()
            .map_err(|source| Error::Resolve {
                addr: config.addr.clone(),
                source: Box::new(source),
            })?
            .next()
            .ok_or_else(|| Error::NoAddress(config.addr.clone()))?;

        let mut metric_labels = vec![
            ("component".to_string(), "generator".to_string()),
            ("component_name".to_string(), "tcp".to_string()),
        ];
        if let Some(id) = id {
            metric_labels.push(("id".to_string(), id.to_string()));
        }

        debug!(
            "tcp generator for series {name:?}, {capacity} byte arena, seeded: {seeded}",
            name = config.series.name,
            seeded = config.seed.is_some(),
        );

        Ok(Self {
            addr,
            encoder,
            maximum_batches: config.maximum_batches,
            metric_labels,
            shutdown,
        })
    }

    /// Run [`Tcp`] to completion or until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Function will return an error if the connection cannot be established,
    /// the socket cannot be written to, or the arena cannot hold one row. No
    /// reconnection is attempted.
    pub async fn spin(mut self) -> Result<(), Error> {
        let mut connection = tokio::select! {
            biased;

            () = self.shutdown.cancelled() => {
                info!("shutdown signal received");
                return Ok(());
            }
            result = TcpStream::connect(self.addr) => match result {
                Ok(connection) => connection,
                Err(source) => {
                    let mut error_labels = self.metric_labels.clone();
                    error_labels.push(("error".to_string(), source.to_string()));
                    counter!("connection_failure", &error_labels).increment(1);
                    return Err(Error::ConnectionFailed {
                        addr: self.addr.to_string(),
                        source: Box::new(source),
                    });
                }
            },
        };
        info!("connected to {addr}", addr = self.addr);

        let bytes_written = counter!("bytes_written", &self.metric_labels);
        let batches_sent = counter!("batches_sent", &self.metric_labels);
        let rows_encoded = counter!("rows_encoded", &self.metric_labels);

        let mut sent: u64 = 0;
        loop {
            if let Some(maximum) = self.maximum_batches
                && sent >= maximum.get()
            {
                info!("sent {sent} batches, stopping");
                return Ok(());
            }

            let rows = self.encoder.fill();
            if rows == 0 {
                return Err(Error::ArenaTooSmall {
                    capacity: self.encoder.capacity(),
                });
            }
            let batch_bytes = self.encoder.batch_len();
            let mut slices = self.encoder.io_slices();

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    return Ok(());
                }
                result = write_all_vectored(&mut connection, &mut slices) => match result {
                    Ok(()) => {
                        bytes_written.increment(batch_bytes as u64);
                        batches_sent.increment(1);
                        rows_encoded.increment(rows as u64);
                        trace!("wrote batch of {rows} rows, {batch_bytes} bytes");
                    }
                    Err(source) => {
                        let mut error_labels = self.metric_labels.clone();
                        error_labels.push(("error".to_string(), source.to_string()));
                        counter!("request_failure", &error_labels).increment(1);
                        return Err(Error::WriteFailed {
                            addr: self.addr.to_string(),
                            batch_bytes,
                            source: Box::new(source),
                        });
                    }
                },
            }
            sent += 1;
        }
    }
}

/// Write every slice to `writer`, in order, as one logical unit.
///
/// # Errors
///
/// Function will return an error if the underlying write fails or the writer
/// stops accepting bytes before the slices are exhausted.
pub async fn write_all_vectored<W>(writer: &mut W, mut slices: &mut [IoSlice<'_>]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    // Drop leading empty slices so that a zero-length write below means the
    // writer is closed.
    IoSlice::advance_slices(&mut slices, 0);
    while !slices.is_empty() {
        let written = writer.write_vectored(slices).await?;
        if written == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "failed to write whole batch",
            ));
        }
        IoSlice::advance_slices(&mut slices, written);
    }
    writer.flush().await
}
