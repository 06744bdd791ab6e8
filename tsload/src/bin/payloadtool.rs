//! Offline batch generation for tsload configurations.
//!
//! Frames batches exactly as the generator would, without a collector, and
//! reports their size. Useful for sizing arenas and pinning down seeded
//! output.

#![allow(clippy::print_stdout)]

use std::fmt;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use byte_unit::{Byte, UnitType};
use clap::Parser;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use tracing_subscriber::util::SubscriberInitExt;
use tsload::{config, generator::tcp};
use tsload_payload::{FrameEncoder, decode};

/// Fingerprint of every generated batch, in send order.
#[derive(Debug)]
struct Fingerprint {
    /// SHA256 hash of the payload bytes
    hash: String,
    /// Shannon entropy in bits per byte
    entropy: f64,
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} entropy={:.4}", self.hash, self.entropy)
    }
}

/// Shannon entropy (bits per byte) of a byte sequence, in [0.0, 8.0].
#[allow(clippy::cast_precision_loss)]
fn shannon_entropy(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut freq = [0u64; 256];
    for &b in data {
        freq[b as usize] += 1;
    }
    let len = data.len() as f64;
    let mut entropy = 0.0;
    for &count in &freq {
        if count > 0 {
            let p = count as f64 / len;
            entropy -= p * p.log2();
        }
    }
    entropy
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path to standard tsload config file
    config_path: String,
    /// Number of batches to generate
    #[clap(short, long, default_value_t = 16)]
    batches: u32,
    /// Generate and print a fingerprint of all batches
    #[clap(short, long)]
    fingerprint: bool,
    /// Decode every batch and check timestamps are gap-free
    #[clap(long)]
    verify_frames: bool,
}

#[derive(Debug, Default)]
struct Report {
    batches: u32,
    rows: u64,
    bytes: u64,
    fingerprint: Option<Fingerprint>,
}

fn generate(config: &tcp::Config, args: &Args) -> Result<Report> {
    let seed = if let Some(seed) = config.seed {
        seed
    } else {
        warn!("No seed configured, using the zero seed so output is repeatable");
        [0; 32]
    };
    let capacity = usize::try_from(config.arena_capacity.as_u64())
        .with_context(|| format!("Arena capacity {} is too large", config.arena_capacity))?;
    let mut encoder = FrameEncoder::from_config(&config.series, capacity, Some(seed))?;
    let step = config.series.timestamp.step;

    let mut hasher = Sha256::new();
    let mut all_bytes = Vec::new();
    let mut report = Report::default();
    let mut previous: Option<u64> = None;
    let start = Instant::now();
    for batch in 0..args.batches {
        let rows = encoder.fill();
        if rows == 0 {
            return Err(anyhow!(
                "Arena of {capacity} bytes cannot hold a single row of series {:?}",
                config.series.name
            ));
        }
        let bytes = encoder.to_bytes();

        if args.verify_frames {
            let decoded = decode::decode(&bytes)
                .with_context(|| format!("Batch {batch} is not well-formed"))?;
            if decoded.len() != rows {
                return Err(anyhow!(
                    "Batch {batch} decoded to {} rows, expected {rows}",
                    decoded.len()
                ));
            }
            for row in &decoded {
                if let Some(prev) = previous
                    && row.timestamp != prev.wrapping_add(step)
                {
                    return Err(anyhow!(
                        "Batch {batch} timestamp {} does not follow {prev}",
                        row.timestamp
                    ));
                }
                previous = Some(row.timestamp);
            }
        }
        if args.fingerprint {
            hasher.update(&bytes);
            all_bytes.extend_from_slice(&bytes);
        }

        report.batches += 1;
        report.rows += rows as u64;
        report.bytes += bytes.len() as u64;
    }
    info!("Batch generation took {:?}", start.elapsed());

    if args.fingerprint {
        let hash = format!("{:x}", hasher.finalize());
        report.fingerprint = Some(Fingerprint {
            hash,
            entropy: shannon_entropy(&all_bytes),
        });
    }
    Ok(report)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    info!("Welcome to payloadtool");
    let args = Args::parse();

    let config = config::load_config_from_path(Path::new(&args.config_path))
        .with_context(|| format!("Failed to load configuration at {}", args.config_path))?;
    let id = config.generator.id.as_deref().unwrap_or("<unnamed>");

    let report = generate(&config.generator.tcp, &args)?;
    let total = Byte::from_u64(report.bytes).get_appropriate_unit(UnitType::Binary);
    info!(
        "{id}: generated {batches} batches, {rows} rows, {total} of data",
        batches = report.batches,
        rows = report.rows,
    );
    if args.verify_frames {
        info!("All batches decoded with gap-free timestamps");
    }
    if let Some(fp) = report.fingerprint {
        println!("{id}: {fp}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn tcp_config(seed: Option<[u8; 32]>, arena: u64) -> tcp::Config {
        tcp::Config {
            addr: "127.0.0.1:1".to_string(),
            series: tsload_payload::Config {
                name: "mem host=b".to_string(),
                timestamp: tsload_payload::timestamp::Config {
                    origin: 0,
                    step: 5,
                },
                values: tsload_payload::value::Config::default(),
            },
            arena_capacity: Byte::from_u64(arena),
            seed,
            maximum_batches: None,
        }
    }

    fn args(batches: u32) -> Args {
        Args {
            config_path: String::new(),
            batches,
            fingerprint: true,
            verify_frames: true,
        }
    }

    #[test]
    fn missing_seed_matches_zero_seed() {
        let unseeded = generate(&tcp_config(None, 256), &args(4)).expect("generation failed");
        let zeroed =
            generate(&tcp_config(Some([0; 32]), 256), &args(4)).expect("generation failed");
        assert_eq!(unseeded.rows, zeroed.rows);
        assert_eq!(
            unseeded.fingerprint.expect("fingerprint").hash,
            zeroed.fingerprint.expect("fingerprint").hash
        );
    }

    #[test]
    fn reports_every_batch() {
        let report = generate(&tcp_config(Some([9; 32]), 512), &args(8)).expect("generation failed");
        assert_eq!(report.batches, 8);
        assert!(report.rows >= 8);
        // Series lines are spans outside the arena; the rest of each batch is
        // bounded by the arena.
        let header = report.rows * (3 + "mem host=b".len() as u64);
        assert!(report.bytes > header);
        assert!(report.bytes <= header + u64::from(report.batches) * 512);
    }

    #[test]
    fn tiny_arena_is_an_error() {
        assert!(generate(&tcp_config(Some([0; 32]), 4), &args(1)).is_err());
    }

    #[test]
    fn empty_slice_returns_zero() {
        assert_eq!(shannon_entropy(&[]), 0.0);
    }

    #[test]
    fn two_different_bytes_returns_one_bit() {
        assert!((shannon_entropy(&[0, 1]) - 1.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn entropy_bounded(data in prop::collection::vec(any::<u8>(), 0..1000)) {
            let entropy = shannon_entropy(&data);
            prop_assert!((0.0..=8.0).contains(&entropy));
        }
    }
}
