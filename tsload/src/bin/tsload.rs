use std::{env, io::Read, time::Duration};

use clap::{ArgGroup, Args, Parser, Subcommand};
use jemallocator::Jemalloc;
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusBuilder;
use rustc_hash::FxHashMap;
use tokio::{runtime::Builder, signal, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};
use tsload::{
    config::{self, Config, Telemetry},
    generator,
};

#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(thiserror::Error, Debug)]
enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("tsload generator returned an error: {0}")]
    Generator(#[from] generator::Error),
    #[error("Invalid tsload config: {0}")]
    Config(#[from] config::Error),
    #[error("Parsing Prometheus address failed: {0}")]
    PrometheusAddr(#[from] std::net::AddrParseError),
    #[error("Failed to install prometheus recorder: {0}")]
    Prometheus(#[from] metrics_exporter_prometheus::BuildError),
}

fn default_config_path() -> String {
    "/etc/tsload/tsload.yaml".to_string()
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run tsload with specified configuration
    Run(RunArgs),
    /// Validate configuration file and exit
    ConfigCheck(ConfigCheckArgs),
}

#[derive(Args)]
#[clap(group(
     ArgGroup::new("experiment-duration")
           .required(false)
           .args(&["experiment_duration_seconds", "experiment_duration_infinite"]),
))]
struct RunArgs {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
    /// socket to bind prometheus exporter to, overrides any configured
    /// telemetry
    #[clap(long)]
    prometheus_addr: Option<String>,
    /// the maximum time to wait, in seconds, for controlled shutdown
    #[clap(long, default_value_t = 30)]
    max_shutdown_delay: u16,
    /// the time, in seconds, to send load to the collector
    #[clap(long, default_value_t = 120)]
    experiment_duration_seconds: u32,
    /// flag to allow infinite experiment duration
    #[clap(long)]
    experiment_duration_infinite: bool,
}

#[derive(Args)]
struct ConfigCheckArgs {
    /// path on disk to the configuration file
    #[clap(long, default_value_t = default_config_path())]
    config_path: String,
}

fn load_config_contents(config_path: &str) -> Result<String, Error> {
    if let Ok(env_var_value) = env::var("TSLOAD_CONFIG") {
        debug!("Using config from env var 'TSLOAD_CONFIG'");
        Ok(env_var_value)
    } else {
        debug!("Attempting to open configuration file at: {}", config_path);
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .open(config_path)
            .map_err(|err| {
                error!("Could not read config file '{}': {}", config_path, err);
                err
            })?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }
}

fn parse_config(contents: &str) -> Result<Config, Error> {
    Config::from_yaml(contents).map_err(|err| {
        error!("Configuration validation failed: {}", err);
        Error::Config(err)
    })
}

fn validate_config(config_path: &str) -> Result<Config, Error> {
    let contents = load_config_contents(config_path)?;
    let config = parse_config(&contents)?;
    info!("Configuration file is valid");
    Ok(config)
}

fn get_config(args: &RunArgs, config: Option<String>) -> Result<Config, Error> {
    let contents = if let Some(config) = config {
        config
    } else {
        load_config_contents(&args.config_path)?
    };

    let mut config = parse_config(&contents)?;

    if let Some(ref prom_addr) = args.prometheus_addr {
        let global_labels = match config.telemetry {
            Some(Telemetry::Prometheus { global_labels, .. }) => global_labels,
            None => FxHashMap::default(),
        };
        config.telemetry = Some(Telemetry::Prometheus {
            addr: prom_addr.parse()?,
            global_labels,
        });
    }
    Ok(config)
}

async fn inner_main(experiment_duration: Duration, config: Config) -> Result<(), Error> {
    if let Some(Telemetry::Prometheus {
        addr,
        global_labels,
    }) = config.telemetry
    {
        let mut builder = PrometheusBuilder::new().with_http_listener(addr);
        for (k, v) in global_labels {
            builder = builder.add_global_label(k, v);
        }
        builder.install()?;
    }

    let shutdown = CancellationToken::new();

    let mut gsrv_joinset = tokio::task::JoinSet::new();
    let generator_server = generator::Server::new(&config.generator, shutdown.clone())?;
    gsrv_joinset.spawn(generator_server.run());

    let experiment_timer = time::sleep(experiment_duration);
    tokio::pin!(experiment_timer);
    let mut interval = time::interval(Duration::from_millis(400));
    let res = loop {
        tokio::select! {
            _ = interval.tick() => {
                gauge!("tsload.running").set(1.0);
            },
            _ = signal::ctrl_c() => {
                info!("received ctrl-c");
                break Ok(());
            },
            () = &mut experiment_timer => {
                info!("experiment duration exceeded, signaling for shutdown");
                break Ok(());
            }
            Some(res) = gsrv_joinset.join_next() => {
                match res {
                    Ok(Ok(())) => {
                        info!("generator finished");
                        break Ok(());
                    }
                    Ok(Err(err)) => {
                        error!("Generator shut down unexpectedly: {}", err);
                        break Err(Error::Generator(err));
                    }
                    Err(err) => {
                        error!("Could not join the spawned generator task: {}", err);
                        break Ok(());
                    }
                }
            },
        }
    };

    shutdown.cancel();
    while let Some(res) = gsrv_joinset.join_next().await {
        match res {
            Ok(Ok(())) => debug!("generator shut down successfully"),
            Ok(Err(err)) => error!("Generator failed during shutdown: {}", err),
            Err(err) => error!("Could not join the spawned generator task: {}", err),
        }
    }
    gauge!("tsload.running").set(0.0);
    res
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .finish()
        .init();

    let version = env!("CARGO_PKG_VERSION");
    info!("Starting tsload {version} run.");

    let args = match Cli::parse().command {
        Commands::Run(args) => args,
        Commands::ConfigCheck(config_check_cmd) => {
            match validate_config(&config_check_cmd.config_path) {
                Ok(_) => std::process::exit(0),
                Err(_) => std::process::exit(1),
            }
        }
    };

    let config = get_config(&args, None);

    let experiment_duration = if args.experiment_duration_infinite {
        Duration::MAX
    } else {
        Duration::from_secs(args.experiment_duration_seconds.into())
    };
    let max_shutdown_delay = Duration::from_secs(args.max_shutdown_delay.into());

    let runtime = Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()?;
    let res = runtime.block_on(inner_main(experiment_duration, config?));
    info!(
        "Shutting down runtime with a {} second delay. May leave orphaned tasks.",
        max_shutdown_delay.as_secs(),
    );
    runtime.shutdown_timeout(max_shutdown_delay);
    info!("Bye. :)");
    res
}
