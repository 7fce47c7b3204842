//! renderhubd — the RenderHub daemon.
//!
//! Single binary that assembles the RenderHub autoscaling subsystems:
//! - State store (redb): environment directory and scale-up queue
//! - Autoscaler: removes idle compute nodes
//! - Scale-up processor: applies queued pool resizes
//! - REST API for scale-up requests
//!
//! # Usage
//!
//! ```text
//! renderhubd run --config /etc/renderhub/renderhub.toml
//! renderhubd default-config > renderhub.toml
//! ```

mod daemon;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use renderhub_core::HubConfig;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "renderhub.toml";
const DEFAULT_LOG_FILTER: &str = "info,renderhubd=debug,renderhub=debug";

#[derive(Parser)]
#[command(name = "renderhubd", about = "RenderHub autoscaling daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler, the scale-up processor and the API server.
    Run {
        /// Configuration file. Defaults apply when omitted and
        /// `renderhub.toml` does not exist.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port to listen on.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Autoscaler cycle interval in seconds.
        #[arg(long)]
        autoscale_interval: Option<u64>,

        /// Scale-up processor poll delay in seconds.
        #[arg(long)]
        scale_up_interval: Option<u64>,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            data_dir,
            autoscale_interval,
            scale_up_interval,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(data_dir) = data_dir {
                config.server.data_dir = data_dir;
            }
            if let Some(secs) = autoscale_interval {
                config.autoscale.interval_secs = secs;
            }
            if let Some(secs) = scale_up_interval {
                config.scale_up.poll_delay_secs = secs;
            }
            daemon::run(config).await
        }
        Command::DefaultConfig => {
            print!("{}", HubConfig::default().to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<HubConfig> {
    match path {
        Some(path) => HubConfig::from_file(path),
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                HubConfig::from_file(default)
            } else {
                Ok(HubConfig::default())
            }
        }
    }
}
