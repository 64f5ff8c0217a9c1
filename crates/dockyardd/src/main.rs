//! dockyardd: the Dockyard daemon.
//!
//! Single binary that assembles the control plane:
//! - Container runtime client (Docker)
//! - Instance state store (redb)
//! - Service registry (redb)
//! - Provisioning pipeline + cleanup queue
//! - Metrics and health reconciliation loops
//!
//! # Usage
//!
//! ```text
//! dockyardd serve --config /etc/dockyard/dockyard.toml
//! dockyardd provision request.json --config /etc/dockyard/dockyard.toml
//! dockyardd teardown database orders --config /etc/dockyard/dockyard.toml
//! ```

mod platform;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dockyard_core::config::LoggingSettings;
use dockyard_core::{InstanceKind, PlatformConfig};

const DEFAULT_CONFIG: &str = "/etc/dockyard/dockyard.toml";

#[derive(Parser)]
#[command(name = "dockyardd", about = "Dockyard hosting control plane")]
struct Cli {
    /// Platform configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reconciliation loops until Ctrl-C.
    Serve,
    /// Provision one instance from a JSON request file.
    Provision {
        /// Path to the request document.
        request: PathBuf,
    },
    /// Tear down an instance and everything it owns.
    Teardown {
        /// `application` or `database`.
        kind: InstanceKind,
        name: String,
    },
    /// Check configured images against the local store and pull missing ones.
    PullImages,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = PlatformConfig::load(&cli.config)?;
    init_tracing(&config.logging);

    match cli.command {
        Command::Serve => platform::serve(config).await,
        Command::Provision { request } => platform::provision(config, &request).await,
        Command::Teardown { kind, name } => platform::teardown(config, kind, &name).await,
        Command::PullImages => platform::pull_images(config).await,
    }
}

fn init_tracing(settings: &LoggingSettings) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.filter));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if settings.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
