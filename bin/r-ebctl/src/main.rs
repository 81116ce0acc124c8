//! ---
//! eb_section: "05-networking-external-interfaces"
//! eb_subsection: "binary"
//! eb_type: "source"
//! eb_scope: "code"
//! eb_description: "Command line driver for R-EB activities."
//! eb_version: "v0.0.0-prealpha"
//! eb_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use r_eb_common::{init_tracing, EngineConfig, ParameterMap};
use r_eb_core::Scenario;
use tracing::info;

mod report;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "R-EB activity driver",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run an activity until its cycles are exhausted or the timeout elapses")]
    Run(ActivityArgs),
    #[command(about = "Start an activity and keep reporting until interrupted")]
    Start(ActivityArgs),
}

#[derive(Debug, Args)]
struct ActivityArgs {
    /// Activity parameters as `key=value` pairs, e.g. `alias=a type=diag cycles=1M cyclerate=1000`.
    #[arg(required = true, value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Give up on `run` after this many seconds and stop the activity.
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Seconds between report lines; 0 disables them.
    #[arg(long, value_name = "SECONDS", default_value_t = 1)]
    report_interval: u64,

    /// Serve prometheus metrics on this address, overriding the configuration.
    #[arg(long, value_name = "ADDR")]
    metrics_listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/r-eb.toml"));

    let loaded = EngineConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    init_tracing("r-ebctl", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("running with default configuration"),
    }

    let (args, follow) = match cli.command {
        Commands::Run(args) => (args, false),
        Commands::Start(args) => (args, true),
    };
    if let Some(listen) = args.metrics_listen {
        config.metrics.enabled = true;
        config.metrics.listen = listen;
    }
    let params = ParameterMap::from_args(&args.params).context("invalid activity parameters")?;

    let scenario = Scenario::new(config.clone());
    let server = if config.metrics.enabled {
        let registry = r_eb_metrics::new_registry(scenario.metrics())?;
        let server = r_eb_metrics::spawn_http_server(registry, config.metrics.listen)?;
        info!(address = %server.addr(), "metrics exporter enabled");
        Some(server)
    } else {
        None
    };

    let options = report::DriveOptions {
        follow,
        timeout: args.timeout.map(Duration::from_secs),
        report_interval: Duration::from_secs(args.report_interval),
    };
    let outcome = report::drive(&scenario, params, options).await;

    if let Some(server) = server {
        server.shutdown().await?;
    }
    outcome
}
