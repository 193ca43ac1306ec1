//! # Command Line Interface
//!
//! `up` stands an STS flow topology up and holds it until Ctrl-C; `ports`
//! prints the port map a test identifier would get.

pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::HarnessConfig;
use crate::discovery::TokenCheckingCallbacks;
use crate::harness::Env;
use crate::observability::init_logging;
use crate::ports::PortAllocator;
use crate::proxy::ProxyMode;
use output::OutputFormat;

#[derive(Parser)]
#[command(name = "sts-flow-harness")]
#[command(about = "Envoy STS token-exchange flow test harness")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// YAML configuration file; `STS_HARNESS_*` variables still override it
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the topology and keep it running until Ctrl-C
    Up {
        /// Test identifier selecting the port window
        #[arg(long)]
        test_id: Option<u16>,

        /// Whether to start the proxy
        #[arg(long)]
        proxy: Option<ProxyMode>,
    },

    /// Print the port map for a test identifier
    Ports {
        /// Test identifier selecting the port window
        #[arg(long)]
        test_id: Option<u16>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

/// Run the CLI with parsed arguments
pub async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => HarnessConfig::from_env().context("Failed to load configuration from environment")?,
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);

    match cli.command {
        Commands::Up { test_id, proxy } => {
            if let Some(test_id) = test_id {
                config.test_id = test_id;
            }
            if let Some(mode) = proxy {
                config.proxy.mode = mode;
            }
            run_up(config).await
        }
        Commands::Ports { test_id, output } => {
            let test_id = test_id.unwrap_or(config.test_id);
            let allocator = PortAllocator::for_test(test_id)
                .with_context(|| format!("Failed to allocate ports for test id {test_id}"))?;
            output::print_port_map(test_id, &allocator.ports(), output)
        }
    }
}

async fn run_up(config: HarnessConfig) -> anyhow::Result<()> {
    let callbacks = Arc::new(TokenCheckingCallbacks::default());
    let mut env = Env::set_up(&config, callbacks.clone()).await?;

    println!("STS flow is up (test id {})", env.test_id());
    output::print_port_map(env.test_id(), &env.ports(), OutputFormat::Table)?;
    if !env.readiness().is_ready() {
        println!("⚠️  STS flow did not pass its readiness probe");
    }
    println!("Press Ctrl-C to tear down");

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!(
        streams = callbacks.num_streams(),
        tokens_received = callbacks.num_tokens_received(),
        "Shutdown signal received"
    );

    let report = env.tear_down().await;
    output::print_teardown_report(&report);
    Ok(())
}
