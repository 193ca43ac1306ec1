use clap::Parser;
use sts_flow_harness::cli::{run_cli, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sts_flow_harness::install_rustls_provider();

    // Load .env file if it exists; must happen before configuration is read
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    run_cli(Cli::parse()).await
}
