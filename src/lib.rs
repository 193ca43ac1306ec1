//! # STS flow harness
//!
//! Stands up the full topology needed to exercise Envoy's STS token-exchange
//! flow on loopback: a mock OAuth token backend, an STS server, a TLS xDS
//! discovery server and, optionally, an Envoy proxy.
//!
//! ## Architecture
//!
//! ```text
//! Envoy ──(subject token)──▶ STS server ──▶ mock auth backend
//!   │                                          (federated + access tokens)
//!   └──(Bearer access token, TLS)──▶ discovery server ──▶ dynamic listener
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sts_flow_harness::{discovery::TokenCheckingCallbacks, Env, HarnessConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::for_test(7, std::env::temp_dir());
//! let mut env = Env::set_up(&config, Arc::new(TokenCheckingCallbacks::default())).await?;
//! assert!(env.readiness().is_ready());
//! env.tear_down().await;
//! # Ok(())
//! # }
//! ```

pub mod auth_backend;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod discovery;
pub mod errors;
pub mod fixtures;
pub mod google;
pub mod harness;
pub mod observability;
pub mod ports;
pub mod probe;
pub mod proxy;
mod service;
pub mod sts;

pub use config::HarnessConfig;
pub use errors::{Error, Result};
pub use harness::{Env, SetupError, SetupStage, TeardownReport};
pub use ports::{PortAllocator, PortMap, PortRole};
pub use probe::{probe, ProbeBudget, ProbeOutcome};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Install the ring crypto provider for rustls if none is installed yet
pub fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        let _ = ring::default_provider().install_default();
    }
}
