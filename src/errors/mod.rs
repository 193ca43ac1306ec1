//! # Error Handling
//!
//! Error types for the STS flow harness, built with `thiserror`.
//!
//! Each launcher has its own error enum carrying the context needed to diagnose
//! a failed setup (path, port or service name). They fold into [`Error`], which
//! the lifecycle coordinator tags with the setup stage that produced it.

mod types;

pub use types::{
    AuthBackendError, ConfigError, CredentialError, DiscoveryError, FixtureError, PortError,
    ProxyError, StsError,
};

/// Custom result type for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Configuration errors
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Port reservation errors
    #[error(transparent)]
    Port(#[from] PortError),

    /// Fixture loading or generation errors
    #[error(transparent)]
    Fixture(#[from] FixtureError),

    /// Credential file errors
    #[error(transparent)]
    Credential(#[from] CredentialError),

    /// Mock token backend errors
    #[error(transparent)]
    AuthBackend(#[from] AuthBackendError),

    /// Token exchange (plugin, manager, STS server) errors
    #[error(transparent)]
    Sts(#[from] StsError),

    /// Discovery server errors
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Proxy launch errors
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(ConfigError::Invalid(message.into()))
    }
}
