use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::ports::PortRole;

/// Configuration errors surfaced while loading or validating [`crate::config::HarnessConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration value failed validation.
    #[error("Configuration error: {0}")]
    Invalid(String),

    /// An environment override could not be parsed.
    #[error("Invalid value {value:?} for environment variable {name}")]
    InvalidEnvVar { name: String, value: String },

    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for the harness schema.
    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

impl From<validator::ValidationErrors> for ConfigError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Invalid(errors.to_string())
    }
}

/// Port reservation errors.
#[derive(Debug, Error)]
pub enum PortError {
    /// Every candidate port in the window owned by this test identifier is in use.
    #[error("No free port for role {role} in window {window_start}..{window_end} (test id {test_id})")]
    Exhausted { test_id: u16, role: PortRole, window_start: u16, window_end: u16 },

    /// The reservation for this role was already handed to a service or released.
    #[error("Port for role {role} is no longer reserved")]
    NotReserved { role: PortRole },

    /// A released port could not be bound again.
    #[error("Failed to reserve port {port} for role {role} again: {source}")]
    Rebind {
        role: PortRole,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// The reserved socket could not be handed over to the async runtime.
    #[error("Failed to hand over listener for role {role} on port {port}: {source}")]
    Handover {
        role: PortRole,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// Fixture errors.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// A fixture file could not be read.
    #[error("Failed to read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Ephemeral TLS material could not be generated.
    #[error("Failed to generate TLS material: {0}")]
    Generate(#[from] rcgen::Error),

    /// Only part of the TLS fixture file set was configured.
    #[error("TLS fixtures require server certificate, server key and CA certificate paths together")]
    IncompleteTls,
}

/// Credential materialization errors.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The target path was empty.
    #[error("Empty credential file path")]
    InvalidPath,

    /// The credential file could not be created, written or synced.
    #[error("Failed to write credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Mock token backend errors.
#[derive(Debug, Error)]
pub enum AuthBackendError {
    /// The backend configuration is unusable.
    #[error("Invalid auth backend configuration: {0}")]
    InvalidConfig(String),

    /// The backend listener could not be served.
    #[error("Auth backend failed to serve on {addr:?}: {source}")]
    Serve {
        addr: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },

    /// The backend serve task ended before it was asked to stop.
    #[error("Auth backend on {addr} exited before stop was requested")]
    ExitedEarly { addr: SocketAddr },
}

/// Token exchange errors raised by the plugin, token manager or STS server.
#[derive(Debug, Error)]
pub enum StsError {
    /// A component was constructed with an unusable configuration.
    #[error("Invalid token exchange configuration: {0}")]
    InvalidConfig(String),

    /// The token manager has no exchange plugin installed.
    #[error("Token manager has no token exchange plugin installed")]
    PluginMissing,

    /// The plugin endpoints were not set before the first exchange.
    #[error("Token exchange plugin endpoints are not configured")]
    EndpointsMissing,

    /// An incoming STS request violated the token exchange protocol.
    #[error("Invalid token exchange request: {0}")]
    InvalidRequest(String),

    /// An upstream token endpoint rejected the call or could not be reached.
    #[error("Upstream token endpoint {endpoint} failed (status {status:?}): {message}")]
    Upstream { endpoint: String, status: Option<u16>, message: String },

    /// The HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    /// The STS listener could not be served.
    #[error("STS server failed to serve on {addr:?}: {source}")]
    Serve {
        addr: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },

    /// The STS server did not stop within its grace period.
    #[error("STS server on {addr} did not stop within {grace:?}")]
    StopTimeout { addr: SocketAddr, grace: Duration },
}

impl StsError {
    /// Returns true when an upstream endpoint answered with a 4xx status.
    pub fn is_upstream_rejection(&self) -> bool {
        matches!(self, Self::Upstream { status: Some(status), .. } if (400..500).contains(status))
    }
}

/// Discovery server errors.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// TLS material was rejected or the transport failed.
    #[error("Discovery server transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The discovery listener address could not be read.
    #[error("Discovery server listener error: {0}")]
    Listener(#[source] std::io::Error),

    /// The serve task panicked or was cancelled.
    #[error("Discovery server task failed: {0}")]
    Task(String),
}

/// Proxy launch errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The proxy binary is not on PATH.
    #[error("Proxy binary '{0}' not found on PATH")]
    BinaryNotFound(String),

    /// The bootstrap template references a value the harness does not provide.
    #[error("Unknown bootstrap placeholder '{0}'")]
    UnknownPlaceholder(String),

    /// The bootstrap template has an opening `{{` without a closing `}}`.
    #[error("Unterminated bootstrap placeholder at byte {0}")]
    UnterminatedPlaceholder(usize),

    /// The rendered bootstrap is not valid YAML.
    #[error("Rendered bootstrap is not valid YAML: {0}")]
    InvalidBootstrap(#[from] serde_yaml::Error),

    /// A bootstrap file could not be read or written.
    #[error("Bootstrap file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The proxy process could not be spawned or signalled.
    #[error("Proxy process error: {0}")]
    Process(#[source] std::io::Error),

    /// The test backend behind the proxy failed.
    #[error("Test backend error: {0}")]
    Backend(String),

    /// The proxy admin endpoint did not report ready.
    #[error("Proxy admin on port {admin_port} not ready: {reason}")]
    NotReady { admin_port: u16, reason: String },
}
