//! # Configuration Settings
//!
//! Defines the configuration structure for the STS flow harness.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::credentials::CredentialPaths;
use crate::errors::ConfigError;
use crate::probe::{ProbeBudget, DEFAULT_MAX_ATTEMPTS};
use crate::proxy::ProxyMode;
use crate::sts::{FAKE_PROJECT_NUMBER, FAKE_TRUST_DOMAIN};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const ENVOY_LOG_LEVELS: [&str; 7] = ["trace", "debug", "info", "warn", "error", "critical", "off"];

/// Main harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HarnessConfig {
    /// Identifier selecting this run's port window
    pub test_id: u16,

    /// Trust domain of the token exchange
    #[validate(length(min = 1, message = "Trust domain cannot be empty"))]
    pub trust_domain: String,

    /// Project number used in the access token endpoint
    #[validate(length(min = 1, message = "Project number cannot be empty"))]
    pub project_number: String,

    /// Where the credential files for the proxy are written
    pub credentials: CredentialPaths,

    /// Optional fixture files; anything missing is generated
    pub fixtures: FixtureConfig,

    /// STS readiness probe budget
    #[validate(nested)]
    pub probe: ProbeConfig,

    /// Discovery server settings
    #[validate(nested)]
    pub discovery: DiscoveryConfig,

    /// Proxy launch settings
    #[validate(nested)]
    pub proxy: ProxyConfig,

    /// Logging settings
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            test_id: 0,
            trust_domain: FAKE_TRUST_DOMAIN.to_string(),
            project_number: FAKE_PROJECT_NUMBER.to_string(),
            credentials: CredentialPaths::default(),
            fixtures: FixtureConfig::default(),
            probe: ProbeConfig::default(),
            discovery: DiscoveryConfig::default(),
            proxy: ProxyConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Defaults for a test identifier, with credentials written under `dir`
    pub fn for_test(test_id: u16, dir: impl Into<PathBuf>) -> Self {
        Self { test_id, credentials: CredentialPaths::in_dir(dir.into()), ..Default::default() }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        Validate::validate(self)?;

        if self.credentials.token == self.credentials.ca_cert {
            return Err(ConfigError::Invalid(
                "Token and CA certificate paths cannot be the same".to_string(),
            ));
        }
        if self.credentials.token.as_os_str().is_empty()
            || self.credentials.ca_cert.as_os_str().is_empty()
        {
            return Err(ConfigError::Invalid("Credential paths cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Fixture file locations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// File holding the proxy's subject token
    pub subject_token_path: Option<PathBuf>,
    /// Discovery server certificate chain
    pub server_cert_path: Option<PathBuf>,
    /// Discovery server private key
    pub server_key_path: Option<PathBuf>,
    /// CA certificate that signed the server certificate
    pub ca_cert_path: Option<PathBuf>,
}

/// STS readiness probe configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProbeConfig {
    /// Attempts before the flow is reported as not ready; zero skips probing
    #[validate(range(max = 10000, message = "Probe attempts cannot exceed 10000"))]
    pub max_attempts: u32,

    /// Pause between attempts in milliseconds
    #[validate(range(min = 1, max = 60000, message = "Probe interval must be between 1 and 60000 ms"))]
    pub interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, interval_ms: 100 }
    }
}

impl ProbeConfig {
    pub fn budget(&self) -> ProbeBudget {
        ProbeBudget::new(self.max_attempts, Duration::from_millis(self.interval_ms))
    }
}

/// Discovery server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// How long a graceful stop waits for open streams before cancelling them
    #[validate(range(min = 1, max = 60000, message = "Drain timeout must be between 1 and 60000 ms"))]
    pub drain_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { drain_timeout_ms: 2000 }
    }
}

impl DiscoveryConfig {
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Proxy launch configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ProxyConfig {
    /// Whether setup starts the proxy
    pub mode: ProxyMode,

    /// Proxy binary name or path
    #[validate(length(min = 1, message = "Proxy binary cannot be empty"))]
    pub binary: String,

    /// Proxy log level (`-l`)
    #[validate(custom(function = "validate_envoy_log_level"))]
    pub log_level: String,

    /// Node identifier in the bootstrap
    #[validate(length(min = 1, message = "Node id cannot be empty"))]
    pub node_id: String,

    /// Bootstrap template file; the bundled template is used when unset
    pub bootstrap_template: Option<PathBuf>,

    /// Admin readiness attempts after spawning the proxy
    #[validate(range(min = 1, message = "Proxy readiness attempts must be at least 1"))]
    pub ready_attempts: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            mode: ProxyMode::default(),
            binary: "envoy".to_string(),
            log_level: "warn".to_string(),
            node_id: "sts-flow-proxy".to_string(),
            bootstrap_template: None,
            ready_attempts: 100,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter level when `RUST_LOG` is unset
    #[validate(custom(function = "validate_log_level"))]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

fn validate_log_level(level: &str) -> Result<(), validator::ValidationError> {
    if LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_log_level"))
    }
}

fn validate_envoy_log_level(level: &str) -> Result<(), validator::ValidationError> {
    if ENVOY_LOG_LEVELS.contains(&level) {
        Ok(())
    } else {
        Err(validator::ValidationError::new("invalid_envoy_log_level"))
    }
}
