//! # Configuration Management
//!
//! Harness configuration comes from built-in defaults, an optional YAML file
//! and `STS_HARNESS_*` environment variables, applied in that order.

mod settings;

use std::path::{Path, PathBuf};
use std::str::FromStr;

pub use settings::{
    DiscoveryConfig, FixtureConfig, HarnessConfig, LoggingConfig, ProbeConfig, ProxyConfig,
};

use crate::errors::ConfigError;

/// Prefix shared by every environment override
pub const ENV_PREFIX: &str = "STS_HARNESS_";

impl HarnessConfig {
    /// Create configuration from defaults and environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from defaults and a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let mut config: Self = serde_yaml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overwrite fields for every `STS_HARNESS_*` variable the lookup knows
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some(v) = var("TEST_ID") {
            self.test_id = parse(v)?;
        }
        if let Some((_, v)) = var("TRUST_DOMAIN") {
            self.trust_domain = v;
        }
        if let Some((_, v)) = var("PROJECT_NUMBER") {
            self.project_number = v;
        }
        if let Some((_, v)) = var("TOKEN_PATH") {
            self.credentials.token = PathBuf::from(v);
        }
        if let Some((_, v)) = var("CA_CERT_PATH") {
            self.credentials.ca_cert = PathBuf::from(v);
        }
        if let Some((_, v)) = var("SUBJECT_TOKEN_FILE") {
            self.fixtures.subject_token_path = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("SERVER_CERT_FILE") {
            self.fixtures.server_cert_path = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("SERVER_KEY_FILE") {
            self.fixtures.server_key_path = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("CA_CERT_FILE") {
            self.fixtures.ca_cert_path = Some(PathBuf::from(v));
        }
        if let Some(v) = var("PROBE_ATTEMPTS") {
            self.probe.max_attempts = parse(v)?;
        }
        if let Some(v) = var("PROBE_INTERVAL_MS") {
            self.probe.interval_ms = parse(v)?;
        }
        if let Some(v) = var("DRAIN_TIMEOUT_MS") {
            self.discovery.drain_timeout_ms = parse(v)?;
        }
        if let Some(v) = var("PROXY_MODE") {
            self.proxy.mode = parse(v)?;
        }
        if let Some((_, v)) = var("ENVOY_BINARY") {
            self.proxy.binary = v;
        }
        if let Some((_, v)) = var("ENVOY_LOG_LEVEL") {
            self.proxy.log_level = v;
        }
        if let Some((_, v)) = var("BOOTSTRAP_TEMPLATE") {
            self.proxy.bootstrap_template = Some(PathBuf::from(v));
        }
        if let Some((_, v)) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            self.logging.json = parse(v)?;
        }
        Ok(())
    }
}

fn parse<T: FromStr>((name, value): (String, String)) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvVar { name, value })
}
