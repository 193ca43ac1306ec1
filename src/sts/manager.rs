use std::sync::Arc;

use tracing::debug;

use super::plugin::TokenExchangePlugin;
use super::{StsRequestParameters, StsResponse};
use crate::errors::StsError;

/// Token manager configuration
#[derive(Debug, Clone)]
pub struct TokenManagerConfig {
    pub trust_domain: String,
}

/// Routes validated STS requests to the installed exchange plugin
#[derive(Debug)]
pub struct TokenManager {
    config: TokenManagerConfig,
    plugin: Option<Arc<dyn TokenExchangePlugin>>,
}

impl TokenManager {
    pub fn new(config: TokenManagerConfig) -> Result<Self, StsError> {
        if config.trust_domain.is_empty() {
            return Err(StsError::InvalidConfig("token manager trust domain cannot be empty".into()));
        }
        Ok(Self { config, plugin: None })
    }

    pub fn set_plugin(&mut self, plugin: Arc<dyn TokenExchangePlugin>) {
        self.plugin = Some(plugin);
    }

    pub fn trust_domain(&self) -> &str {
        &self.config.trust_domain
    }

    pub async fn generate_token(&self, request: &StsRequestParameters) -> Result<StsResponse, StsError> {
        let plugin = self.plugin.as_ref().ok_or(StsError::PluginMissing)?;
        debug!(trust_domain = %self.config.trust_domain, "Delegating token exchange to plugin");
        plugin.exchange_token(request).await
    }
}
