//! # Token exchange service
//!
//! The STS server the proxy calls to trade its subject token for an access
//! token. It is assembled from three parts:
//!
//! - [`GoogleTokenExchangePlugin`] talks to the federated token and access
//!   token endpoints of the auth backend
//! - [`TokenManager`] routes validated requests to the installed plugin
//! - [`StsServer`] serves the OAuth 2.0 token exchange endpoint at [`TOKEN_PATH`]
//!
//! [`start_sts_server`] wires them together against a running auth backend.

pub mod manager;
pub mod plugin;
pub mod server;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

pub use manager::{TokenManager, TokenManagerConfig};
pub use plugin::{GoogleTokenExchangePlugin, TokenExchangePlugin};
pub use server::{StsServer, StsServerConfig};

use crate::auth_backend::{ACCESS_TOKEN_PATH_PREFIX, FEDERATED_TOKEN_PATH};
use crate::errors::StsError;

/// Path of the token exchange endpoint
pub const TOKEN_PATH: &str = "/token";

/// Content type of token exchange requests
pub const URL_ENCODED_FORM: &str = "application/x-www-form-urlencoded";

pub const TOKEN_EXCHANGE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
pub const SUBJECT_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:jwt";
pub const ACCESS_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Trust domain used by the fake token flow
pub const FAKE_TRUST_DOMAIN: &str = "FakeTrustDomain";

/// Project number used by the fake token flow
pub const FAKE_PROJECT_NUMBER: &str = "1234567";

/// Form parameters of an RFC 8693 token exchange request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StsRequestParameters {
    pub grant_type: String,
    pub resource: String,
    pub audience: String,
    pub scope: String,
    pub requested_token_type: String,
    pub subject_token: String,
    pub subject_token_type: String,
    pub actor_token: String,
    pub actor_token_type: String,
}

/// Successful token exchange response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StsResponse {
    pub access_token: String,
    pub issued_token_type: String,
    pub token_type: String,
    pub expires_in: i64,
}

/// Access token endpoint for a project on the given backend
pub fn access_token_endpoint(backend_url: &str, project_number: &str) -> String {
    format!(
        "{backend_url}{ACCESS_TOKEN_PATH_PREFIX}service-{project_number}@gcp-sa-meshdataplane.iam.gserviceaccount.com:generateAccessToken"
    )
}

/// Build the plugin and token manager against `backend_url` and serve the STS
/// endpoint on `listener`
pub fn start_sts_server(
    listener: TcpListener,
    backend_url: &str,
    trust_domain: &str,
    project_number: &str,
) -> Result<StsServer, StsError> {
    let mut plugin = GoogleTokenExchangePlugin::new(trust_domain, project_number)?;
    plugin.set_endpoints(
        format!("{backend_url}{FEDERATED_TOKEN_PATH}"),
        access_token_endpoint(backend_url, project_number),
    );

    let mut manager = TokenManager::new(TokenManagerConfig { trust_domain: trust_domain.to_string() })?;
    manager.set_plugin(std::sync::Arc::new(plugin));

    let server = StsServer::start(StsServerConfig { listener }, manager)?;
    info!(addr = %server.addr(), backend = backend_url, trust_domain, "Token exchange service ready");
    Ok(server)
}
