//! Token exchange plugin that trades a subject token for an access token via
//! the Google federated token and IAM credentials endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::{StsRequestParameters, StsResponse, ACCESS_TOKEN_TYPE, CLOUD_PLATFORM_SCOPE};
use crate::errors::StsError;
use crate::google::{
    AccessTokenRequest, AccessTokenResponse, FederatedTokenRequest, FederatedTokenResponse,
    ACCESS_TOKEN_LIFETIME,
};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Exchanges a validated STS request for an access token
#[async_trait]
pub trait TokenExchangePlugin: Send + Sync + std::fmt::Debug {
    async fn exchange_token(&self, request: &StsRequestParameters) -> Result<StsResponse, StsError>;
}

#[derive(Debug, Clone)]
struct Endpoints {
    federated_token: String,
    access_token: String,
}

/// Plugin speaking the Google STS and IAM credentials protocols
#[derive(Debug)]
pub struct GoogleTokenExchangePlugin {
    trust_domain: String,
    project_number: String,
    cluster_url: String,
    endpoints: Option<Endpoints>,
    client: reqwest::Client,
}

impl GoogleTokenExchangePlugin {
    pub fn new(
        trust_domain: impl Into<String>,
        project_number: impl Into<String>,
    ) -> Result<Self, StsError> {
        let trust_domain = trust_domain.into();
        let project_number = project_number.into();
        if trust_domain.is_empty() {
            return Err(StsError::InvalidConfig("trust domain cannot be empty".into()));
        }
        if project_number.is_empty() {
            return Err(StsError::InvalidConfig("project number cannot be empty".into()));
        }

        let client = reqwest::Client::builder().no_proxy().timeout(UPSTREAM_TIMEOUT).build()?;
        let cluster_url = format!(
            "https://container.googleapis.com/v1/projects/{project_number}/locations/local/clusters/sts-flow"
        );

        Ok(Self { trust_domain, project_number, cluster_url, endpoints: None, client })
    }

    /// Override the cluster URL embedded in the federated token audience
    pub fn with_cluster_url(mut self, cluster_url: impl Into<String>) -> Self {
        self.cluster_url = cluster_url.into();
        self
    }

    /// Point the plugin at the federated token and access token endpoints
    pub fn set_endpoints(&mut self, federated_token: impl Into<String>, access_token: impl Into<String>) {
        self.endpoints = Some(Endpoints {
            federated_token: federated_token.into(),
            access_token: access_token.into(),
        });
    }

    fn federated_audience(&self) -> String {
        format!("identitynamespace:{}:{}", self.trust_domain, self.cluster_url)
    }

    async fn post_json<Req, Resp>(
        &self,
        endpoint: &str,
        bearer: Option<&str>,
        body: &Req,
    ) -> Result<Resp, StsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let upstream = |status: Option<u16>, message: String| StsError::Upstream {
            endpoint: endpoint.to_string(),
            status,
            message,
        };

        let mut request = self.client.post(endpoint).json(body);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| upstream(None, e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!(endpoint, status = status.as_u16(), "Upstream token endpoint rejected request");
            return Err(upstream(Some(status.as_u16()), message));
        }

        response.json::<Resp>().await.map_err(|e| upstream(Some(status.as_u16()), e.to_string()))
    }
}

#[async_trait]
impl TokenExchangePlugin for GoogleTokenExchangePlugin {
    #[instrument(
        skip(self, request),
        fields(trust_domain = %self.trust_domain, project_number = %self.project_number)
    )]
    async fn exchange_token(&self, request: &StsRequestParameters) -> Result<StsResponse, StsError> {
        let endpoints = self.endpoints.as_ref().ok_or(StsError::EndpointsMissing)?;

        let federated: FederatedTokenResponse = self
            .post_json(
                &endpoints.federated_token,
                None,
                &FederatedTokenRequest {
                    audience: self.federated_audience(),
                    grant_type: request.grant_type.clone(),
                    requested_token_type: ACCESS_TOKEN_TYPE.to_string(),
                    scope: CLOUD_PLATFORM_SCOPE.to_string(),
                    subject_token: request.subject_token.clone(),
                    subject_token_type: request.subject_token_type.clone(),
                },
            )
            .await?;
        debug!(expires_in = federated.expires_in, "Obtained federated token");

        let access: AccessTokenResponse = self
            .post_json(
                &endpoints.access_token,
                Some(&federated.access_token),
                &AccessTokenRequest {
                    delegates: Vec::new(),
                    scope: vec![CLOUD_PLATFORM_SCOPE.to_string()],
                    lifetime: ACCESS_TOKEN_LIFETIME.to_string(),
                },
            )
            .await?;

        let expire_time = DateTime::parse_from_rfc3339(&access.expire_time).map_err(|e| {
            StsError::Upstream {
                endpoint: endpoints.access_token.clone(),
                status: None,
                message: format!("invalid expireTime {:?}: {}", access.expire_time, e),
            }
        })?;
        let expires_in = (expire_time.with_timezone(&Utc) - Utc::now()).num_seconds().max(0);

        Ok(StsResponse {
            access_token: access.access_token,
            issued_token_type: ACCESS_TOKEN_TYPE.to_string(),
            token_type: "Bearer".to_string(),
            expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sts::{SUBJECT_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE};

    fn params() -> StsRequestParameters {
        StsRequestParameters {
            grant_type: TOKEN_EXCHANGE_GRANT_TYPE.to_string(),
            subject_token: "subject".to_string(),
            subject_token_type: SUBJECT_TOKEN_TYPE.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rejects_empty_trust_domain() {
        let err = GoogleTokenExchangePlugin::new("", "1234567").unwrap_err();
        assert!(matches!(err, StsError::InvalidConfig(_)));
    }

    #[test]
    fn test_audience_embeds_trust_domain() {
        let plugin = GoogleTokenExchangePlugin::new("FakeTrustDomain", "1234567")
            .unwrap()
            .with_cluster_url("https://cluster.example");
        assert_eq!(plugin.federated_audience(), "identitynamespace:FakeTrustDomain:https://cluster.example");
    }

    #[tokio::test]
    async fn test_exchange_requires_endpoints() {
        let plugin = GoogleTokenExchangePlugin::new("FakeTrustDomain", "1234567").unwrap();
        let err = plugin.exchange_token(&params()).await.unwrap_err();
        assert!(matches!(err, StsError::EndpointsMissing));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut plugin = GoogleTokenExchangePlugin::new("FakeTrustDomain", "1234567").unwrap();
        plugin.set_endpoints(
            format!("http://127.0.0.1:{port}/v1/identitybindingtoken"),
            format!("http://127.0.0.1:{port}/v1/projects/-/serviceAccounts/x:generateAccessToken"),
        );

        let err = plugin.exchange_token(&params()).await.unwrap_err();
        assert!(matches!(err, StsError::Upstream { status: None, .. }));
        assert!(!err.is_upstream_rejection());
    }
}
