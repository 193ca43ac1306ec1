//! Readiness probing
//!
//! [`probe`] is a bounded retry loop over an async check. The STS flow probe
//! sends one fixed token-exchange request to the STS server until it answers
//! `200` with a JSON body or the attempt budget runs out.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, warn};

use crate::errors::StsError;
use crate::sts::{
    ACCESS_TOKEN_TYPE, CLOUD_PLATFORM_SCOPE, SUBJECT_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE,
    TOKEN_PATH, URL_ENCODED_FORM,
};

/// Default number of probe attempts
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;

/// Default pause between probe attempts
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a probe may keep trying
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ProbeBudget {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, interval: DEFAULT_INTERVAL }
    }
}

impl ProbeBudget {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }
}

/// Result of a bounded probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The check succeeded on attempt number `attempts`
    Ready { attempts: u32 },
    /// Every attempt failed
    TimedOut { attempts: u32, last_error: Option<String> },
}

impl ProbeOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, ProbeOutcome::Ready { .. })
    }
}

/// Run `attempt` until it succeeds or the budget is spent, sleeping
/// `budget.interval` between failed attempts
pub async fn probe<F, Fut, E>(budget: ProbeBudget, mut attempt: F) -> ProbeOutcome
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut last_error = None;

    for n in 1..=budget.max_attempts {
        match attempt().await {
            Ok(()) => return ProbeOutcome::Ready { attempts: n },
            Err(e) => {
                debug!(attempt = n, max_attempts = budget.max_attempts, error = %e, "Probe attempt failed");
                last_error = Some(e.to_string());
            }
        }
        if n < budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }

    ProbeOutcome::TimedOut { attempts: budget.max_attempts, last_error }
}

/// The fixed token exchange request used to probe the STS flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenExchangeRequest {
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

impl TokenExchangeRequest {
    pub fn new(subject_token: impl Into<String>) -> Self {
        Self {
            grant_type: TOKEN_EXCHANGE_GRANT_TYPE.to_string(),
            resource: "https//:backend.example.com".to_string(),
            audience: "audience".to_string(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            requested_token_type: ACCESS_TOKEN_TYPE.to_string(),
            subject_token: subject_token.into(),
            subject_token_type: SUBJECT_TOKEN_TYPE.to_string(),
            actor_token: String::new(),
            actor_token_type: String::new(),
        }
    }

    /// Form-encode the request with a stable field order
    pub fn encode(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", &self.grant_type)
            .append_pair("resource", &self.resource)
            .append_pair("audience", &self.audience)
            .append_pair("scope", &self.scope)
            .append_pair("requested_token_type", &self.requested_token_type)
            .append_pair("subject_token", &self.subject_token)
            .append_pair("subject_token_type", &self.subject_token_type)
            .append_pair("actor_token", &self.actor_token)
            .append_pair("actor_token_type", &self.actor_token_type)
            .finish()
    }
}

/// Probe for the STS token endpoint
#[derive(Debug, Clone)]
pub struct StsFlowProbe {
    client: reqwest::Client,
    url: String,
    body: String,
}

impl StsFlowProbe {
    pub fn new(sts_addr: SocketAddr, request: &TokenExchangeRequest) -> Result<Self, StsError> {
        let client = reqwest::Client::builder().no_proxy().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, url: format!("http://{sts_addr}{TOKEN_PATH}"), body: request.encode() })
    }

    /// Issue the request once; succeed on `200` with an `application/json` body
    pub async fn check(&self) -> Result<(), String> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, URL_ENCODED_FORM)
            .body(self.body.clone())
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("unexpected status {status}"));
        }

        let content_type = response.headers().get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        if content_type != Some("application/json") {
            return Err(format!("unexpected content type {content_type:?}"));
        }
        Ok(())
    }

    pub async fn wait_ready(&self, budget: ProbeBudget) -> ProbeOutcome {
        probe(budget, || self.check()).await
    }
}

/// Poll the STS server at `sts_addr` until the token flow works end to end
pub async fn wait_for_sts_flow_ready(
    sts_addr: SocketAddr,
    subject_token: &str,
    budget: ProbeBudget,
) -> Result<ProbeOutcome, StsError> {
    let probe = StsFlowProbe::new(sts_addr, &TokenExchangeRequest::new(subject_token))?;
    let outcome = probe.wait_ready(budget).await;

    match &outcome {
        ProbeOutcome::Ready { attempts } => info!(%sts_addr, attempts, "STS flow is ready"),
        ProbeOutcome::TimedOut { attempts, last_error } => {
            warn!(%sts_addr, attempts, last_error = ?last_error, "STS flow did not become ready")
        }
    }
    Ok(outcome)
}
