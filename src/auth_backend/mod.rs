//! # Mock OAuth token backend
//!
//! Stands in for the Google STS and IAM credentials endpoints the token
//! exchange plugin calls. It issues [`FAKE_FEDERATED_TOKEN`] for the configured
//! subject token and then the configured access token for requests that carry
//! the federated token.

mod handlers;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::errors::AuthBackendError;
use crate::service::{ServiceTask, StopOutcome};

/// Federated token issued in exchange for the subject token
pub const FAKE_FEDERATED_TOKEN: &str = "FakeFederatedToken";

/// Default access token issued for the federated token
pub const FAKE_ACCESS_TOKEN: &str = "FakeAccessToken";

/// Federated token endpoint path
pub const FEDERATED_TOKEN_PATH: &str = "/v1/identitybindingtoken";

/// Prefix of the access token endpoint; the service account and the
/// `:generateAccessToken` method follow
pub const ACCESS_TOKEN_PATH_PREFIX: &str = "/v1/projects/-/serviceAccounts/";

const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Tokens the backend expects and issues
#[derive(Debug, Clone)]
pub struct AuthBackendConfig {
    /// Subject token the federated endpoint accepts
    pub subject_token: String,
    /// Access token handed out by the access token endpoint
    pub access_token: String,
}

impl AuthBackendConfig {
    pub fn new(subject_token: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self { subject_token: subject_token.into(), access_token: access_token.into() }
    }

    fn validate(&self) -> Result<(), AuthBackendError> {
        if self.subject_token.is_empty() {
            return Err(AuthBackendError::InvalidConfig("subject token cannot be empty".into()));
        }
        if self.access_token.is_empty() {
            return Err(AuthBackendError::InvalidConfig("access token cannot be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct BackendState {
    subject_token: String,
    access_token: String,
    federated_error: Mutex<Option<StatusCode>>,
    access_error: Mutex<Option<StatusCode>>,
    token_lifetime: Mutex<Duration>,
    federated_calls: AtomicUsize,
    access_calls: AtomicUsize,
}

impl BackendState {
    fn new(config: AuthBackendConfig) -> Self {
        Self {
            subject_token: config.subject_token,
            access_token: config.access_token,
            federated_error: Mutex::new(None),
            access_error: Mutex::new(None),
            token_lifetime: Mutex::new(DEFAULT_TOKEN_LIFETIME),
            federated_calls: AtomicUsize::new(0),
            access_calls: AtomicUsize::new(0),
        }
    }

    fn federated_token_error(&self) -> Option<StatusCode> {
        *self.federated_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn access_token_error(&self) -> Option<StatusCode> {
        *self.access_error.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token_lifetime(&self) -> Duration {
        *self.token_lifetime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_federated_call(&self) {
        self.federated_calls.fetch_add(1, Ordering::Relaxed);
    }

    fn record_access_call(&self) {
        self.access_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Build the backend router over shared state
fn router(state: Arc<BackendState>) -> Router {
    Router::new()
        .route(FEDERATED_TOKEN_PATH, post(handlers::federated_token))
        .route(
            &format!("{ACCESS_TOKEN_PATH_PREFIX}{{account}}"),
            post(handlers::generate_access_token),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle to a running mock token backend
#[derive(Debug)]
pub struct AuthBackend {
    state: Arc<BackendState>,
    task: ServiceTask,
}

impl AuthBackend {
    /// Start serving on an already bound listener
    pub fn start(config: AuthBackendConfig, listener: TcpListener) -> Result<Self, AuthBackendError> {
        config.validate()?;
        let state = Arc::new(BackendState::new(config));
        let task = ServiceTask::spawn_http("auth-backend", listener, router(state.clone()))
            .map_err(|source| AuthBackendError::Serve { addr: None, source })?;

        info!(addr = %task.addr(), "Auth backend started");
        Ok(Self { state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.task.addr()
    }

    /// Base URL the token exchange plugin is pointed at
    pub fn url(&self) -> String {
        format!("http://{}", self.task.addr())
    }

    /// Signal the backend to stop without waiting.
    ///
    /// Returns an error if the serve task had already died; later calls are no-ops.
    pub fn stop(&mut self) -> Result<(), AuthBackendError> {
        let exited = self.task.has_exited();
        if !self.task.signal_stop() {
            return Ok(());
        }
        if exited {
            return Err(AuthBackendError::ExitedEarly { addr: self.addr() });
        }
        info!(addr = %self.addr(), "Auth backend stop requested");
        Ok(())
    }

    /// Stop and wait up to `grace` for the serve task to finish
    pub async fn shutdown(&mut self, grace: Duration) -> Result<(), AuthBackendError> {
        self.stop()?;
        if self.task.stop(grace).await == StopOutcome::Aborted {
            info!(addr = %self.addr(), "Auth backend aborted after grace period");
        }
        Ok(())
    }

    /// Make the federated endpoint answer with `status`, or clear the injection
    pub fn set_federated_token_error(&self, status: Option<StatusCode>) {
        *self.state.federated_error.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Make the access token endpoint answer with `status`, or clear the injection
    pub fn set_access_token_error(&self, status: Option<StatusCode>) {
        *self.state.access_error.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Lifetime reported for issued tokens
    pub fn set_token_lifetime(&self, lifetime: Duration) {
        *self.state.token_lifetime.lock().unwrap_or_else(PoisonError::into_inner) = lifetime;
    }

    pub fn num_federated_token_calls(&self) -> usize {
        self.state.federated_calls.load(Ordering::Relaxed)
    }

    pub fn num_access_token_calls(&self) -> usize {
        self.state.access_calls.load(Ordering::Relaxed)
    }
}
