use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::manager::TokenManager;
use super::{StsRequestParameters, StsResponse, SUBJECT_TOKEN_TYPE, TOKEN_EXCHANGE_GRANT_TYPE, TOKEN_PATH};
use crate::errors::StsError;
use crate::service::{ServiceTask, StopOutcome};

/// STS server configuration
#[derive(Debug)]
pub struct StsServerConfig {
    /// Listener bound to the `sts` port
    pub listener: TcpListener,
}

#[derive(Debug)]
enum TokenEndpointError {
    InvalidRequest(String),
    InvalidTarget(String),
    ServerError(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

impl From<StsError> for TokenEndpointError {
    fn from(err: StsError) -> Self {
        match err {
            StsError::InvalidRequest(msg) => Self::InvalidRequest(msg),
            err if err.is_upstream_rejection() => Self::InvalidTarget(err.to_string()),
            err => Self::ServerError(err.to_string()),
        }
    }
}

impl IntoResponse for TokenEndpointError {
    fn into_response(self) -> Response {
        let (status, error, error_description) = match self {
            Self::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            Self::InvalidTarget(msg) => (StatusCode::BAD_REQUEST, "invalid_target", msg),
            Self::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error", msg),
        };
        (status, Json(ErrorBody { error, error_description })).into_response()
    }
}

fn validate(params: &StsRequestParameters) -> Result<(), StsError> {
    if params.grant_type != TOKEN_EXCHANGE_GRANT_TYPE {
        return Err(StsError::InvalidRequest(format!(
            "unsupported grant_type {:?}",
            params.grant_type
        )));
    }
    if params.subject_token_type != SUBJECT_TOKEN_TYPE {
        return Err(StsError::InvalidRequest(format!(
            "unsupported subject_token_type {:?}",
            params.subject_token_type
        )));
    }
    if params.subject_token.is_empty() {
        return Err(StsError::InvalidRequest("subject_token is required".into()));
    }
    Ok(())
}

async fn token_handler(
    State(manager): State<Arc<TokenManager>>,
    form: Result<Form<StsRequestParameters>, FormRejection>,
) -> Result<Json<StsResponse>, TokenEndpointError> {
    let Form(params) = form.map_err(|rejection| TokenEndpointError::InvalidRequest(rejection.body_text()))?;
    validate(&params).inspect_err(|e| warn!(error = %e, "Rejecting token exchange request"))?;

    match manager.generate_token(&params).await {
        Ok(response) => {
            info!(expires_in = response.expires_in, "Token exchange succeeded");
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Token exchange failed");
            Err(e.into())
        }
    }
}

/// STS token endpoint router
pub fn router(manager: Arc<TokenManager>) -> Router {
    Router::new()
        .route(TOKEN_PATH, post(token_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Handle to a running STS server
#[derive(Debug)]
pub struct StsServer {
    task: ServiceTask,
}

impl StsServer {
    pub fn start(config: StsServerConfig, manager: TokenManager) -> Result<Self, StsError> {
        let task = ServiceTask::spawn_http("sts", config.listener, router(Arc::new(manager)))
            .map_err(|source| StsError::Serve { addr: None, source })?;
        info!(addr = %task.addr(), path = TOKEN_PATH, "STS server started");
        Ok(Self { task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.task.addr()
    }

    /// Stop the server, aborting it if it does not finish within `grace`.
    /// Later calls are no-ops.
    pub async fn stop(&mut self, grace: Duration) -> Result<(), StsError> {
        match self.task.stop(grace).await {
            StopOutcome::Aborted => Err(StsError::StopTimeout { addr: self.addr(), grace }),
            StopOutcome::Stopped | StopOutcome::AlreadyExited => {
                info!(addr = %self.addr(), "STS server stopped");
                Ok(())
            }
            StopOutcome::Idle => Ok(()),
        }
    }
}
