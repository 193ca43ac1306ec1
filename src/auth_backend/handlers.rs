use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use super::{BackendState, FAKE_FEDERATED_TOKEN};
use crate::google::{
    AccessTokenRequest, AccessTokenResponse, FederatedTokenRequest, FederatedTokenResponse,
    OAuthError, ISSUED_TOKEN_TYPE,
};

const GENERATE_ACCESS_TOKEN_SUFFIX: &str = ":generateAccessToken";

#[derive(Debug)]
pub(super) enum BackendError {
    Unauthorized(String),
    NotFound(String),
    Injected(StatusCode),
}

impl IntoResponse for BackendError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            BackendError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, OAuthError::new("invalid_grant", msg))
            }
            BackendError::NotFound(msg) => (StatusCode::NOT_FOUND, OAuthError::new("not_found", msg)),
            BackendError::Injected(status) => {
                (status, OAuthError::new("injected_error", format!("Injected failure {}", status)))
            }
        };
        (status, Json(body)).into_response()
    }
}

pub(super) async fn federated_token(
    State(state): State<Arc<BackendState>>,
    Json(request): Json<FederatedTokenRequest>,
) -> Result<Json<FederatedTokenResponse>, BackendError> {
    state.record_federated_call();

    if let Some(status) = state.federated_token_error() {
        warn!(%status, "Returning injected federated token failure");
        return Err(BackendError::Injected(status));
    }

    if request.subject_token != state.subject_token {
        warn!(audience = %request.audience, "Rejecting federated token request with unexpected subject token");
        return Err(BackendError::Unauthorized("subject token does not match".to_string()));
    }

    debug!(audience = %request.audience, scope = %request.scope, "Issuing federated token");
    Ok(Json(FederatedTokenResponse {
        access_token: FAKE_FEDERATED_TOKEN.to_string(),
        issued_token_type: ISSUED_TOKEN_TYPE.to_string(),
        token_type: "Bearer".to_string(),
        expires_in: i64::try_from(state.token_lifetime().as_secs()).unwrap_or(i64::MAX),
    }))
}

pub(super) async fn generate_access_token(
    State(state): State<Arc<BackendState>>,
    Path(account): Path<String>,
    headers: HeaderMap,
    Json(request): Json<AccessTokenRequest>,
) -> Result<Json<AccessTokenResponse>, BackendError> {
    let Some(service_account) = account.strip_suffix(GENERATE_ACCESS_TOKEN_SUFFIX) else {
        return Err(BackendError::NotFound(format!("unknown method on {account}")));
    };
    state.record_access_call();

    if let Some(status) = state.access_token_error() {
        warn!(%status, "Returning injected access token failure");
        return Err(BackendError::Injected(status));
    }

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    if bearer != Some(FAKE_FEDERATED_TOKEN) {
        warn!(service_account, "Rejecting access token request without the federated token");
        return Err(BackendError::Unauthorized("federated token required".to_string()));
    }

    let expire_time = chrono::Duration::from_std(state.token_lifetime())
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    debug!(service_account, scopes = ?request.scope, "Issuing access token");
    Ok(Json(AccessTokenResponse {
        access_token: state.access_token.clone(),
        expire_time: expire_time.to_rfc3339_opts(SecondsFormat::Secs, true),
    }))
}
