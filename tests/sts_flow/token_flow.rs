//! Token exchange through the STS server and the mock auth backend

use std::time::Duration;

use axum::http::StatusCode;
use sts_flow_harness::auth_backend::FAKE_ACCESS_TOKEN;
use sts_flow_harness::probe::{wait_for_sts_flow_ready, TokenExchangeRequest};
use sts_flow_harness::sts::{StsResponse, ACCESS_TOKEN_TYPE};
use sts_flow_harness::{ProbeBudget, ProbeOutcome};

use crate::common::{post_token, TestEnv};

#[tokio::test]
async fn test_201_token_exchange_returns_access_token() {
    let mut t = TestEnv::start(201).await.unwrap();
    assert!(t.env.readiness().is_ready(), "readiness: {:?}", t.env.readiness());

    let body = TokenExchangeRequest::new(t.env.fixtures().subject_token.clone()).encode();
    let response = post_token(t.env.sts_address(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(reqwest::header::CONTENT_TYPE).unwrap(),
        "application/json"
    );

    let token: StsResponse = response.json().await.unwrap();
    assert_eq!(token.access_token, FAKE_ACCESS_TOKEN);
    assert_eq!(token.issued_token_type, ACCESS_TOKEN_TYPE);
    assert_eq!(token.token_type, "Bearer");
    assert!(token.expires_in > 0 && token.expires_in <= 3600, "expires_in {}", token.expires_in);

    let backend = t.env.auth_backend().unwrap();
    assert!(backend.num_federated_token_calls() >= 2);
    assert!(backend.num_access_token_calls() >= 2);

    assert!(t.env.tear_down().await.is_clean());
}

#[tokio::test]
async fn test_202_mismatched_subject_token_never_probes_ready() {
    let mut t = TestEnv::start(202).await.unwrap();

    let outcome = wait_for_sts_flow_ready(
        t.env.sts_address(),
        "not-the-configured-subject-token",
        ProbeBudget::new(3, Duration::from_millis(20)),
    )
    .await
    .unwrap();
    match outcome {
        ProbeOutcome::TimedOut { attempts, last_error } => {
            assert_eq!(attempts, 3);
            assert!(last_error.is_some());
        }
        other => panic!("expected timeout, got {other:?}"),
    }

    let body = TokenExchangeRequest::new("not-the-configured-subject-token").encode();
    let response = post_token(t.env.sts_address(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "invalid_target");

    t.env.tear_down().await;
}

#[tokio::test]
async fn test_203_injected_backend_failure_is_server_error() {
    let mut t = TestEnv::start(203).await.unwrap();
    t.env
        .auth_backend()
        .unwrap()
        .set_access_token_error(Some(StatusCode::SERVICE_UNAVAILABLE));

    let body = TokenExchangeRequest::new(t.env.fixtures().subject_token.clone()).encode();
    let response = post_token(t.env.sts_address(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "server_error");

    t.env.auth_backend().unwrap().set_access_token_error(None);
    let body = TokenExchangeRequest::new(t.env.fixtures().subject_token.clone()).encode();
    let response = post_token(t.env.sts_address(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    t.env.tear_down().await;
}

#[tokio::test]
async fn test_204_unsupported_grant_type_is_invalid_request() {
    let mut t = TestEnv::start(204).await.unwrap();
    let calls_before = t.env.auth_backend().unwrap().num_federated_token_calls();

    let response = post_token(t.env.sts_address(), "grant_type=password".to_string()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let error: serde_json::Value = response.json().await.unwrap();
    assert_eq!(error["error"], "invalid_request");

    assert_eq!(t.env.auth_backend().unwrap().num_federated_token_calls(), calls_before);
    t.env.tear_down().await;
}

#[tokio::test]
async fn test_205_setup_continues_without_readiness() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = crate::common::harness_config(205, dir.path());
    config.probe.max_attempts = 0;

    let mut t = TestEnv::start_with(config, dir).await.unwrap();
    assert_eq!(t.env.readiness(), &ProbeOutcome::TimedOut { attempts: 0, last_error: None });

    // Every service is still up even though nothing was probed.
    let body = TokenExchangeRequest::new(t.env.fixtures().subject_token.clone()).encode();
    let response = post_token(t.env.sts_address(), body).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    crate::common::open_ads_stream(&t.env, Some(FAKE_ACCESS_TOKEN)).await.unwrap();

    t.env.tear_down().await;
}

#[tokio::test]
async fn test_217_backend_lifetime_and_federated_failures_reach_sts_clients() {
    let mut t = TestEnv::start(217).await.unwrap();
    let subject_token = t.env.fixtures().subject_token.clone();
    let backend = t.env.auth_backend().unwrap();

    backend.set_token_lifetime(Duration::from_secs(600));
    let response =
        post_token(t.env.sts_address(), TokenExchangeRequest::new(subject_token.clone()).encode())
            .await
            .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let token: StsResponse = response.json().await.unwrap();
    assert!(token.expires_in > 590 && token.expires_in <= 600, "expires_in {}", token.expires_in);

    for (injected, expected) in [
        (StatusCode::FORBIDDEN, (StatusCode::BAD_REQUEST, "invalid_target")),
        (StatusCode::BAD_GATEWAY, (StatusCode::INTERNAL_SERVER_ERROR, "server_error")),
    ] {
        backend.set_federated_token_error(Some(injected));
        let access_calls = backend.num_access_token_calls();

        let response =
            post_token(t.env.sts_address(), TokenExchangeRequest::new(subject_token.clone()).encode())
                .await
                .unwrap();
        assert_eq!(response.status(), expected.0, "injected {injected}");
        let error: serde_json::Value = response.json().await.unwrap();
        assert_eq!(error["error"], expected.1, "injected {injected}");
        // The exchange stops at the failed federated call.
        assert_eq!(backend.num_access_token_calls(), access_calls);
    }

    backend.set_federated_token_error(None);
    let response = post_token(t.env.sts_address(), TokenExchangeRequest::new(subject_token).encode())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    t.env.tear_down().await;
}
