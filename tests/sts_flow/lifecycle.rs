//! Setup failures, teardown ordering and port reuse

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sts_flow_harness::auth_backend::FAKE_ACCESS_TOKEN;
use sts_flow_harness::credentials::read_credential;
use sts_flow_harness::discovery::TokenCheckingCallbacks;
use sts_flow_harness::errors::{Error, FixtureError, ProxyError};
use sts_flow_harness::proxy::{ProxyLauncher, ProxyMode};
use sts_flow_harness::{Env, PortAllocator, SetupStage};

use crate::common::{harness_config, next_response, open_ads_stream, TestEnv};

#[tokio::test]
async fn test_209_teardown_twice_is_safe() {
    let mut t = TestEnv::start(209).await.unwrap();

    let first = t.env.tear_down().await;
    assert!(first.is_clean(), "{:?}", first.errors());
    assert_eq!(first.stopped(), ["auth-backend", "discovery", "sts"]);
    assert!(t.env.is_torn_down());
    assert!(t.env.auth_backend().is_none());

    let second = t.env.tear_down().await;
    assert!(second.is_clean());
    assert!(second.stopped().is_empty());
}

#[tokio::test]
async fn test_210_teardown_with_open_stream_completes_promptly() {
    let mut t = TestEnv::start(210).await.unwrap();
    let mut stream = open_ads_stream(&t.env, Some(FAKE_ACCESS_TOKEN)).await.unwrap();
    next_response(&mut stream).await.unwrap();
    assert_eq!(t.callbacks.active_streams(), 1);

    let started = Instant::now();
    let report = t.env.tear_down().await;
    assert!(started.elapsed() < Duration::from_secs(5), "teardown took {:?}", started.elapsed());
    assert!(report.is_clean(), "{:?}", report.errors());
    assert_eq!(report.stopped(), ["auth-backend", "discovery", "sts"]);
}

#[tokio::test]
async fn test_211_same_identifier_reallocates_after_teardown() {
    let mut t = TestEnv::start(211).await.unwrap();
    let ports = t.env.ports();
    t.env.tear_down().await;
    drop(t);

    let again = PortAllocator::for_test(211).unwrap();
    assert_eq!(again.ports(), ports);
}

#[tokio::test]
async fn test_212_credentials_are_written_before_services_start() {
    let mut t = TestEnv::start(212).await.unwrap();

    let paths = t.env.credentials().clone();
    assert_eq!(read_credential(&paths.token).unwrap(), t.env.fixtures().subject_token);
    assert_eq!(read_credential(&paths.ca_cert).unwrap(), t.env.fixtures().tls.ca_cert_pem);
    assert!(paths.token.starts_with(t.dir.path()));

    t.env.tear_down().await;
}

#[tokio::test]
async fn test_213_unwritable_credentials_fail_credentials_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(213, dir.path());
    config.credentials.token = dir.path().join("missing").join("token.jwt");

    let err = Env::set_up(&config, Arc::new(TokenCheckingCallbacks::default())).await.unwrap_err();
    assert_eq!(err.stage, SetupStage::Credentials);
    assert!(err.to_string().contains("credentials"), "{err}");

    // Nothing stays reserved after a failed setup.
    PortAllocator::for_test(213).unwrap();
}

#[tokio::test]
async fn test_214_partial_tls_fixtures_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(214, dir.path());
    config.fixtures.server_cert_path = Some(PathBuf::from("/nonexistent/server.crt"));

    let err = Env::set_up(&config, Arc::new(TokenCheckingCallbacks::default())).await.unwrap_err();
    assert_eq!(err.stage, SetupStage::Credentials);
    assert!(matches!(err.source, Error::Fixture(FixtureError::IncompleteTls)));
}

#[tokio::test]
async fn test_215_required_proxy_without_binary_fails_proxy_stage() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(215, dir.path());
    config.proxy.mode = ProxyMode::Required;
    config.proxy.binary = "definitely-not-an-envoy-binary".to_string();

    let err = Env::set_up(&config, Arc::new(TokenCheckingCallbacks::default())).await.unwrap_err();
    assert_eq!(err.stage, SetupStage::Proxy);
    assert!(matches!(err.source, Error::Proxy(ProxyError::BinaryNotFound(_))));

    PortAllocator::for_test(215).unwrap();
}

#[tokio::test]
async fn test_216_missing_binary_is_skipped_when_optional() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(216, dir.path());
    config.proxy.mode = ProxyMode::IfAvailable;
    config.proxy.binary = "definitely-not-an-envoy-binary".to_string();

    let mut t = TestEnv::start_with(config, dir).await.unwrap();
    assert!(t.env.proxy().is_none());

    let err = t.env.start_proxy().await.unwrap_err();
    assert_eq!(err.stage, SetupStage::Proxy);

    // The failed start leaves the rest of the topology running.
    assert!(t.env.readiness().is_ready());
    assert!(t.env.tear_down().await.is_clean());
}

#[tokio::test]
async fn test_218_failed_proxy_start_can_be_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(218, dir.path());
    // Exits at once, so the admin endpoint never answers.
    config.proxy.binary = "true".to_string();
    config.proxy.ready_attempts = 2;
    if !ProxyLauncher::new(&config.proxy).unwrap().is_available() {
        eprintln!("Skipping: `true` not found on PATH");
        return;
    }

    let mut t = TestEnv::start_with(config, dir).await.unwrap();
    for attempt in 1..=2 {
        let err = t.env.start_proxy().await.unwrap_err();
        assert_eq!(err.stage, SetupStage::Proxy);
        assert!(
            matches!(err.source, Error::Proxy(ProxyError::NotReady { .. })),
            "attempt {attempt}: {err}"
        );
        assert!(t.env.proxy().is_none());
    }

    let report = t.env.tear_down().await;
    assert!(report.is_clean(), "{:?}", report.errors());
    drop(t);
    PortAllocator::for_test(218).unwrap();
}
