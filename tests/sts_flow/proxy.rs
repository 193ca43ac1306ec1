//! End-to-end runs with a real Envoy
//!
//! Ignored by default; run with `--ignored` on a host with `envoy` on PATH.

use std::time::Duration;

use sts_flow_harness::proxy::backend::BACKEND_GREETING;
use sts_flow_harness::proxy::{ProxyLauncher, ProxyMode};

use crate::common::{harness_config, with_timeout, TestEnv, DEFAULT_TIMEOUT};

async fn get_through(port: u16) -> anyhow::Result<String> {
    let client = reqwest::Client::builder().no_proxy().timeout(Duration::from_secs(2)).build()?;
    Ok(client.get(format!("http://127.0.0.1:{port}/through/proxy")).send().await?.text().await?)
}

#[tokio::test]
#[ignore = "requires envoy on PATH"]
async fn test_220_envoy_exchanges_token_and_loads_dynamic_listener() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = harness_config(220, dir.path());
    config.proxy.mode = ProxyMode::Required;
    if !ProxyLauncher::new(&config.proxy).unwrap().is_available() {
        eprintln!("Skipping: envoy not found on PATH");
        return;
    }

    let mut t = TestEnv::start_with(config, dir).await.unwrap();
    assert!(t.env.proxy().is_some());

    let callbacks = t.callbacks.clone();
    with_timeout(DEFAULT_TIMEOUT, "proxy presents exchanged token", async move {
        while callbacks.num_tokens_received() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    })
    .await
    .unwrap();

    let body = get_through(t.env.ports().static_listener).await.unwrap();
    assert!(body.starts_with(BACKEND_GREETING), "static listener answered {body:?}");

    let dynamic_port = t.env.ports().dynamic_listener;
    let body = with_timeout(DEFAULT_TIMEOUT, "dynamic listener serves traffic", async move {
        loop {
            match get_through(dynamic_port).await {
                Ok(body) => return Ok(body),
                Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
            }
        }
    })
    .await
    .unwrap();
    assert!(body.starts_with(BACKEND_GREETING), "dynamic listener answered {body:?}");

    let report = t.env.tear_down().await;
    assert!(report.is_clean(), "{:?}", report.errors());
    assert_eq!(report.stopped(), ["proxy", "auth-backend", "discovery", "sts"]);
}
