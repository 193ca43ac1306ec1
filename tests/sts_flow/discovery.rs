//! ADS streams against the TLS discovery server

use std::time::Duration;

use envoy_types::pb::envoy::config::listener::v3::Listener;
use prost::Message;
use sts_flow_harness::auth_backend::FAKE_ACCESS_TOKEN;
use sts_flow_harness::discovery::{DynamicListener, DYNAMIC_LISTENER_NAME, LISTENER_TYPE_URL};
use tonic::Code;

use crate::common::{
    listener_request, next_response, open_ads_stream, with_timeout, TestEnv, QUICK_TIMEOUT,
};

#[tokio::test]
async fn test_206_stream_with_access_token_receives_dynamic_listener() {
    let mut t = TestEnv::start(206).await.unwrap();
    let mut stream = open_ads_stream(&t.env, Some(FAKE_ACCESS_TOKEN)).await.unwrap();

    let response = next_response(&mut stream).await.unwrap();

    assert_eq!(response.type_url, LISTENER_TYPE_URL);
    assert_eq!(response.resources.len(), 1);
    let listener = Listener::decode(response.resources[0].value.as_slice()).unwrap();
    assert_eq!(listener.name, DYNAMIC_LISTENER_NAME);
    assert_eq!(listener, DynamicListener::new(t.env.ports().dynamic_listener).to_listener());

    assert_eq!(t.callbacks.num_streams(), 1);
    assert_eq!(t.callbacks.num_tokens_received(), 1);
    assert_eq!(t.callbacks.active_streams(), 1);

    // ACKs are not answered.
    stream.requests.send(listener_request(&response.nonce)).await.unwrap();
    let next = tokio::time::timeout(Duration::from_millis(300), stream.responses.message()).await;
    assert!(next.is_err(), "ACK must not produce a response");

    drop(stream);
    assert!(t.env.tear_down().await.is_clean());
}

#[tokio::test]
async fn test_207_stream_without_expected_token_is_rejected() {
    let mut t = TestEnv::start(207).await.unwrap();

    for token in [None, Some("NotTheAccessToken")] {
        let err = open_ads_stream(&t.env, token).await.err().expect("stream must be rejected");
        let status = err.downcast_ref::<tonic::Status>().expect("gRPC status");
        assert_eq!(status.code(), Code::Unauthenticated);
    }

    assert_eq!(t.callbacks.num_streams(), 2);
    assert_eq!(t.callbacks.num_tokens_received(), 0);
    assert_eq!(t.callbacks.active_streams(), 0);

    t.env.tear_down().await;
}

#[tokio::test]
async fn test_208_expected_token_follows_callbacks() {
    let mut t = TestEnv::start(208).await.unwrap();
    t.callbacks.set_expected_token("RotatedAccessToken");

    let err = open_ads_stream(&t.env, Some(FAKE_ACCESS_TOKEN)).await.err().expect("old token rejected");
    assert_eq!(err.downcast_ref::<tonic::Status>().unwrap().code(), Code::Unauthenticated);

    let mut stream = open_ads_stream(&t.env, Some("RotatedAccessToken")).await.unwrap();
    let response = next_response(&mut stream).await.unwrap();
    assert_eq!(response.resources.len(), 1);

    drop(stream);
    t.env.tear_down().await;
}

#[tokio::test]
async fn test_219_teardown_closes_stream_whose_client_stopped_reading() {
    let mut t = TestEnv::start(219).await.unwrap();
    let stream = open_ads_stream(&t.env, Some(FAKE_ACCESS_TOKEN)).await.unwrap();

    // Keep asking for listeners without reading a single response, until the
    // server side backs up.
    let requests = stream.requests.clone();
    let flood = tokio::spawn(async move {
        for _ in 0..20_000 {
            if requests.send(listener_request("")).await.is_err() {
                break;
            }
        }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(t.callbacks.active_streams(), 1);

    let report = t.env.tear_down().await;
    assert!(report.is_clean(), "{:?}", report.errors());

    let callbacks = t.callbacks.clone();
    with_timeout(QUICK_TIMEOUT, "stream task observes cancellation", async move {
        while callbacks.active_streams() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(())
    })
    .await
    .unwrap();

    flood.abort();
    drop(stream);
}
