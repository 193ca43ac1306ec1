//! Shared test infrastructure for the STS flow suite

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_client::AggregatedDiscoveryServiceClient, DiscoveryRequest,
    DiscoveryResponse,
};
use sts_flow_harness::discovery::{TokenCheckingCallbacks, LISTENER_TYPE_URL};
use sts_flow_harness::proxy::ProxyMode;
use sts_flow_harness::sts::URL_ENCODED_FORM;
use sts_flow_harness::{Env, HarnessConfig};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Certificate, Channel, ClientTlsConfig};

/// Default timeout for most operations
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Quick timeout for simple operations
pub const QUICK_TIMEOUT: Duration = Duration::from_secs(5);

/// Wrap an async operation with a hard timeout
pub async fn with_timeout<F, T>(duration: Duration, label: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_elapsed) => {
            anyhow::bail!("TIMEOUT: '{}' exceeded {:?} - test is likely stuck", label, duration)
        }
    }
}

/// Configuration for a run without the proxy, writing credentials under `dir`
pub fn harness_config(test_id: u16, dir: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::for_test(test_id, dir);
    config.proxy.mode = ProxyMode::Skip;
    config.discovery.drain_timeout_ms = 500;
    config
}

/// A running environment plus the handles a test needs to inspect it
pub struct TestEnv {
    pub env: Env,
    pub callbacks: Arc<TokenCheckingCallbacks>,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn start(test_id: u16) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        Self::start_with(harness_config(test_id, dir.path()), dir).await
    }

    pub async fn start_with(config: HarnessConfig, dir: TempDir) -> anyhow::Result<Self> {
        let callbacks = Arc::new(TokenCheckingCallbacks::default());
        let env = with_timeout(DEFAULT_TIMEOUT, "environment setup", async {
            Env::set_up(&config, callbacks.clone()).await.map_err(anyhow::Error::from)
        })
        .await?;
        Ok(Self { env, callbacks, dir })
    }
}

/// POST a raw form body to the STS token endpoint
pub async fn post_token(sts: SocketAddr, body: String) -> anyhow::Result<reqwest::Response> {
    let client = reqwest::Client::builder().no_proxy().timeout(QUICK_TIMEOUT).build()?;
    Ok(client
        .post(format!("http://{sts}/token"))
        .header(reqwest::header::CONTENT_TYPE, URL_ENCODED_FORM)
        .body(body)
        .send()
        .await?)
}

/// An open ADS stream
pub struct AdsStream {
    pub requests: mpsc::Sender<DiscoveryRequest>,
    pub responses: tonic::Streaming<DiscoveryResponse>,
}

/// Connect to the discovery server over TLS, trusting the run's CA
pub async fn connect_ads(env: &Env) -> anyhow::Result<AggregatedDiscoveryServiceClient<Channel>> {
    let tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(&env.fixtures().tls.ca_cert_pem))
        .domain_name("localhost");
    let channel = Channel::from_shared(format!("https://{}", env.discovery_address()))?
        .tls_config(tls)?
        .connect_timeout(QUICK_TIMEOUT)
        .connect()
        .await?;
    Ok(AggregatedDiscoveryServiceClient::new(channel))
}

/// Open an ADS stream, presenting `token` as a bearer token when given, and
/// send an initial listener request
pub async fn open_ads_stream(env: &Env, token: Option<&str>) -> anyhow::Result<AdsStream> {
    let mut client = connect_ads(env).await?;

    let (requests, rx) = mpsc::channel(8);
    requests.send(listener_request("")).await?;

    let mut request = tonic::Request::new(ReceiverStream::new(rx));
    if let Some(token) = token {
        request.metadata_mut().insert("authorization", format!("Bearer {token}").parse()?);
    }
    let responses = client.stream_aggregated_resources(request).await?.into_inner();
    Ok(AdsStream { requests, responses })
}

/// A listener discovery request; a non-empty nonce makes it an ACK
pub fn listener_request(nonce: &str) -> DiscoveryRequest {
    DiscoveryRequest {
        type_url: LISTENER_TYPE_URL.to_string(),
        response_nonce: nonce.to_string(),
        ..Default::default()
    }
}

/// Wait for the next response on an ADS stream
pub async fn next_response(stream: &mut AdsStream) -> anyhow::Result<DiscoveryResponse> {
    match tokio::time::timeout(QUICK_TIMEOUT, stream.responses.message()).await {
        Ok(Ok(Some(response))) => Ok(response),
        Ok(Ok(None)) => anyhow::bail!("ADS stream closed"),
        Ok(Err(status)) => Err(status.into()),
        Err(_elapsed) => anyhow::bail!("TIMEOUT: no discovery response within {:?}", QUICK_TIMEOUT),
    }
}
