//! Stream callbacks consulted by the ADS service

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use tonic::metadata::MetadataMap;
use tonic::Status;
use tracing::{debug, warn};

use crate::auth_backend::FAKE_ACCESS_TOKEN;

/// Hooks into the lifecycle of every ADS stream.
///
/// `on_stream_open` and `on_stream_request` may reject the stream with a gRPC
/// status; the stream is closed with that status.
pub trait DiscoveryCallbacks: Send + Sync + std::fmt::Debug + 'static {
    /// Access token the proxy is expected to present to the discovery server
    fn expected_token(&self) -> String;

    fn on_stream_open(&self, stream_id: u64, metadata: &MetadataMap) -> Result<(), Status>;

    fn on_stream_request(&self, _stream_id: u64, _request: &DiscoveryRequest) -> Result<(), Status> {
        Ok(())
    }

    fn on_stream_response(
        &self,
        _stream_id: u64,
        _request: &DiscoveryRequest,
        _response: &DiscoveryResponse,
    ) {
    }

    fn on_stream_closed(&self, _stream_id: u64) {}
}

/// Callbacks that require `authorization: Bearer <expected token>` on every stream
#[derive(Debug)]
pub struct TokenCheckingCallbacks {
    expected_token: RwLock<String>,
    num_streams: AtomicUsize,
    num_tokens_received: AtomicUsize,
    active_streams: AtomicUsize,
}

impl Default for TokenCheckingCallbacks {
    fn default() -> Self {
        Self::new(FAKE_ACCESS_TOKEN)
    }
}

impl TokenCheckingCallbacks {
    pub fn new(expected_token: impl Into<String>) -> Self {
        Self {
            expected_token: RwLock::new(expected_token.into()),
            num_streams: AtomicUsize::new(0),
            num_tokens_received: AtomicUsize::new(0),
            active_streams: AtomicUsize::new(0),
        }
    }

    pub fn set_expected_token(&self, token: impl Into<String>) {
        *self.expected_token.write().unwrap_or_else(PoisonError::into_inner) = token.into();
    }

    /// Streams opened so far, accepted or not
    pub fn num_streams(&self) -> usize {
        self.num_streams.load(Ordering::SeqCst)
    }

    /// Streams that presented the expected token
    pub fn num_tokens_received(&self) -> usize {
        self.num_tokens_received.load(Ordering::SeqCst)
    }

    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }
}

impl DiscoveryCallbacks for TokenCheckingCallbacks {
    fn expected_token(&self) -> String {
        self.expected_token.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn on_stream_open(&self, stream_id: u64, metadata: &MetadataMap) -> Result<(), Status> {
        self.num_streams.fetch_add(1, Ordering::SeqCst);

        let token = metadata
            .get("authorization")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| {
                warn!(stream_id, "ADS stream opened without a bearer token");
                Status::unauthenticated("missing bearer token")
            })?;

        if token != self.expected_token() {
            warn!(stream_id, "ADS stream presented an unexpected token");
            return Err(Status::unauthenticated("unexpected bearer token"));
        }

        self.num_tokens_received.fetch_add(1, Ordering::SeqCst);
        self.active_streams.fetch_add(1, Ordering::SeqCst);
        debug!(stream_id, "ADS stream authenticated");
        Ok(())
    }

    fn on_stream_closed(&self, stream_id: u64) {
        self.active_streams.fetch_sub(1, Ordering::SeqCst);
        debug!(stream_id, "ADS stream closed");
    }
}
