//! ADS stream handling
//!
//! Each accepted stream runs in its own task. The task answers every initial
//! request for a type with the current resources, logs ACKs and NACKs without
//! answering them, and ends when the client closes the stream, a callback
//! rejects a request or the server cancels all streams.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::AggregatedDiscoveryService, DeltaDiscoveryRequest,
    DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn, Instrument};

use super::callbacks::DiscoveryCallbacks;
use super::listener::{DynamicListener, LISTENER_TYPE_URL};

const RESOURCE_VERSION: &str = "1";

#[derive(Debug)]
pub(crate) struct AdsService {
    callbacks: Arc<dyn DiscoveryCallbacks>,
    listener: DynamicListener,
    streams: CancellationToken,
    next_stream_id: AtomicU64,
}

impl AdsService {
    pub(crate) fn new(
        callbacks: Arc<dyn DiscoveryCallbacks>,
        listener: DynamicListener,
        streams: CancellationToken,
    ) -> Self {
        Self { callbacks, listener, streams, next_stream_id: AtomicU64::new(1) }
    }
}

fn build_response(request: &DiscoveryRequest, listener: &DynamicListener) -> DiscoveryResponse {
    let resources = if request.type_url == LISTENER_TYPE_URL {
        vec![listener.to_any()]
    } else {
        debug!(type_url = %request.type_url, "No resources for requested type");
        Vec::new()
    };

    DiscoveryResponse {
        version_info: RESOURCE_VERSION.to_string(),
        resources,
        type_url: request.type_url.clone(),
        nonce: uuid::Uuid::new_v4().to_string(),
        ..Default::default()
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AdsService {
    type StreamAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DiscoveryResponse, Status>> + Send>>;
    type DeltaAggregatedResourcesStream =
        Pin<Box<dyn Stream<Item = std::result::Result<DeltaDiscoveryResponse, Status>> + Send>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.on_stream_open(stream_id, request.metadata())?;
        info!(stream_id, "ADS stream opened");

        let mut in_stream = request.into_inner();
        let (tx, rx) = mpsc::channel(16);
        let callbacks = self.callbacks.clone();
        let listener = self.listener;
        let cancelled = self.streams.clone();
        let span = tracing::info_span!("ads_stream", stream_id);

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        _ = cancelled.cancelled() => {
                            debug!("Cancelling stream on server shutdown");
                            let _ = tx.try_send(Err(Status::unavailable("discovery server stopping")));
                            break;
                        }
                        result = in_stream.next() => match result {
                            Some(Ok(request)) => {
                                if let Err(status) = callbacks.on_stream_request(stream_id, &request) {
                                    let _ = tx.try_send(Err(status));
                                    break;
                                }

                                if !request.response_nonce.is_empty() {
                                    match &request.error_detail {
                                        Some(detail) => warn!(
                                            type_url = %request.type_url,
                                            nonce = %request.response_nonce,
                                            error_message = %detail.message,
                                            "[NACK] Proxy rejected response"
                                        ),
                                        None => debug!(
                                            type_url = %request.type_url,
                                            nonce = %request.response_nonce,
                                            "[ACK] Proxy accepted response"
                                        ),
                                    }
                                    continue;
                                }

                                let response = build_response(&request, &listener);
                                callbacks.on_stream_response(stream_id, &request, &response);
                                debug!(
                                    type_url = %response.type_url,
                                    resources = response.resources.len(),
                                    "Sending discovery response"
                                );
                                let sent = tokio::select! {
                                    _ = cancelled.cancelled() => false,
                                    sent = tx.send(Ok(response)) => sent.is_ok(),
                                };
                                if !sent {
                                    break;
                                }
                            }
                            Some(Err(status)) => {
                                warn!(code = ?status.code(), message = %status.message(), "ADS stream error");
                                break;
                            }
                            None => {
                                debug!("Client closed ADS stream");
                                break;
                            }
                        }
                    }
                }
                callbacks.on_stream_closed(stream_id);
                info!("ADS stream closed");
            }
            .instrument(span),
        );

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        Err(Status::unimplemented("delta xDS is not supported"))
    }
}
