//! # Discovery server
//!
//! TLS gRPC server for the aggregated discovery service. The proxy connects to
//! it with the access token obtained through the STS flow; the stock
//! [`TokenCheckingCallbacks`] validate that token on every stream.
//!
//! Lifecycle: [`DiscoveryServer::start`] → serving →
//! [`DiscoveryServer::graceful_stop`] → stopped.

pub mod callbacks;
pub mod listener;
mod stream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use envoy_types::pb::envoy::service::discovery::v3::aggregated_discovery_service_server::AggregatedDiscoveryServiceServer;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{error, info, warn};

pub use callbacks::{DiscoveryCallbacks, TokenCheckingCallbacks};
pub use listener::{DynamicListener, BACKEND_CLUSTER, DYNAMIC_LISTENER_NAME, LISTENER_TYPE_URL};

use crate::errors::DiscoveryError;
use crate::fixtures::TlsMaterial;
use stream::AdsService;

/// How long the server task may take to exit once streams are cancelled
const FORCED_STOP_GRACE: Duration = Duration::from_millis(500);

/// Discovery server configuration
#[derive(Debug)]
pub struct DiscoveryServerConfig {
    /// Listener bound to the `discovery` port
    pub listener: TcpListener,
    /// Server certificate chain, PEM
    pub cert_pem: String,
    /// Server private key, PEM
    pub key_pem: String,
}

impl DiscoveryServerConfig {
    pub fn new(listener: TcpListener, tls: &TlsMaterial) -> Self {
        Self {
            listener,
            cert_pem: tls.server_cert_pem.clone(),
            key_pem: tls.server_key_pem.clone(),
        }
    }
}

/// Observable server state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Serving,
    Stopped,
}

/// How a graceful stop finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every stream ended within the drain timeout
    Drained,
    /// Streams were still open at the drain timeout and were cancelled
    Forced,
    /// The server was already stopped
    AlreadyStopped,
}

type ServeHandle = JoinHandle<Result<(), tonic::transport::Error>>;

/// Handle to a running discovery server
#[derive(Debug)]
pub struct DiscoveryServer {
    addr: SocketAddr,
    callbacks: Arc<dyn DiscoveryCallbacks>,
    streams: CancellationToken,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<ServeHandle>,
}

impl DiscoveryServer {
    /// Serve ADS over TLS on the configured listener
    pub fn start(
        config: DiscoveryServerConfig,
        callbacks: Arc<dyn DiscoveryCallbacks>,
        dynamic_listener: DynamicListener,
    ) -> Result<Self, DiscoveryError> {
        let addr = config.listener.local_addr().map_err(DiscoveryError::Listener)?;
        let identity = Identity::from_pem(config.cert_pem, config.key_pem);
        let streams = CancellationToken::new();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let service = AdsService::new(callbacks.clone(), dynamic_listener, streams.clone());
        let router = Server::builder()
            .tls_config(ServerTlsConfig::new().identity(identity))?
            .add_service(AggregatedDiscoveryServiceServer::new(service));

        let incoming = TcpListenerStream::new(config.listener);
        let handle = tokio::spawn(router.serve_with_incoming_shutdown(incoming, async move {
            let _ = shutdown_rx.await;
        }));

        info!(%addr, dynamic_listener_port = dynamic_listener.port, "Discovery server listening");
        Ok(Self {
            addr,
            callbacks,
            streams,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn callbacks(&self) -> &Arc<dyn DiscoveryCallbacks> {
        &self.callbacks
    }

    pub fn state(&self) -> ServerState {
        match &self.handle {
            Some(handle) if !handle.is_finished() => ServerState::Serving,
            _ => ServerState::Stopped,
        }
    }

    /// Stop accepting connections and wait up to `drain` for open streams to
    /// end. Streams still open after `drain` are cancelled and the server task
    /// is aborted if it does not exit promptly. Later calls are no-ops.
    pub async fn graceful_stop(&mut self, drain: Duration) -> Result<DrainOutcome, DiscoveryError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(DrainOutcome::AlreadyStopped);
        };
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        info!(addr = %self.addr, ?drain, "Discovery server draining");

        if let Ok(joined) = tokio::time::timeout(drain, &mut handle).await {
            self.streams.cancel();
            finish(joined)?;
            info!(addr = %self.addr, "Discovery server stopped");
            return Ok(DrainOutcome::Drained);
        }

        warn!(addr = %self.addr, ?drain, "Discovery server did not drain in time, cancelling streams");
        self.streams.cancel();
        match tokio::time::timeout(FORCED_STOP_GRACE, &mut handle).await {
            Ok(joined) => finish(joined)?,
            Err(_) => {
                warn!(addr = %self.addr, "Discovery server task still running, aborting");
                handle.abort();
            }
        }
        info!(addr = %self.addr, "Discovery server stopped");
        Ok(DrainOutcome::Forced)
    }
}

fn finish(
    joined: Result<Result<(), tonic::transport::Error>, tokio::task::JoinError>,
) -> Result<(), DiscoveryError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Discovery server terminated with error");
            Err(DiscoveryError::Transport(e))
        }
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(DiscoveryError::Task(e.to_string())),
    }
}

impl Drop for DiscoveryServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.streams.cancel();
            if let Some(tx) = self.shutdown.take() {
                let _ = tx.send(());
            }
            handle.abort();
        }
    }
}
