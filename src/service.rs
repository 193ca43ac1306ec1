//! Background task wrapper shared by the in-process HTTP services

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Outcome of stopping a service task
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum StopOutcome {
    /// The task ended after the stop signal
    Stopped,
    /// The task was already finished before stop was requested
    AlreadyExited,
    /// The task ignored the signal for the whole grace period and was aborted
    Aborted,
    /// Stop had already been called
    Idle,
}

/// A spawned axum service with a oneshot shutdown trigger
#[derive(Debug)]
pub(crate) struct ServiceTask {
    name: &'static str,
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ServiceTask {
    /// Serve `router` on an already bound listener
    pub(crate) fn spawn_http(
        name: &'static str,
        listener: TcpListener,
        router: Router,
    ) -> std::io::Result<Self> {
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router).with_graceful_shutdown(shutdown).await {
                error!(service = name, %addr, error = %e, "Service terminated with error");
            }
            debug!(service = name, %addr, "Service task finished");
        });

        Ok(Self { name, addr, shutdown: Some(shutdown_tx), handle: Some(handle) })
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the serve task is no longer running
    pub(crate) fn has_exited(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal shutdown without waiting; returns false if already signalled
    pub(crate) fn signal_stop(&mut self) -> bool {
        match self.shutdown.take() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Signal shutdown and wait up to `grace` for the task to finish
    pub(crate) async fn stop(&mut self, grace: Duration) -> StopOutcome {
        let exited_early = self.has_exited() && self.shutdown.is_some();
        self.signal_stop();

        let Some(mut handle) = self.handle.take() else {
            return StopOutcome::Idle;
        };
        if exited_early {
            return StopOutcome::AlreadyExited;
        }

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => StopOutcome::Stopped,
            Err(_) => {
                warn!(service = self.name, addr = %self.addr, ?grace, "Service did not stop in time, aborting");
                handle.abort();
                StopOutcome::Aborted
            }
        }
    }
}

impl Drop for ServiceTask {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
