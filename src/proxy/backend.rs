//! HTTP backend behind the proxy listeners

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{Method, Uri};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::errors::ProxyError;
use crate::service::ServiceTask;

/// Body prefix of every backend response
pub const BACKEND_GREETING: &str = "sts-flow backend";

async fn echo(method: Method, uri: Uri) -> String {
    format!("{BACKEND_GREETING}: {method} {}", uri.path())
}

/// Echo backend that answers every request with its method and path
#[derive(Debug)]
pub struct TestBackend {
    task: ServiceTask,
}

impl TestBackend {
    pub fn start(listener: TcpListener) -> Result<Self, ProxyError> {
        let router = Router::new().fallback(echo);
        let task = ServiceTask::spawn_http("test-backend", listener, router)
            .map_err(|e| ProxyError::Backend(e.to_string()))?;
        info!(addr = %task.addr(), "Test backend started");
        Ok(Self { task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.task.addr()
    }

    pub async fn stop(&mut self, grace: Duration) {
        self.task.stop(grace).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_method_and_path() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut backend = TestBackend::start(listener).unwrap();

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let body = client
            .post(format!("http://{}/some/path", backend.addr()))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "sts-flow backend: POST /some/path");

        backend.stop(Duration::from_secs(1)).await;
    }
}
