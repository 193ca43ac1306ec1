//! # Proxy launcher
//!
//! Renders the Envoy bootstrap for a port map, starts the test backend the
//! static listener and the pushed listener forward to, and runs Envoy as a
//! child process. The proxy binds its own listener and admin ports, so those
//! reservations must be released before [`ProxyLauncher::start`].

pub mod backend;
pub mod bootstrap;

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

pub use backend::TestBackend;
pub use bootstrap::{render, BootstrapValues, DEFAULT_BOOTSTRAP_TEMPLATE};

use crate::config::ProxyConfig;
use crate::credentials::CredentialPaths;
use crate::errors::ProxyError;
use crate::ports::PortMap;
use crate::probe::{probe, ProbeBudget, ProbeOutcome};

const STOP_GRACE: Duration = Duration::from_secs(5);

/// Whether setup starts the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    /// Never start the proxy
    Skip,
    /// Start the proxy when its binary is on PATH, otherwise skip with a warning
    #[default]
    IfAvailable,
    /// Start the proxy or fail setup
    Required,
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProxyMode::Skip => "skip",
            ProxyMode::IfAvailable => "if-available",
            ProxyMode::Required => "required",
        })
    }
}

impl FromStr for ProxyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(ProxyMode::Skip),
            "if-available" | "if_available" => Ok(ProxyMode::IfAvailable),
            "required" => Ok(ProxyMode::Required),
            other => Err(format!("unknown proxy mode '{other}'")),
        }
    }
}

/// Starts Envoy processes from a bootstrap template
#[derive(Debug, Clone)]
pub struct ProxyLauncher {
    binary: String,
    log_level: String,
    node_id: String,
    template: String,
}

impl ProxyLauncher {
    pub fn new(config: &ProxyConfig) -> Result<Self, ProxyError> {
        Ok(Self {
            binary: config.binary.clone(),
            log_level: config.log_level.clone(),
            node_id: config.node_id.clone(),
            template: bootstrap::load_template(config.bootstrap_template.as_deref())?,
        })
    }

    /// Resolve the proxy binary on PATH
    pub fn binary_path(&self) -> Result<PathBuf, ProxyError> {
        which::which(&self.binary).map_err(|_| ProxyError::BinaryNotFound(self.binary.clone()))
    }

    pub fn is_available(&self) -> bool {
        self.binary_path().is_ok()
    }

    pub fn render_bootstrap(
        &self,
        ports: &PortMap,
        credentials: &CredentialPaths,
    ) -> Result<String, ProxyError> {
        render(&self.template, &BootstrapValues::new(&self.node_id, ports, credentials))
    }

    /// Start the test backend on `backend_listener` and spawn the proxy
    pub async fn start(
        &self,
        ports: &PortMap,
        credentials: &CredentialPaths,
        backend_listener: TcpListener,
    ) -> Result<ProxyHandle, ProxyError> {
        let binary = self.binary_path()?;
        let rendered = self.render_bootstrap(ports, credentials)?;

        let bootstrap_path = std::env::temp_dir()
            .join(format!("sts-flow-bootstrap-{}-{}.yaml", ports.admin, uuid::Uuid::new_v4()));
        tokio::fs::write(&bootstrap_path, &rendered)
            .await
            .map_err(|source| ProxyError::Io { path: bootstrap_path.clone(), source })?;
        debug!(path = %bootstrap_path.display(), bootstrap = %rendered, "Proxy bootstrap written");

        let mut backend = TestBackend::start(backend_listener)?;

        let mut command = Command::new(&binary);
        command
            .arg("-c")
            .arg(&bootstrap_path)
            .arg("--disable-hot-restart")
            .arg("-l")
            .arg(&self.log_level)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                backend.stop(STOP_GRACE).await;
                let _ = std::fs::remove_file(&bootstrap_path);
                return Err(ProxyError::Process(e));
            }
        };

        info!(
            pid = child.id(),
            binary = %binary.display(),
            admin_port = ports.admin,
            discovery_port = ports.discovery,
            "Proxy process started"
        );

        Ok(ProxyHandle {
            child: Some(child),
            admin_port: ports.admin,
            bootstrap_path,
            backend: Some(backend),
        })
    }
}

/// Handle to a running proxy and its test backend
#[derive(Debug)]
pub struct ProxyHandle {
    child: Option<Child>,
    admin_port: u16,
    bootstrap_path: PathBuf,
    backend: Option<TestBackend>,
}

impl ProxyHandle {
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn admin_port(&self) -> u16 {
        self.admin_port
    }

    pub fn bootstrap_path(&self) -> &Path {
        &self.bootstrap_path
    }

    /// Poll the admin `/ready` endpoint until the proxy reports LIVE
    pub async fn wait_ready(&self, budget: ProbeBudget) -> Result<(), ProxyError> {
        let not_ready = |reason: String| ProxyError::NotReady { admin_port: self.admin_port, reason };
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(1))
            .build()
            .map_err(|e| not_ready(e.to_string()))?;
        let url = format!("http://127.0.0.1:{}/ready", self.admin_port);
        let (client, url) = (&client, url.as_str());

        let outcome = probe(budget, move || async move {
            let response = client.get(url).send().await.map_err(|e| e.to_string())?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(format!("admin answered {}", response.status()))
            }
        })
        .await;

        match outcome {
            ProbeOutcome::Ready { attempts } => {
                info!(admin_port = self.admin_port, attempts, "Proxy is ready");
                Ok(())
            }
            ProbeOutcome::TimedOut { last_error, .. } => {
                Err(not_ready(last_error.unwrap_or_else(|| "no attempts made".to_string())))
            }
        }
    }

    /// Kill the proxy, stop the backend and remove the bootstrap file.
    /// Later calls are no-ops.
    pub async fn stop(&mut self) -> Result<(), ProxyError> {
        let mut result = Ok(());

        if let Some(mut child) = self.child.take() {
            match child.try_wait() {
                Ok(Some(status)) => warn!(%status, "Proxy process had already exited"),
                _ => {
                    if let Err(e) = child.start_kill() {
                        result = Err(ProxyError::Process(e));
                    }
                    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                        Ok(Ok(status)) => info!(%status, "Proxy process stopped"),
                        Ok(Err(e)) => result = Err(ProxyError::Process(e)),
                        Err(_) => warn!(grace = ?STOP_GRACE, "Proxy process did not exit in time"),
                    }
                }
            }
        }

        if let Some(mut backend) = self.backend.take() {
            backend.stop(STOP_GRACE).await;
        }

        match std::fs::remove_file(&self.bootstrap_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                if result.is_ok() {
                    result = Err(ProxyError::Io { path: self.bootstrap_path.clone(), source });
                }
            }
        }
        result
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.start_kill();
            let _ = std::fs::remove_file(&self.bootstrap_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(binary: &str) -> ProxyConfig {
        ProxyConfig { binary: binary.to_string(), ..Default::default() }
    }

    #[test]
    fn test_proxy_mode_parsing() {
        assert_eq!("skip".parse::<ProxyMode>().unwrap(), ProxyMode::Skip);
        assert_eq!("IF-AVAILABLE".parse::<ProxyMode>().unwrap(), ProxyMode::IfAvailable);
        assert_eq!("required".parse::<ProxyMode>().unwrap(), ProxyMode::Required);
        assert!("sometimes".parse::<ProxyMode>().is_err());
        assert_eq!(ProxyMode::default(), ProxyMode::IfAvailable);
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let launcher = ProxyLauncher::new(&config("definitely-not-an-envoy-binary")).unwrap();
        assert!(!launcher.is_available());
        assert!(matches!(launcher.binary_path(), Err(ProxyError::BinaryNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_fails_before_side_effects_without_binary() {
        let launcher = ProxyLauncher::new(&config("definitely-not-an-envoy-binary")).unwrap();
        let ports = PortMap {
            auth: 1,
            sts: 2,
            dynamic_listener: 3,
            static_listener: 4,
            discovery: 5,
            backend: 6,
            admin: 7,
        };
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let result = launcher.start(&ports, &CredentialPaths::default(), listener).await;
        assert!(matches!(result, Err(ProxyError::BinaryNotFound(_))));
    }

    #[test]
    fn test_missing_template_file_is_io_error() {
        let mut cfg = config("envoy");
        cfg.bootstrap_template = Some(PathBuf::from("/nonexistent/bootstrap.yaml"));
        assert!(matches!(ProxyLauncher::new(&cfg), Err(ProxyError::Io { .. })));
    }
}
