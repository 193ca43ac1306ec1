//! # Lifecycle coordinator
//!
//! [`Env`] owns every piece of one STS flow topology. Setup runs the stages
//! in [`SetupStage`] order on the caller's task; teardown stops the proxy,
//! the auth backend, the discovery server and the STS server, in that order,
//! attempting every step even when an earlier one fails.

mod stage;
mod teardown;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn, Instrument};

pub use stage::{SetupError, SetupStage};
pub use teardown::{TeardownError, TeardownReport};

use crate::auth_backend::{AuthBackend, AuthBackendConfig};
use crate::config::HarnessConfig;
use crate::credentials::CredentialPaths;
use crate::discovery::{DiscoveryCallbacks, DiscoveryServer, DiscoveryServerConfig, DynamicListener};
use crate::fixtures::Fixtures;
use crate::observability::log_port_map;
use crate::ports::{PortAllocator, PortMap, PortRole};
use crate::probe::{wait_for_sts_flow_ready, ProbeBudget, ProbeOutcome, DEFAULT_INTERVAL};
use crate::proxy::{ProxyHandle, ProxyLauncher, ProxyMode};
use crate::sts::{start_sts_server, StsServer};
use stage::StageExt;

/// Grace period for the in-process HTTP services to stop
const SERVICE_STOP_GRACE: Duration = Duration::from_secs(2);

/// A running STS flow topology
#[derive(Debug)]
pub struct Env {
    config: HarnessConfig,
    allocator: PortAllocator,
    ports: PortMap,
    fixtures: Fixtures,
    callbacks: Arc<dyn DiscoveryCallbacks>,
    readiness: ProbeOutcome,
    auth_backend: Option<AuthBackend>,
    sts_server: Option<StsServer>,
    discovery: Option<DiscoveryServer>,
    proxy: Option<ProxyHandle>,
    torn_down: bool,
}

impl Env {
    /// Stand the topology up.
    ///
    /// A readiness timeout is logged and recorded in [`Env::readiness`]; it
    /// does not fail setup. Services started before a failing stage are
    /// stopped when the partial environment is dropped.
    pub async fn set_up(
        config: &HarnessConfig,
        callbacks: Arc<dyn DiscoveryCallbacks>,
    ) -> Result<Env, SetupError> {
        let span = crate::harness_span!("set_up", config.test_id);
        Self::set_up_inner(config, callbacks).instrument(span).await
    }

    async fn set_up_inner(
        config: &HarnessConfig,
        callbacks: Arc<dyn DiscoveryCallbacks>,
    ) -> Result<Env, SetupError> {
        crate::install_rustls_provider();

        let mut allocator = PortAllocator::for_test(config.test_id).at_stage(SetupStage::Ports)?;
        let ports = allocator.ports();
        log_port_map(config.test_id, &ports);

        let fixtures = Fixtures::resolve(&config.fixtures, &config.trust_domain)
            .at_stage(SetupStage::Credentials)?;
        fixtures
            .credential_artifacts()
            .materialize(&config.credentials)
            .at_stage(SetupStage::Credentials)?;

        let auth_listener =
            allocator.take_listener(PortRole::Auth).at_stage(SetupStage::AuthBackend)?;
        let auth_backend = AuthBackend::start(
            AuthBackendConfig::new(fixtures.subject_token.clone(), callbacks.expected_token()),
            auth_listener,
        )
        .at_stage(SetupStage::AuthBackend)?;

        let sts_listener =
            allocator.take_listener(PortRole::Sts).at_stage(SetupStage::TokenExchange)?;
        let sts_server = start_sts_server(
            sts_listener,
            &auth_backend.url(),
            &config.trust_domain,
            &config.project_number,
        )
        .at_stage(SetupStage::TokenExchange)?;

        let readiness =
            wait_for_sts_flow_ready(sts_server.addr(), &fixtures.subject_token, config.probe.budget())
                .await
                .at_stage(SetupStage::Readiness)?;
        if let ProbeOutcome::TimedOut { attempts, last_error } = &readiness {
            error!(
                attempts,
                last_error = ?last_error,
                "STS flow never became ready, continuing setup"
            );
        }

        let discovery_listener =
            allocator.take_listener(PortRole::Discovery).at_stage(SetupStage::Discovery)?;
        let discovery = DiscoveryServer::start(
            DiscoveryServerConfig::new(discovery_listener, &fixtures.tls),
            callbacks.clone(),
            DynamicListener::new(ports.dynamic_listener),
        )
        .at_stage(SetupStage::Discovery)?;

        let mut env = Env {
            config: config.clone(),
            allocator,
            ports,
            fixtures,
            callbacks,
            readiness,
            auth_backend: Some(auth_backend),
            sts_server: Some(sts_server),
            discovery: Some(discovery),
            proxy: None,
            torn_down: false,
        };

        let proxy_started = match config.proxy.mode {
            ProxyMode::Skip => {
                info!("Proxy start skipped by configuration");
                Ok(())
            }
            ProxyMode::IfAvailable => match ProxyLauncher::new(&config.proxy) {
                Ok(launcher) if launcher.is_available() => env.launch_proxy(&launcher).await,
                Ok(_) => {
                    warn!(binary = %config.proxy.binary, "Proxy binary not found, running without proxy");
                    Ok(())
                }
                Err(e) => Err(SetupError::new(SetupStage::Proxy, e)),
            },
            ProxyMode::Required => env.start_proxy().await,
        };
        if let Err(e) = proxy_started {
            env.tear_down().await;
            return Err(e);
        }

        info!(
            test_id = config.test_id,
            ready = env.readiness.is_ready(),
            proxy = env.proxy.is_some(),
            "STS flow environment is up"
        );
        Ok(env)
    }

    /// Start the proxy after a setup that skipped it. No-op if the proxy is
    /// already running. A failed start leaves the proxy ports reserved, so the
    /// call can be retried.
    pub async fn start_proxy(&mut self) -> Result<(), SetupError> {
        let launcher = ProxyLauncher::new(&self.config.proxy).at_stage(SetupStage::Proxy)?;
        self.launch_proxy(&launcher).await
    }

    async fn launch_proxy(&mut self, launcher: &ProxyLauncher) -> Result<(), SetupError> {
        if self.proxy.is_some() {
            warn!("Proxy already running");
            return Ok(());
        }
        launcher.binary_path().at_stage(SetupStage::Proxy)?;

        let backend_listener =
            self.allocator.take_listener(PortRole::Backend).at_stage(SetupStage::Proxy)?;
        for role in PortRole::PROXY_OWNED {
            self.allocator.release(role);
        }

        let mut handle = match launcher
            .start(&self.ports, &self.config.credentials, backend_listener)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                self.reclaim_proxy_ports();
                return Err(SetupError::new(SetupStage::Proxy, e));
            }
        };

        let budget = ProbeBudget::new(self.config.proxy.ready_attempts, DEFAULT_INTERVAL);
        if let Err(e) = handle.wait_ready(budget).await {
            if let Err(stop_err) = handle.stop().await {
                warn!(error = %stop_err, "Failed to stop proxy that never became ready");
            }
            self.reclaim_proxy_ports();
            return Err(SetupError::new(SetupStage::Proxy, e));
        }
        self.proxy = Some(handle);
        Ok(())
    }

    /// Reserve the ports handed to a proxy that failed to start, so a later
    /// [`Env::start_proxy`] finds them again
    fn reclaim_proxy_ports(&mut self) {
        for role in std::iter::once(PortRole::Backend).chain(PortRole::PROXY_OWNED) {
            if let Err(e) = self.allocator.reserve(role) {
                warn!(error = %e, "Proxy port could not be reserved again");
            }
        }
    }

    /// Stop everything in teardown order. Every step is attempted; failures
    /// are collected in the report. Later calls return an empty report.
    pub async fn tear_down(&mut self) -> TeardownReport {
        let mut report = TeardownReport::default();
        if self.torn_down {
            return report;
        }
        self.torn_down = true;

        let span = crate::harness_span!("tear_down", self.config.test_id);
        async {
            if let Some(mut proxy) = self.proxy.take() {
                report.record("proxy", proxy.stop().await);
            }
            if let Some(mut auth) = self.auth_backend.take() {
                report.record("auth-backend", auth.shutdown(SERVICE_STOP_GRACE).await);
            }
            if let Some(mut discovery) = self.discovery.take() {
                let result = discovery.graceful_stop(self.config.discovery.drain_timeout()).await;
                report.record("discovery", result.map(|outcome| info!(?outcome, "Discovery drained")));
            }
            if let Some(mut sts) = self.sts_server.take() {
                report.record("sts", sts.stop(SERVICE_STOP_GRACE).await);
            }
            self.allocator.release_all();
            report.log_summary();
        }
        .instrument(span)
        .await;

        report
    }

    pub fn test_id(&self) -> u16 {
        self.config.test_id
    }

    pub fn ports(&self) -> PortMap {
        self.ports
    }

    pub fn sts_address(&self) -> SocketAddr {
        self.ports.addr(PortRole::Sts)
    }

    pub fn discovery_address(&self) -> SocketAddr {
        self.ports.addr(PortRole::Discovery)
    }

    /// The mock token backend, until teardown
    pub fn auth_backend(&self) -> Option<&AuthBackend> {
        self.auth_backend.as_ref()
    }

    pub fn callbacks(&self) -> &Arc<dyn DiscoveryCallbacks> {
        &self.callbacks
    }

    pub fn proxy(&self) -> Option<&ProxyHandle> {
        self.proxy.as_ref()
    }

    /// How the STS readiness probe finished during setup
    pub fn readiness(&self) -> &ProbeOutcome {
        &self.readiness
    }

    pub fn fixtures(&self) -> &Fixtures {
        &self.fixtures
    }

    pub fn credentials(&self) -> &CredentialPaths {
        &self.config.credentials
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }
}

impl Drop for Env {
    fn drop(&mut self) {
        if !self.torn_down {
            warn!(
                test_id = self.config.test_id,
                "STS flow environment dropped without tear_down, services are aborted"
            );
        }
    }
}
