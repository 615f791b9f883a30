//! Daemon wiring: lock, provisioning, controllers, control socket, loop.

use crate::config::{Config, ConfigError, ConfigStore};
use crate::http_server::MetricsServer;
use crate::metrics::MetricsRegistry;
use crate::rpc::RpcServer;
use crate::supervisor::LifecycleSupervisor;
use common::LogHandle;
use gateway::{
    CommandRunner, ControlFlags, ControlPlane, FailoverSettings, FailoverStateMachine,
    InterfaceController, ReachabilityProbe, Role, RoleLock, RoleStrategy, SystemRunner,
    TickReport, UbusReloader, UciFirewallRule, UciInterface, checker_for, provision_interface,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Tick reports buffered for the metrics consumer
const REPORT_CHANNEL_SIZE: usize = 32;

/// Reasons the daemon refuses to start
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid settings: {0}")]
    Settings(common::Error),

    #[error(transparent)]
    Locked(common::Error),

    #[error("Startup failed: {0}")]
    Other(#[from] anyhow::Error),
}

impl StartupError {
    /// Process exit status for this failure
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Config(_) | StartupError::Settings(_) => 2,
            StartupError::Locked(_) => 3,
            StartupError::Other(_) => 1,
        }
    }
}

/// The virtualgw daemon
pub struct Daemon {
    config: Config,
    config_path: PathBuf,
    role_override: Option<Role>,
    logs: Option<LogHandle>,
    runner: Arc<dyn CommandRunner>,
    checker: Option<Arc<dyn ReachabilityProbe>>,
}

impl Daemon {
    /// Create a daemon from a loaded configuration
    ///
    /// # Arguments
    /// * `config` - Validated configuration
    /// * `config_path` - File re-read on reload
    /// * `role_override` - Role given on the command line, applied on every reload
    pub fn new(config: Config, config_path: impl Into<PathBuf>, role_override: Option<Role>) -> Self {
        Self {
            config,
            config_path: config_path.into(),
            role_override,
            logs: None,
            runner: Arc::new(SystemRunner::new()),
            checker: None,
        }
    }

    /// Let SIGUSR1 toggle debug logging through `logs`
    pub fn with_log_handle(mut self, logs: LogHandle) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Run OS commands through `runner` instead of spawning processes
    pub fn with_runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Use `checker` for reachability attempts instead of the configured kind
    pub fn with_checker(mut self, checker: Arc<dyn ReachabilityProbe>) -> Self {
        self.checker = Some(checker);
        self
    }

    /// Run until `cancel` fires or a terminating signal arrives
    pub async fn run(self, cancel: CancellationToken) -> Result<(), StartupError> {
        let settings = self.config.to_failover_settings()?;
        settings.validate().map_err(StartupError::Settings)?;
        let role = settings.role;

        info!(
            role = %role,
            target = %settings.probe.target,
            config = %self.config_path.display(),
            "Starting virtualgw"
        );

        // Single instance per role
        let locks = RoleLock::new(&self.config.lock.dir);
        for path in locks.clean_stale() {
            info!(path = %path.display(), "Removed stale lock file");
        }
        let handle = locks.acquire(role).map_err(|e| {
            if e.is_already_locked() {
                StartupError::Locked(e)
            } else {
                StartupError::Other(e.into())
            }
        })?;

        let flags = Arc::new(ControlFlags::new());
        let supervisor = LifecycleSupervisor::new(cancel.clone(), flags.clone()).with_lock(handle);
        let signals = supervisor.install().map_err(anyhow::Error::from)?;

        let result = self.serve(settings, supervisor.clone(), flags).await;

        supervisor.shutdown();
        signals.abort();
        info!(role = %role, "virtualgw stopped");
        result
    }

    async fn serve(
        self,
        settings: FailoverSettings,
        supervisor: LifecycleSupervisor,
        flags: Arc<ControlFlags>,
    ) -> Result<(), StartupError> {
        let cancel = supervisor.cancel_token();

        if self.config.interface.provision {
            provision_interface(self.runner.as_ref(), &settings.interface)
                .await
                .map_err(anyhow::Error::from)?;
        }

        let (gateway, ping_responder) = self.controllers(&settings);
        let store = Arc::new(ConfigStore::new(
            &self.config_path,
            self.role_override,
            settings.clone(),
        ));

        let metrics = if self.config.metrics.enabled {
            info!(listen_addr = %self.config.metrics.listen_addr, "Metrics enabled");
            Some(Arc::new(MetricsRegistry::new()))
        } else {
            info!("Metrics disabled");
            None
        };

        // Control socket
        let plane = Arc::new(ControlPlane::new(gateway.clone(), store.clone()));
        let rpc = RpcServer::new(&self.config.control.socket, plane, metrics.clone());
        let listener = rpc.bind().map_err(anyhow::Error::from)?;
        let rpc_handle = tokio::spawn(rpc.serve(listener, cancel.clone()));

        // Metrics endpoint and tick consumer
        let mut report_tx = None;
        if let Some(registry) = &metrics {
            let server =
                MetricsServer::new(registry.clone(), self.config.metrics.listen_addr.clone());
            let token = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run(token).await {
                    warn!(error = %e, "Metrics server error");
                }
            });

            let (tx, rx) = mpsc::channel(REPORT_CHANNEL_SIZE);
            tokio::spawn(record_reports(rx, registry.clone(), gateway.clone()));
            report_tx = Some(tx);
        }

        let checker = self
            .checker
            .clone()
            .unwrap_or_else(|| checker_for(&settings.probe.kind, self.runner.clone()));

        let mut machine =
            FailoverStateMachine::new(store.subscribe(), checker, gateway, ping_responder)
                .with_flags(flags, store);
        if let Some(logs) = self.logs {
            machine = machine.with_debug_toggle(Arc::new(logs));
        }
        if let Some(tx) = report_tx {
            machine = machine.with_reports(tx);
        }

        machine.run(cancel.clone()).await;

        cancel.cancel();
        if let Err(e) = rpc_handle.await {
            error!(error = %e, "Control socket task failed");
        }
        Ok(())
    }

    fn controllers(
        &self,
        settings: &FailoverSettings,
    ) -> (Arc<InterfaceController>, Option<Arc<InterfaceController>>) {
        let reloader = Arc::new(UbusReloader::new(self.runner.clone()));

        let gateway = Arc::new(InterfaceController::gateway(
            Arc::new(UciInterface::new(
                settings.interface.name.clone(),
                self.runner.clone(),
            )),
            reloader.clone(),
            settings.confirm,
        ));

        let ping_responder = RoleStrategy::for_role(settings.role)
            .manages_ping_responder
            .then(|| {
                Arc::new(InterfaceController::ping_responder(
                    Arc::new(UciFirewallRule::new(
                        settings.ping_responder_rule.clone(),
                        self.runner.clone(),
                    )),
                    reloader,
                    settings.confirm,
                ))
            });

        (gateway, ping_responder)
    }
}

/// Feed tick reports into the metrics registry
async fn record_reports(
    mut reports: mpsc::Receiver<TickReport>,
    metrics: Arc<MetricsRegistry>,
    gateway: Arc<InterfaceController>,
) {
    while let Some(report) = reports.recv().await {
        metrics.record_tick(&report);
        metrics.set_gateway_status(gateway.current_status().await);
    }
}
