use crate::fleet::{FleetReconciler, FleetRegistry, ReconcileReport, TelemetryQuery};
use crate::http::StatsServer;
use crate::runtime::config::SupervisorConfig;
use crate::runtime::{hints, telemetry};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Owns the fleet for the lifetime of the process: boots it from the config
/// file, reloads on SIGHUP and drains it on SIGINT/SIGTERM.
///
/// Reconciliation only ever happens on the task driving the runner, so passes
/// are serialized.
pub struct Runner {
    config_path: PathBuf,
    config: SupervisorConfig,
    reconciler: FleetReconciler,
    shutdown: CancellationToken,
    services: Option<Services>,
}

struct Services {
    token: CancellationToken,
    server: StatsServer,
    metrics: JoinHandle<()>,
}

impl Runner {
    /// Loads the configuration; failing here is fatal for the process.
    pub fn load(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();
        let config = SupervisorConfig::load(&config_path)?;
        Ok(Self::new(config_path, config))
    }

    pub fn new(config_path: impl Into<PathBuf>, config: SupervisorConfig) -> Self {
        let registry = Arc::new(FleetRegistry::new());
        let reconciler = FleetReconciler::new(registry, config.unit_options());
        Self {
            config_path: config_path.into(),
            config,
            reconciler,
            shutdown: CancellationToken::new(),
            services: None,
        }
    }

    /// Returns a clone of the root shutdown token so external callers can
    /// trigger the same drain as SIGTERM.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn query(&self) -> TelemetryQuery {
        TelemetryQuery::new(self.reconciler.registry())
    }

    /// Address of the stats server once [`start`](Self::start) returned.
    pub fn stats_address(&self) -> Option<std::net::SocketAddr> {
        self.services.as_ref().map(|services| services.server.local_addr())
    }

    /// Starts the configured fleet, the stats server and the metrics reporter.
    pub async fn start(&mut self) -> Result<ReconcileReport> {
        if self.config.hints_enabled() {
            hints::log_writeback_hints();
        }

        let report = self.reconciler.reconcile(self.config.cameras()).await;
        tracing::info!(units = self.reconciler.registry().len(), "capture units launched");

        if self.services.is_none() {
            let token = self.shutdown.child_token();
            let server =
                StatsServer::bind(self.config.listen_address(), self.query(), token.clone())
                    .await
                    .context("failed to start stats server")?;
            let metrics = telemetry::spawn_metrics_reporter(
                self.query(),
                token.clone(),
                self.config.metrics_interval(),
            );
            self.services = Some(Services {
                token,
                server,
                metrics,
            });
        }
        Ok(report)
    }

    /// Re-reads the config file and reconciles towards it. A broken file
    /// leaves the running fleet untouched.
    pub async fn reload(&mut self) -> Result<ReconcileReport> {
        let config = SupervisorConfig::load(&self.config_path)?;
        self.apply(config).await
    }

    /// Reconciles towards `config`. The listen address and log level are only
    /// read at startup.
    pub async fn apply(&mut self, config: SupervisorConfig) -> Result<ReconcileReport> {
        if config.listen_address() != self.config.listen_address() {
            tracing::warn!(
                current = %self.config.listen_address(),
                requested = %config.listen_address(),
                "listen_address changes take effect after a restart"
            );
        }
        if config.log_level() != self.config.log_level() {
            tracing::warn!(
                current = %self.config.log_level(),
                requested = %config.log_level(),
                "log_level changes take effect after a restart"
            );
        }

        self.reconciler.set_options(config.unit_options());
        let report = self.reconciler.reconcile(config.cameras()).await;
        self.config = config;
        Ok(report)
    }

    /// Stops the stats server and the reporter, then drains every unit.
    pub async fn shutdown(&mut self) {
        if let Some(services) = self.services.take() {
            services.token.cancel();
            services.server.shutdown().await;
            if let Err(err) = services.metrics.await {
                tracing::warn!(error = %err, "metrics reporter task panicked");
            }
        }
        self.reconciler.shutdown().await;
    }

    /// Runs until SIGINT/SIGTERM or until the shutdown token is cancelled,
    /// reloading on every SIGHUP.
    pub async fn run_until_signalled(&mut self) -> Result<()> {
        let mut hangup = signal(SignalKind::hangup()).context("failed to watch SIGHUP")?;
        let mut interrupt = signal(SignalKind::interrupt()).context("failed to watch SIGINT")?;
        let mut terminate = signal(SignalKind::terminate()).context("failed to watch SIGTERM")?;

        if let Err(err) = self.start().await {
            self.shutdown().await;
            return Err(err);
        }
        tracing::info!("runner started; SIGHUP reloads, SIGINT/SIGTERM stop");

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!(
                        path = %self.config_path.display(),
                        "SIGHUP received; reloading configuration"
                    );
                    match self.reload().await {
                        Ok(report) => tracing::info!(?report, "configuration reloaded"),
                        Err(err) => tracing::warn!(
                            error = %format!("{err:#}"),
                            "reload failed; keeping current fleet"
                        ),
                    }
                }
                _ = interrupt.recv() => {
                    tracing::info!("SIGINT received; shutting down runner");
                    break;
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received; shutting down runner");
                    break;
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("runner shutdown token cancelled");
                    break;
                }
            }
        }

        self.shutdown.cancel();
        self.shutdown().await;
        Ok(())
    }
}
