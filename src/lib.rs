/*!
 # Pulse Panel

 Supervision, metrics, alerting and backups for dedicated game servers.

 ## Overview

 Pulse Panel provides functionality to:
 - Install and update server files with SteamCMD
 - Start, stop and restart server processes, detecting crashes
 - Sample CPU and memory usage and persist it as daily metrics files
 - Raise alerts on crashes and resource thresholds, locally and by email
 - Create full and incremental backups, prune them, and restore them

 ## Basic Usage

 ```no_run
 use pulse_panel::{PulsePanel, Result};

 #[tokio::main]
 async fn main() -> Result<()> {
     let panel = PulsePanel::from_config_file("pulse-panel.json")?;

     // Start every configured server and supervise until Ctrl-C
     panel
         .run(async {
             let _ = tokio::signal::ctrl_c().await;
         })
         .await
 }
 ```

 One-off operations work on a server id:

 ```no_run
 # use pulse_panel::{PulsePanel, Result};
 # async fn demo(panel: PulsePanel, id: pulse_panel::ServerId) -> Result<()> {
 let record = panel.backup_server(id).await?;
 println!("Created {} ({})", record.file_name, record.size_display());
 # Ok(())
 # }
 ```
*/

pub mod alert;
pub mod backup;
pub mod cache;
pub mod config;
pub mod error;
pub mod installer;
pub mod metrics;
pub mod retry;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{ServerId, ServerState};

use alert::{AlertEngine, AlertMailer, LogNotifier, Notifier, SmtpMailer};
use backup::{BackupEngine, BackupRecord, RestoreReport};
use chrono::{DateTime, Local};
use installer::{Installer, SteamCmd};
use metrics::{MetricRecord, MetricsStore};
use server::{
    LifecycleConfig, LifecycleManager, ManagedServer, ProcessSupervisor, ResourceProbe, Sampler, ServerRegistry,
    ServerSnapshot, SupervisorConfig, SupervisorEvent, SysinfoProbe, output,
};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Pluggable boundaries of a [`PulsePanel`]
pub struct Components {
    pub installer: Arc<dyn Installer>,
    pub probe: Arc<dyn ResourceProbe>,
    pub notifier: Arc<dyn Notifier>,
    pub mailer: Option<Arc<dyn AlertMailer>>,
}

impl Components {
    /// SteamCMD, `sysinfo`, log notifications, and SMTP when configured
    pub fn from_config(config: &Config) -> Self {
        Self {
            installer: Arc::new(SteamCmd::new(config.steamcmd_path.clone(), config.retry)),
            probe: Arc::new(SysinfoProbe::new()),
            notifier: Arc::new(LogNotifier),
            mailer: config
                .smtp()
                .map(|smtp| Arc::new(SmtpMailer::new(smtp)) as Arc<dyn AlertMailer>),
        }
    }
}

/// Owns the managed servers and every component acting on them.
///
/// All public operations are instrumented with `tracing` spans.
pub struct PulsePanel {
    config: Config,
    registry: Arc<ServerRegistry>,
    lifecycle: LifecycleManager,
    supervisor: Arc<ProcessSupervisor>,
    metrics: Arc<MetricsStore>,
    alerts: Arc<AlertEngine>,
    backups: BackupEngine,
}

impl PulsePanel {
    /// Load, validate and build from a configuration file
    #[tracing::instrument(skip(path), fields(config_path = ?path.as_ref()))]
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let config = Config::from_file(path)?;
        Self::new(config)
    }

    /// Build with the default components
    pub fn new(config: Config) -> Result<Self> {
        let components = Components::from_config(&config);
        Self::with_components(config, components)
    }

    /// Build with explicit components
    #[tracing::instrument(skip_all, fields(num_servers = config.servers.len()))]
    pub fn with_components(config: Config, components: Components) -> Result<Self> {
        crate::config::validate_config(&config)?;

        let registry = Arc::new(ServerRegistry::new());
        for server in &config.servers {
            registry.add(server.clone())?;
        }

        let timings = &config.timings;
        let lifecycle = LifecycleManager::new(
            components.installer,
            output::log_observer("server"),
            LifecycleConfig {
                stop_timeout: timings.stop_timeout(),
                restart_delay: timings.restart_delay(),
            },
        );
        let sampler = Arc::new(Sampler::new(components.probe, timings.sample_cache_ttl()));
        let supervisor = Arc::new(ProcessSupervisor::new(
            Arc::clone(&sampler),
            SupervisorConfig {
                poll_interval: timings.poll_interval(),
            },
        ));
        let metrics = Arc::new(MetricsStore::new(config.metrics_dir(), sampler));

        let alerts = Arc::new(AlertEngine::new(components.notifier, components.mailer));
        for rule in &config.alert_rules {
            alerts.add_rule(rule.clone());
        }

        let backups = BackupEngine::new(config.backup_dir(), config.backup.clone());

        tracing::info!("Pulse Panel ready");
        Ok(Self {
            config,
            registry,
            lifecycle,
            supervisor,
            metrics,
            alerts,
            backups,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ServerRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    pub fn metrics(&self) -> &MetricsStore {
        &self.metrics
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    pub fn backups(&self) -> &BackupEngine {
        &self.backups
    }

    /// Look up a server by id
    pub fn server(&self, id: ServerId) -> Result<Arc<ManagedServer>> {
        self.registry.get(id)
    }

    /// Start the server process, then supervise it and collect its metrics
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn start_server(&self, id: ServerId) -> Result<()> {
        let server = self.registry.get(id)?;
        self.lifecycle.start(&server).await?;
        self.supervisor.start_supervising(Arc::clone(&server)).await;
        self.metrics.register(server);
        Ok(())
    }

    /// End supervision, then stop the server process
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn stop_server(&self, id: ServerId) -> Result<()> {
        let server = self.registry.get(id)?;
        self.supervisor.stop_supervising(id).await;
        self.metrics.unregister(id);
        self.lifecycle.stop(&server).await
    }

    /// Stop, wait the restart delay, and start again.
    ///
    /// A server that is not running (stopped or crashed) is just started.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn restart_server(&self, id: ServerId) -> Result<()> {
        let server = self.registry.get(id)?;
        self.supervisor.stop_supervising(id).await;

        if server.state() == ServerState::Running {
            self.lifecycle.restart(&server).await?;
        } else {
            tracing::info!(state = %server.state(), "Server not running, starting instead of restarting");
            self.lifecycle.start(&server).await?;
        }

        self.supervisor.start_supervising(Arc::clone(&server)).await;
        self.metrics.register(server);
        Ok(())
    }

    /// Validate-install the server files. Returns whether the installer succeeded.
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn update_server(&self, id: ServerId) -> Result<bool> {
        let server = self.registry.get(id)?;
        let succeeded = self.lifecycle.install_or_update(&server).await?;
        if succeeded {
            tracing::info!(server = %server.name(), "Server files up to date");
        } else {
            tracing::warn!(server = %server.name(), "Installer reported failure");
        }
        Ok(succeeded)
    }

    /// Full backup followed by pruning with the configured retention
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn backup_server(&self, id: ServerId) -> Result<BackupRecord> {
        let server = self.registry.get(id)?;
        let record = self
            .backups
            .create_full(server.name(), &server.config().install_path)
            .await?;
        self.prune_backups(&server).await?;
        Ok(record)
    }

    /// Incremental or full backup per the selection policy, followed by pruning
    #[tracing::instrument(skip(self), fields(server_id = %id))]
    pub async fn scheduled_backup(&self, id: ServerId) -> Result<BackupRecord> {
        let server = self.registry.get(id)?;
        let record = self
            .backups
            .run_scheduled(server.name(), &server.config().install_path)
            .await?;
        self.prune_backups(&server).await?;
        Ok(record)
    }

    async fn prune_backups(&self, server: &ManagedServer) -> Result<()> {
        let deleted = self
            .backups
            .prune(server.name(), self.config.backup.retention_days)
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, "Pruned expired backups");
        }
        Ok(())
    }

    /// Archives of a server, newest first
    pub async fn list_backups(&self, id: ServerId) -> Result<Vec<BackupRecord>> {
        let server = self.registry.get(id)?;
        self.backups.list_backups(server.name()).await
    }

    /// Stop the server if running, then restore `archive` over its install directory.
    ///
    /// The server stays stopped afterwards.
    #[tracing::instrument(skip(self, archive), fields(server_id = %id, archive = %archive.as_ref().display()))]
    pub async fn restore_server(&self, id: ServerId, archive: impl AsRef<Path>) -> Result<RestoreReport> {
        let server = self.registry.get(id)?;
        self.supervisor.stop_supervising(id).await;
        self.metrics.unregister(id);

        let install_path = server.config().install_path.clone();
        self.lifecycle
            .while_stopped(&server, || self.backups.restore(archive, install_path))
            .await
    }

    /// Register installations found under `roots`, skipping servers already
    /// registered by id or install path. Returns the newly registered servers.
    #[tracing::instrument(skip(self))]
    pub fn scan_servers(&self, roots: &[PathBuf]) -> Vec<Arc<ManagedServer>> {
        let found = server::scanner::scan(roots);
        let added = server::scanner::register_scanned(&self.registry, found);
        tracing::info!(added = added.len(), "Server scan finished");
        added
    }

    /// Stored metrics of a server with `from <= timestamp <= to`, oldest first
    pub async fn query_metrics(
        &self,
        id: ServerId,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> Result<Vec<MetricRecord>> {
        self.registry.get(id)?;
        self.metrics.query(id, from, to).await
    }

    /// Start every server, then supervise, collect metrics and evaluate alerts
    /// until `shutdown` resolves. Running servers are stopped before returning.
    ///
    /// Alerts are evaluated on every supervisor sample and on every transition
    /// into Stopped or Crashed. Servers that are not running once startup is
    /// done are evaluated once with their current state.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut dispatchers = self.spawn_state_dispatch();
        dispatchers.push(self.spawn_sample_dispatch());
        let collector = Arc::clone(&self.metrics).spawn_collector(self.config.timings.metrics_interval());

        for server in self.registry.all() {
            if let Err(e) = self.start_server(server.id()).await {
                tracing::error!(server = %server.name(), error = %e, "Failed to start server");
            }
        }
        for server in self.registry.all() {
            if server.state() != ServerState::Running {
                self.alerts.evaluate(&server.snapshot(), 0.0, 0);
            }
        }

        shutdown.await;
        tracing::info!("Shutting down");

        collector.abort();
        for dispatcher in dispatchers {
            dispatcher.abort();
        }
        self.supervisor.stop_all().await;

        for server in self.registry.all() {
            self.metrics.unregister(server.id());
            if server.state() == ServerState::Running {
                if let Err(e) = self.lifecycle.stop(&server).await {
                    tracing::error!(server = %server.name(), error = %e, "Failed to stop server");
                }
            }
        }
        Ok(())
    }

    /// Feed supervisor resource samples into the alert engine
    fn spawn_sample_dispatch(&self) -> JoinHandle<()> {
        let mut events = self.supervisor.subscribe();
        let registry = Arc::clone(&self.registry);
        let alerts = Arc::clone(&self.alerts);

        tokio::spawn(async move {
            loop {
                let sample = match events.recv().await {
                    Ok(SupervisorEvent::Sample(sample)) => sample,
                    // Crashes reach the alert engine as state changes
                    Ok(SupervisorEvent::Crashed { .. }) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Alert dispatch fell behind supervisor events");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let Ok(server) = registry.get(sample.server_id) else {
                    continue;
                };
                let snapshot = ServerSnapshot {
                    id: sample.server_id,
                    name: server.name().to_string(),
                    state: sample.state,
                };
                alerts.evaluate(&snapshot, sample.cpu_percent, sample.ram_bytes);
            }
        })
    }

    /// Evaluate alerts whenever a registered server goes offline, one task per server
    fn spawn_state_dispatch(&self) -> Vec<JoinHandle<()>> {
        self.registry
            .all()
            .into_iter()
            .map(|server| {
                let mut changes = server.subscribe();
                let alerts = Arc::clone(&self.alerts);
                tokio::spawn(async move {
                    loop {
                        let change = match changes.recv().await {
                            Ok(change) => change,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(server = %server.name(), skipped, "Missed state changes");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        };
                        if !matches!(change.to, ServerState::Stopped | ServerState::Crashed) {
                            continue;
                        }
                        let snapshot = ServerSnapshot {
                            id: change.server_id,
                            name: change.server_name,
                            state: change.to,
                        };
                        alerts.evaluate(&snapshot, 0.0, 0);
                    }
                })
            })
            .collect()
    }
}
