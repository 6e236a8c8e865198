#![cfg(unix)]

use async_trait::async_trait;
use mockall::mock;
use pulse_panel::alert::{Alert, AlertKind, AlertRule, LogNotifier, Notifier};
use pulse_panel::config::{Config, ServerConfig};
use pulse_panel::error::{Error, Result};
use pulse_panel::installer::Installer;
use pulse_panel::server::output::OutputObserver;
use pulse_panel::server::{ResourceProbe, ResourceUsage, ServerId, ServerState};
use pulse_panel::{Components, PulsePanel};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

mock! {
    pub InstallerMock {}

    #[async_trait]
    impl Installer for InstallerMock {
        fn ensure_available(&self) -> Result<()>;
        async fn install_or_update(&self, server: &ServerConfig, observer: OutputObserver) -> Result<bool>;
    }
}

struct FixedProbe;

impl ResourceProbe for FixedProbe {
    fn probe(&self, _pid: u32) -> Option<ResourceUsage> {
        Some(ResourceUsage {
            cpu_percent: 3.0,
            ram_bytes: 1024,
        })
    }
}

fn config(data_dir: &Path) -> Config {
    let install = data_dir.join("ark");
    std::fs::create_dir_all(install.join("saves")).unwrap();
    std::fs::write(install.join("saves/world.sav"), "world").unwrap();

    let mut server = ServerConfig::new("ark", install, "/bin/sh");
    server.launch_args = r#"-c "exec sleep 30""#.to_string();

    let mut config = Config {
        data_dir: data_dir.to_path_buf(),
        ..Config::default()
    };
    config.servers.push(server);
    config.timings.poll_interval_ms = 50;
    config.timings.restart_delay_secs = 0;
    config
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Alert>>);

impl Notifier for RecordingNotifier {
    fn notify(&self, alert: &Alert) {
        self.0.lock().unwrap().push(alert.clone());
    }
}

impl RecordingNotifier {
    fn kinds(&self) -> Vec<AlertKind> {
        self.0.lock().unwrap().iter().map(|a| a.kind).collect()
    }
}

/// Panel with Offline and Crash rules on the first server, recording notifications
fn alerting_panel(mut config: Config) -> (PulsePanel, ServerId, Arc<RecordingNotifier>) {
    let id = config.servers[0].id;
    config.alert_rules.push(AlertRule::new(id, AlertKind::Offline, 0.0));
    config.alert_rules.push(AlertRule::new(id, AlertKind::Crash, 0.0));

    let notifier = Arc::new(RecordingNotifier::default());
    let panel = PulsePanel::with_components(
        config,
        Components {
            installer: Arc::new(MockInstallerMock::new()),
            probe: Arc::new(FixedProbe),
            notifier: Arc::clone(&notifier) as Arc<dyn Notifier>,
            mailer: None,
        },
    )
    .unwrap();
    (panel, id, notifier)
}

fn panel_with(config: Config, installer: MockInstallerMock) -> Result<PulsePanel> {
    PulsePanel::with_components(
        config,
        Components {
            installer: Arc::new(installer),
            probe: Arc::new(FixedProbe),
            notifier: Arc::new(LogNotifier),
            mailer: None,
        },
    )
}

fn panel(data_dir: &Path) -> (PulsePanel, ServerId) {
    let config = config(data_dir);
    let id = config.servers[0].id;
    (panel_with(config, MockInstallerMock::new()).unwrap(), id)
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(temp.path());
    let duplicate = config.servers[0].clone();
    config.servers.push(ServerConfig {
        id: ServerId::new(),
        ..duplicate
    });

    let result = panel_with(config, MockInstallerMock::new());
    assert!(matches!(result, Err(Error::ConfigInvalid(_))));
}

#[tokio::test]
async fn test_start_and_stop_server() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let (panel, id) = panel(temp.path());

    panel.start_server(id).await?;
    assert_eq!(panel.server(id)?.state(), ServerState::Running);
    assert!(panel.supervisor().is_supervising(id).await);
    assert!(panel.metrics().registered().contains(&id));

    panel.stop_server(id).await?;
    assert_eq!(panel.server(id)?.state(), ServerState::Stopped);
    assert!(!panel.supervisor().is_supervising(id).await);
    assert!(panel.metrics().registered().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_restart_of_stopped_server_starts_it() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let (panel, id) = panel(temp.path());

    panel.restart_server(id).await?;
    let first_pid = panel.server(id)?.pid();
    assert_eq!(panel.server(id)?.state(), ServerState::Running);

    panel.restart_server(id).await?;
    assert_ne!(panel.server(id)?.pid(), first_pid);
    assert_eq!(panel.supervisor().session_count().await, 1);

    panel.stop_server(id).await?;
    Ok(())
}

/// Whether a process with `pid` exists
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[test]
fn test_restarted_server_outlives_the_invoking_runtime() {
    let temp = tempfile::tempdir().unwrap();
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let pid = runtime.block_on(async {
        let (panel, id) = panel(temp.path());
        panel.restart_server(id).await.unwrap();
        panel.server(id).unwrap().pid().unwrap()
    });
    drop(runtime);
    std::thread::sleep(Duration::from_millis(300));

    let alive = process_alive(pid);
    let _ = std::process::Command::new("kill").arg(pid.to_string()).status();
    assert!(alive, "server process {} exited with the runtime", pid);
}

#[tokio::test]
async fn test_unknown_server() {
    let temp = tempfile::tempdir().unwrap();
    let (panel, _) = panel(temp.path());

    let result = panel.start_server(ServerId::new()).await;
    assert!(matches!(result, Err(Error::ServerNotFound(_))));
}

#[tokio::test]
async fn test_update_server() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let config = config(temp.path());
    let id = config.servers[0].id;

    let mut installer = MockInstallerMock::new();
    installer.expect_ensure_available().returning(|| Ok(()));
    installer
        .expect_install_or_update()
        .withf(|server, _| server.name == "ark")
        .times(1)
        .returning(|_, _| Ok(false));
    let panel = panel_with(config, installer)?;

    assert!(!panel.update_server(id).await?);
    assert_eq!(panel.server(id)?.state(), ServerState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_backup_then_restore_running_server() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let (panel, id) = panel(temp.path());

    let record = panel.backup_server(id).await?;
    assert_eq!(panel.list_backups(id).await?.len(), 1);
    assert!(record.path.starts_with(temp.path().join("backups")));

    panel.start_server(id).await?;
    let report = panel.restore_server(id, &record.path).await?;

    assert_eq!(report.files_restored, 1);
    assert!(report.previous_install.is_some());
    assert_eq!(panel.server(id)?.state(), ServerState::Stopped);
    assert!(!panel.supervisor().is_supervising(id).await);
    Ok(())
}

#[tokio::test]
async fn test_run_until_shutdown() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let (panel, id) = panel(temp.path());
    let server = panel.server(id)?;

    panel
        .run(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            assert_eq!(server.state(), ServerState::Running);
        })
        .await?;

    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(panel.supervisor().session_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn test_offline_alert_on_intentional_stop() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let (panel, id, notifier) = alerting_panel(config(temp.path()));

    panel
        .run(async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(notifier.kinds().is_empty());

            panel.stop_server(id).await.unwrap();
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await?;

    assert_eq!(notifier.kinds(), vec![AlertKind::Offline]);
    let alerts = notifier.0.lock().unwrap();
    assert_eq!(alerts[0].message, "Server ark is offline");
    Ok(())
}

#[tokio::test]
async fn test_offline_alert_when_start_fails() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(temp.path());
    config.servers[0].executable_path = temp.path().join("missing/server");
    let (panel, id, notifier) = alerting_panel(config);

    panel
        .run(async {
            tokio::time::sleep(Duration::from_millis(100)).await;
        })
        .await?;

    assert_eq!(panel.server(id)?.state(), ServerState::Stopped);
    assert_eq!(notifier.kinds(), vec![AlertKind::Offline]);
    Ok(())
}

#[tokio::test]
async fn test_crash_alerts_from_state_change() -> Result<()> {
    let temp = tempfile::tempdir().unwrap();
    let mut config = config(temp.path());
    config.servers[0].launch_args = r#"-c "sleep 0.2; exit 3""#.to_string();
    let (panel, id, notifier) = alerting_panel(config);

    panel
        .run(async {
            tokio::time::sleep(Duration::from_millis(600)).await;
        })
        .await?;

    assert_eq!(panel.server(id)?.state(), ServerState::Crashed);
    let mut kinds = notifier.kinds();
    kinds.sort_by_key(|k| k.to_string());
    assert_eq!(kinds, vec![AlertKind::Crash, AlertKind::Offline]);
    Ok(())
}
