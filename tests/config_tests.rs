use assert_fs::prelude::*;
use pulse_panel::alert::AlertKind;
use pulse_panel::config::{Config, ServerConfig, validate_config};
use pulse_panel::error::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;

const SERVER_ID: &str = "6f1c1f0e-3f6b-4a7e-9f57-2f4f0c6d9a10";

fn full_config() -> String {
    format!(
        r#"{{
        "steamcmd_path": "/opt/steamcmd/steamcmd.sh",
        "data_dir": "/var/lib/pulse-panel",
        "backup_dir": "/mnt/backups",
        "servers": [
            {{
                "id": "{SERVER_ID}",
                "name": "valheim",
                "game_name": "Valheim",
                "app_id": "896660",
                "install_path": "/srv/valheim",
                "executable_path": "/srv/valheim/valheim_server.x86_64",
                "launch_args": "-name \"My Server\" -port 2456",
                "port": 2456
            }}
        ],
        "alert_rules": [
            {{
                "server_id": "{SERVER_ID}",
                "kind": "HighCpu",
                "threshold": 80.0,
                "notify_email": true,
                "email_address": "ops@example.com"
            }}
        ],
        "timings": {{ "poll_interval_ms": 500 }},
        "backup": {{ "retention_days": 14 }},
        "retry": {{ "max_retries": 5 }}
    }}"#
    )
}

#[test]
fn test_parse_config() -> Result<()> {
    let config = Config::parse_from_str(&full_config())?;

    assert_eq!(config.steamcmd_path, PathBuf::from("/opt/steamcmd/steamcmd.sh"));
    assert_eq!(config.servers.len(), 1);

    let server = &config.servers[0];
    assert_eq!(server.id.to_string(), SERVER_ID);
    assert_eq!(server.app_id, "896660");
    assert_eq!(server.port, 2456);

    let rule = &config.alert_rules[0];
    assert_eq!(rule.kind, AlertKind::HighCpu);
    assert_eq!(rule.server_id, server.id);
    assert!(rule.notify_local);
    assert!(rule.notify_email);
    assert_eq!(rule.cooldown_secs, 15 * 60);
    assert!(rule.last_triggered.is_none());

    assert_eq!(config.timings.poll_interval(), Duration::from_millis(500));
    assert_eq!(config.timings.metrics_interval(), Duration::from_secs(60));
    assert_eq!(config.backup.retention_days, 14);
    assert_eq!(config.backup.full_backup_max_age_days, 7);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.base_delay_ms, 1000);

    assert_eq!(config.backup_dir(), PathBuf::from("/mnt/backups"));
    assert_eq!(config.metrics_dir(), PathBuf::from("/var/lib/pulse-panel/metrics"));
    assert_eq!(config.log_dir(), PathBuf::from("/var/lib/pulse-panel/logs"));

    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_missing_server_id_is_generated() -> Result<()> {
    let config = Config::parse_from_str(
        r#"{
            "servers": [
                { "name": "a", "install_path": "/srv/a", "executable_path": "/srv/a/a" },
                { "name": "b", "install_path": "/srv/b", "executable_path": "/srv/b/b" }
            ]
        }"#,
    )?;

    assert_ne!(config.servers[0].id, config.servers[1].id);
    validate_config(&config)?;
    Ok(())
}

#[test]
fn test_invalid_json() {
    let result = Config::parse_from_str(r#"{ "servers": [ { "name": "x" "#);
    assert!(matches!(result, Err(Error::ConfigParse(_))));
}

#[test]
fn test_config_from_file() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let file = temp.child("pulse-panel.json");
    file.write_str(&full_config()).unwrap();

    let config = Config::from_file(file.path())?;
    assert_eq!(config.servers[0].name, "valheim");

    let missing = Config::from_file(temp.child("missing.json").path());
    assert!(matches!(missing, Err(Error::ConfigParse(_))));
    Ok(())
}

#[test]
fn test_validate_rejects_shared_install_path() {
    let mut config = Config::default();
    config.servers.push(ServerConfig::new("a", "/srv/shared", "/srv/shared/a"));
    config.servers.push(ServerConfig::new("b", "/srv/shared", "/srv/shared/b"));

    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));
}

#[test]
fn test_validate_rejects_rule_for_unknown_server() -> Result<()> {
    let mut config = Config::parse_from_str(&full_config())?;
    config.servers.clear();

    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));
    Ok(())
}

#[test]
fn test_validate_rejects_bad_values() {
    let mut config = Config::default();
    config.servers.push(ServerConfig::new(" ", "/srv/a", "/srv/a/a"));
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    let mut server = ServerConfig::new("a", "/srv/a", "/srv/a/a");
    server.port = 0;
    config.servers.push(server);
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    config.backup.retention_days = 0;
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    config.timings.poll_interval_ms = 0;
    assert!(validate_config(&config).is_err());

    let mut config = Config::default();
    config.retry.backoff_factor = f64::INFINITY;
    assert!(matches!(validate_config(&config), Err(Error::ConfigInvalid(_))));

    let mut config = Config::default();
    config.retry.backoff_factor = 0.5;
    assert!(validate_config(&config).is_err());
}
