use crate::alert::AlertRule;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::server::ServerId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for a single managed game server.
///
/// # Examples
///
/// ```
/// use pulse_panel::config::ServerConfig;
///
/// let mut server_config = ServerConfig::new("valheim", "/srv/valheim", "/srv/valheim/valheim_server.x86_64");
/// server_config.app_id = "896660".to_string();
/// server_config.launch_args = r#"-name "My Server" -port 2456"#.to_string();
/// server_config.port = 2456;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique identifier; generated when absent from the file.
    #[serde(default)]
    pub id: ServerId,

    /// Display name, also used as the backup archive prefix.
    pub name: String,

    /// Human-readable game title.
    #[serde(default)]
    pub game_name: String,

    /// Steam application id passed to the installer.
    #[serde(default)]
    pub app_id: String,

    /// Root directory of the server installation.
    pub install_path: PathBuf,

    /// Server executable; its directory becomes the working directory.
    pub executable_path: PathBuf,

    /// Launch arguments as a single string; double quotes group words.
    #[serde(default)]
    pub launch_args: String,

    /// Game network port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    27015
}

impl ServerConfig {
    /// Minimal configuration with a fresh id and default port
    pub fn new(
        name: impl Into<String>,
        install_path: impl Into<PathBuf>,
        executable_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: ServerId::new(),
            name: name.into(),
            game_name: String::new(),
            app_id: String::new(),
            install_path: install_path.into(),
            executable_path: executable_path.into(),
            launch_args: String::new(),
            port: default_port(),
        }
    }
}

/// Polling and scheduling intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Supervisor poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Lifetime of cached resource readings in milliseconds.
    pub sample_cache_ttl_ms: u64,
    /// Metrics collection interval in seconds.
    pub metrics_interval_secs: u64,
    /// How long a stop waits for the process to exit, in seconds.
    pub stop_timeout_secs: u64,
    /// Pause between stop and start on restart, in seconds.
    pub restart_delay_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            sample_cache_ttl_ms: 2000,
            metrics_interval_secs: 60,
            stop_timeout_secs: 5,
            restart_delay_secs: 5,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.sample_cache_ttl_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Backup retention settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    /// Archives older than this many days are pruned.
    pub retention_days: u32,
    /// A full backup younger than this many days is the base for incrementals.
    pub full_backup_max_age_days: u32,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention_days: 30,
            full_backup_max_age_days: 7,
        }
    }
}

/// SMTP settings for alert emails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// SMTP server hostname.
    pub host: String,
    /// SMTP server port (STARTTLS).
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    /// RFC 5322 "From" address.
    #[serde(default = "default_from_address")]
    pub from_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_from_address() -> String {
    "pulse-panel@localhost".to_string()
}

impl SmtpConfig {
    /// Load SMTP settings from `SMTP_HOST`, `SMTP_PORT`, `SMTP_FROM`,
    /// `SMTP_USER`, and `SMTP_PASSWORD`. Returns `None` without `SMTP_HOST`.
    pub fn from_env() -> Option<Self> {
        let host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            host,
            port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(default_smtp_port),
            from_address: std::env::var("SMTP_FROM").unwrap_or_else(|_| default_from_address()),
            username: std::env::var("SMTP_USER").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

/// Main configuration for Pulse Panel.
///
/// # JSON Schema
///
/// ```json
/// {
///   "steamcmd_path": "/usr/games/steamcmd",
///   "data_dir": "/var/lib/pulse-panel",
///   "servers": [
///     {
///       "id": "5f1c2b9e-3a57-4c1e-9d1e-0d8c9f4c2a11",
///       "name": "cs2",
///       "game_name": "Counter-Strike 2",
///       "app_id": "730",
///       "install_path": "/srv/cs2",
///       "executable_path": "/srv/cs2/game/bin/linuxsteamrt64/cs2",
///       "launch_args": "-dedicated +map de_dust2",
///       "port": 27015
///     }
///   ],
///   "alert_rules": [
///     {
///       "server_id": "5f1c2b9e-3a57-4c1e-9d1e-0d8c9f4c2a11",
///       "kind": "HighCpu",
///       "threshold": 80.0
///     }
///   ]
/// }
/// ```
///
/// # Examples
///
/// ```no_run
/// use pulse_panel::config::Config;
///
/// let config = Config::from_file("pulse-panel.json").unwrap();
/// println!("Loaded configuration with {} servers", config.servers.len());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Path of the SteamCMD executable.
    #[serde(default = "default_steamcmd_path")]
    pub steamcmd_path: PathBuf,

    /// Base directory for backups, metrics, and logs unless overridden.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Backup directory; defaults to `<data_dir>/backups`.
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    /// Metrics directory; defaults to `<data_dir>/metrics`.
    #[serde(default)]
    pub metrics_dir: Option<PathBuf>,

    /// Log directory; defaults to `<data_dir>/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Managed servers.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Alert rules.
    #[serde(default)]
    pub alert_rules: Vec<AlertRule>,

    /// SMTP settings; `SMTP_*` environment variables are used when absent.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,

    #[serde(default)]
    pub timings: TimingConfig,

    #[serde(default)]
    pub backup: BackupSettings,

    /// Retry policy for installer invocation.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Directories whose subdirectories are scanned for server installations.
    #[serde(default = "default_scan_paths")]
    pub scan_paths: Vec<PathBuf>,
}

fn default_steamcmd_path() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\steamcmd\steamcmd.exe")
    } else {
        PathBuf::from("/usr/games/steamcmd")
    }
}

fn default_scan_paths() -> Vec<PathBuf> {
    let paths: &[&str] = if cfg!(windows) {
        &[
            r"C:\GameServers",
            r"C:\SteamCMD",
            r"C:\Steam",
            r"C:\Program Files (x86)\Steam\steamapps\common",
            r"C:\Program Files\Steam\steamapps\common",
        ]
    } else {
        &["/srv/gameservers", "/opt/gameservers", "/home/steam/steamapps/common"]
    };
    paths.iter().map(PathBuf::from).collect()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("pulse-panel-data")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            steamcmd_path: default_steamcmd_path(),
            data_dir: default_data_dir(),
            backup_dir: None,
            metrics_dir: None,
            log_dir: None,
            servers: Vec::new(),
            alert_rules: Vec::new(),
            smtp: None,
            timings: TimingConfig::default(),
            backup: BackupSettings::default(),
            retry: RetryPolicy::default(),
            scan_paths: default_scan_paths(),
        }
    }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.backup_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("backups"))
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.metrics_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("metrics"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }

    /// Configured SMTP settings, falling back to the environment.
    pub fn smtp(&self) -> Option<SmtpConfig> {
        self.smtp.clone().or_else(SmtpConfig::from_env)
    }
}
