use crate::server::{ServerId, ServerSnapshot, ServerState};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Condition an alert rule watches for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    /// Server state is Crashed
    Crash,
    /// CPU percent above the threshold
    HighCpu,
    /// Resident memory in MiB above the threshold
    HighMemory,
    /// Server state is Stopped or Crashed
    Offline,
    /// A game update is available; raised by the update checker, never by sampling
    UpdateAvailable,
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Crash => "crash",
            Self::HighCpu => "high CPU",
            Self::HighMemory => "high memory",
            Self::Offline => "offline",
            Self::UpdateAvailable => "update available",
        };
        f.write_str(name)
    }
}

fn new_rule_id() -> Uuid {
    Uuid::new_v4()
}

fn default_true() -> bool {
    true
}

fn default_cooldown_secs() -> u64 {
    15 * 60
}

/// A threshold rule bound to one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    #[serde(default = "new_rule_id")]
    pub id: Uuid,
    pub server_id: ServerId,
    pub kind: AlertKind,
    /// Meaning depends on the kind: percent for HighCpu, MiB for HighMemory
    #[serde(default)]
    pub threshold: f64,
    /// Raise a local notification
    #[serde(default = "default_true")]
    pub notify_local: bool,
    /// Send an email to `email_address`
    #[serde(default)]
    pub notify_email: bool,
    #[serde(default)]
    pub email_address: Option<String>,
    /// Last time the rule fired; only the alert engine writes this
    #[serde(default)]
    pub last_triggered: Option<DateTime<Local>>,
    /// Minimum seconds between two firings
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

impl AlertRule {
    /// Rule with local notification only and the default 15 minute cooldown
    pub fn new(server_id: ServerId, kind: AlertKind, threshold: f64) -> Self {
        Self {
            id: new_rule_id(),
            server_id,
            kind,
            threshold,
            notify_local: true,
            notify_email: false,
            email_address: None,
            last_triggered: None,
            cooldown_secs: default_cooldown_secs(),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = cooldown.as_secs();
        self
    }

    pub fn with_email(mut self, address: impl Into<String>) -> Self {
        self.notify_email = true;
        self.email_address = Some(address.into());
        self
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    /// Alert message if the rule's condition holds for this reading.
    pub fn check(&self, server: &ServerSnapshot, cpu_percent: f32, ram_bytes: u64) -> Option<String> {
        match self.kind {
            AlertKind::Crash if server.state == ServerState::Crashed => {
                Some(format!("Server {} has crashed", server.name))
            }
            AlertKind::HighCpu if f64::from(cpu_percent) > self.threshold => Some(format!(
                "Server {} CPU usage is {:.1}% (threshold: {}%)",
                server.name, cpu_percent, self.threshold
            )),
            AlertKind::HighMemory => {
                // Whole MiB, partial megabytes do not count towards the threshold
                let ram_mib = ram_bytes / BYTES_PER_MIB;
                (ram_mib as f64 > self.threshold).then(|| {
                    format!(
                        "Server {} memory usage is {} MB (threshold: {} MB)",
                        server.name, ram_mib, self.threshold
                    )
                })
            }
            AlertKind::Offline
                if matches!(server.state, ServerState::Stopped | ServerState::Crashed) =>
            {
                Some(format!("Server {} is offline", server.name))
            }
            _ => None,
        }
    }

    /// Whether more than the cooldown has passed since the last firing.
    pub fn cooldown_elapsed(&self, now: DateTime<Local>) -> bool {
        match self.last_triggered {
            None => true,
            Some(last) => (now - last).to_std().is_ok_and(|since| since > self.cooldown()),
        }
    }
}

/// A fired alert
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub rule_id: Uuid,
    pub server_id: ServerId,
    pub server_name: String,
    pub kind: AlertKind,
    pub message: String,
    pub at: DateTime<Local>,
}
