//! Threshold alerting on server samples and state.

mod notify;
mod rule;

pub use notify::{AlertMailer, LogNotifier, Notifier, SmtpMailer};
pub use rule::{Alert, AlertKind, AlertRule};

use crate::server::ServerSnapshot;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Evaluates alert rules and dispatches notifications.
///
/// Local notifications are delivered synchronously. Emails are spawned onto
/// the runtime and never block or fail the evaluation.
pub struct AlertEngine {
    rules: Mutex<Vec<AlertRule>>,
    notifier: Arc<dyn Notifier>,
    mailer: Option<Arc<dyn AlertMailer>>,
}

impl AlertEngine {
    pub fn new(notifier: Arc<dyn Notifier>, mailer: Option<Arc<dyn AlertMailer>>) -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            notifier,
            mailer,
        }
    }

    fn lock_rules(&self) -> MutexGuard<'_, Vec<AlertRule>> {
        self.rules.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.lock_rules().push(rule);
    }

    /// Remove a rule by id. Returns whether it existed.
    pub fn remove_rule(&self, rule_id: Uuid) -> bool {
        let mut rules = self.lock_rules();
        let before = rules.len();
        rules.retain(|r| r.id != rule_id);
        rules.len() != before
    }

    /// Copy of the current rules
    pub fn rules(&self) -> Vec<AlertRule> {
        self.lock_rules().clone()
    }

    /// Evaluate every rule targeting `server` against one reading.
    pub fn evaluate(&self, server: &ServerSnapshot, cpu_percent: f32, ram_bytes: u64) -> Vec<Alert> {
        self.evaluate_at(server, cpu_percent, ram_bytes, Local::now())
    }

    /// [`evaluate`](Self::evaluate) with an explicit clock.
    pub fn evaluate_at(
        &self,
        server: &ServerSnapshot,
        cpu_percent: f32,
        ram_bytes: u64,
        now: DateTime<Local>,
    ) -> Vec<Alert> {
        let mut fired = Vec::new();
        {
            let mut rules = self.lock_rules();
            for rule in rules.iter_mut().filter(|r| r.server_id == server.id) {
                let Some(message) = rule.check(server, cpu_percent, ram_bytes) else {
                    continue;
                };
                if !rule.cooldown_elapsed(now) {
                    continue;
                }
                rule.last_triggered = Some(now);

                let alert = Alert {
                    rule_id: rule.id,
                    server_id: server.id,
                    server_name: server.name.clone(),
                    kind: rule.kind,
                    message,
                    at: now,
                };
                let email = rule
                    .email_address
                    .clone()
                    .filter(|address| rule.notify_email && !address.is_empty());
                fired.push((alert, rule.notify_local, email));
            }
        }

        fired
            .into_iter()
            .map(|(alert, local, email)| {
                tracing::warn!(rule = %alert.rule_id, "Alert triggered: {}", alert.message);
                if local {
                    self.notifier.notify(&alert);
                }
                if let Some(address) = email {
                    self.dispatch_email(address, alert.clone());
                }
                alert
            })
            .collect()
    }

    fn dispatch_email(&self, address: String, alert: Alert) {
        let Some(mailer) = self.mailer.clone() else {
            tracing::warn!(to = %address, "Email alert requested but no mailer is configured");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(to = %address, "Email alert dropped: no async runtime");
            return;
        };
        runtime.spawn(async move {
            if let Err(e) = mailer.send(&address, &alert).await {
                tracing::error!(to = %address, error = %e, "Failed to send email alert");
            }
        });
    }
}
