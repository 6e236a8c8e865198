use crate::alert::AlertRule;
use crate::config::{Config, ServerConfig};
use crate::error::{Error, Result};
use std::collections::HashSet;

/// Validates a server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.name.trim().is_empty() {
        return Err(Error::ConfigInvalid(format!("Server {} has an empty name", config.id)));
    }

    if config.executable_path.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has an empty executable path",
            config.name
        )));
    }

    if config.install_path.as_os_str().is_empty() {
        return Err(Error::ConfigInvalid(format!(
            "Server '{}' has an empty install path",
            config.name
        )));
    }

    if config.port == 0 {
        return Err(Error::ConfigInvalid(format!("Server '{}' has an invalid port 0", config.name)));
    }

    Ok(())
}

/// Validates a list of server configurations, including uniqueness of ids and install paths
pub fn validate_server_configs(configs: &[ServerConfig]) -> Result<()> {
    let mut ids = HashSet::new();
    let mut paths = HashSet::new();

    for config in configs {
        validate_server_config(config)?;

        if !ids.insert(config.id) {
            return Err(Error::ConfigInvalid(format!("Duplicate server id {}", config.id)));
        }
        if !paths.insert(&config.install_path) {
            return Err(Error::ConfigInvalid(format!(
                "Install path {} is used by more than one server",
                config.install_path.display()
            )));
        }
    }

    Ok(())
}

/// Validates alert rules against the configured servers
pub fn validate_alert_rules(rules: &[AlertRule], servers: &[ServerConfig]) -> Result<()> {
    for rule in rules {
        if !servers.iter().any(|s| s.id == rule.server_id) {
            return Err(Error::ConfigInvalid(format!(
                "Alert rule {} targets unknown server {}",
                rule.id, rule.server_id
            )));
        }
        if !rule.threshold.is_finite() || rule.threshold < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "Alert rule {} has an invalid threshold {}",
                rule.id, rule.threshold
            )));
        }
    }

    Ok(())
}

/// Full configuration validation
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_configs(&config.servers)?;
    validate_alert_rules(&config.alert_rules, &config.servers)?;

    if config.backup.retention_days == 0 {
        return Err(Error::ConfigInvalid("Backup retention must be at least one day".to_string()));
    }
    if config.timings.poll_interval_ms == 0 || config.timings.metrics_interval_secs == 0 {
        return Err(Error::ConfigInvalid("Polling intervals must be non-zero".to_string()));
    }
    if !config.retry.backoff_factor.is_finite() || config.retry.backoff_factor < 1.0 {
        return Err(Error::ConfigInvalid(format!(
            "Retry backoff factor must be a finite number of at least 1, got {}",
            config.retry.backoff_factor
        )));
    }

    Ok(())
}
