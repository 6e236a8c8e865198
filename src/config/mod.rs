//! Configuration module for Pulse Panel.
//!
//! This module handles parsing, validation, and access to configuration
//! settings: the managed servers, alert rules, SMTP settings, directories,
//! and timing knobs. Configuration is stored as JSON.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use pulse_panel::config::{Config, validate_config};
//!
//! let config = Config::from_file("pulse-panel.json").unwrap();
//! validate_config(&config).unwrap();
//! println!("Loaded configuration with {} servers", config.servers.len());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use pulse_panel::config::{Config, ServerConfig};
//!
//! let mut config = Config::default();
//! config.servers.push(ServerConfig::new("rust", "/srv/rust", "/srv/rust/RustDedicated"));
//! ```
mod parser;
pub mod validator;

pub use parser::{BackupSettings, Config, ServerConfig, SmtpConfig, TimingConfig};
pub use validator::validate_config;
