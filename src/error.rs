/// Error handling module for Pulse Panel.
///
/// This module defines the error types used throughout the library.
/// Every variant carries a human-readable message so that the outermost
/// caller (a scheduled task, the CLI, a UI action) can decide whether to
/// display, log, or ignore it.
///
/// # Example
///
/// ```
/// use pulse_panel::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServerNotFound(id)) => println!("Server '{}' is not configured", id),
///         Err(Error::InvalidState { operation, state }) => {
///             println!("Cannot {} while the server is {}", operation, state)
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use crate::server::ServerState;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the pulse-panel library.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Required fields are missing
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration is valid JSON but contains invalid values.
    ///
    /// This error occurs when:
    /// - A server has an empty name or executable path
    /// - A port is zero
    /// - An alert rule targets a server that is not configured
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Requested server is not registered.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// A server with the same id or install path is already registered.
    #[error("Duplicate server: {0}")]
    DuplicateServer(String),

    /// A lifecycle operation was requested in a state that does not allow it.
    ///
    /// This error occurs when:
    /// - Starting a server that is not stopped or crashed
    /// - Stopping a server that is not running
    /// - Updating a server that still owns a process
    #[error("Cannot {operation} server while it is {state}")]
    InvalidState {
        /// Operation that was refused.
        operation: &'static str,
        /// State the server was in.
        state: ServerState,
    },

    /// The configured server executable does not exist.
    #[error("Server executable not found: {}", .0.display())]
    ExecutableNotFound(PathBuf),

    /// The installer tool does not exist at the configured path.
    #[error("Installer not found: {}. Please install SteamCMD first.", .0.display())]
    InstallerNotFound(PathBuf),

    /// Error when launching, polling, or terminating an external process.
    #[error("Process error: {0}")]
    Process(String),

    /// Archive creation, listing, pruning, or restore failed.
    #[error("Backup error: {0}")]
    Backup(String),

    /// The archive could not be read or contains unsafe entries.
    #[error("Invalid archive: {0}")]
    InvalidArchive(String),

    /// Metrics could not be persisted or read.
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// An alert email could not be built or delivered.
    #[error("Email error: {0}")]
    Email(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for pulse-panel operations.
pub type Result<T> = std::result::Result<T, Error>;
