//! Invocation of the external installer/updater tool (SteamCMD).

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::server::output::{self, OutputObserver};
use async_process::{Command, Stdio};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Installs or validates a server's files.
#[async_trait]
pub trait Installer: Send + Sync {
    /// Fails with a user-actionable error when the tool itself is missing.
    fn ensure_available(&self) -> Result<()>;

    /// Run a validate-install for `server`, streaming output to `observer`.
    ///
    /// Returns `Ok(true)` when the tool exits with code 0 and `Ok(false)`
    /// for any other exit code.
    async fn install_or_update(&self, server: &ServerConfig, observer: OutputObserver) -> Result<bool>;
}

/// [`Installer`] that shells out to `steamcmd`.
#[derive(Debug, Clone)]
pub struct SteamCmd {
    path: PathBuf,
    retry: RetryPolicy,
}

impl SteamCmd {
    pub fn new(path: impl Into<PathBuf>, retry: RetryPolicy) -> Self {
        Self {
            path: path.into(),
            retry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Command line for a validate-install of `app_id` into `install_path`.
    pub fn validate_args(install_path: &Path, app_id: &str) -> Vec<String> {
        vec![
            "+force_install_dir".to_string(),
            install_path.display().to_string(),
            "+login".to_string(),
            "anonymous".to_string(),
            "+app_update".to_string(),
            app_id.to_string(),
            "validate".to_string(),
            "+quit".to_string(),
        ]
    }
}

#[async_trait]
impl Installer for SteamCmd {
    fn ensure_available(&self) -> Result<()> {
        if self.path.is_file() {
            Ok(())
        } else {
            Err(Error::InstallerNotFound(self.path.clone()))
        }
    }

    async fn install_or_update(&self, server: &ServerConfig, observer: OutputObserver) -> Result<bool> {
        self.ensure_available()?;
        let args = Self::validate_args(&server.install_path, &server.app_id);
        tracing::info!(server = %server.name, app_id = %server.app_id, "Running installer");

        let path = &self.path;
        let args = &args;
        let mut child = self
            .retry
            .run("spawn installer", move || async move {
                Command::new(path)
                    .args(args)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()
            })
            .await
            .map_err(|e| Error::Process(format!("Failed to start installer: {}", e)))?;

        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(output::forward_lines(stdout, observer.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(output::forward_lines(stderr, observer.clone()));
        }

        let status = child
            .status()
            .await
            .map_err(|e| Error::Process(format!("Failed to wait for installer: {}", e)))?;

        for reader in readers {
            let _ = reader.await;
        }

        tracing::info!(server = %server.name, code = ?status.code(), "Installer finished");
        Ok(status.success())
    }
}
