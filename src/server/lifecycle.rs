use crate::error::{Error, Result};
use crate::installer::Installer;
use crate::server::output::OutputObserver;
use crate::server::{ManagedServer, ServerProcess, ServerState};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Interval between exit checks while waiting for a stopped process
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lifecycle manager configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long `stop` waits for the killed process to exit
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart
    pub restart_delay: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// Drives install/update, start, stop, and restart of managed servers.
///
/// Every operation takes the server's lifecycle lock, so operations against
/// one server never interleave while different servers proceed in parallel.
///
/// ```text
/// Stopped -> Starting -> Running -> Stopping -> Stopped
/// Running -> Crashed (detected by the supervisor) -> Starting
/// Stopped -> Updating -> Stopped
/// ```
pub struct LifecycleManager {
    installer: Arc<dyn Installer>,
    observer: OutputObserver,
    config: LifecycleConfig,
}

impl LifecycleManager {
    /// Create a lifecycle manager; process and installer output goes to `observer`
    pub fn new(installer: Arc<dyn Installer>, observer: OutputObserver, config: LifecycleConfig) -> Self {
        Self {
            installer,
            observer,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Validate-install the server's files with the installer tool.
    ///
    /// The server passes through Updating and always ends in Stopped; the
    /// outcome is the returned flag (`true` on exit code 0).
    #[tracing::instrument(skip(self, server), fields(server = %server.name()))]
    pub async fn install_or_update(&self, server: &ManagedServer) -> Result<bool> {
        let _guard = server.lock_lifecycle().await;

        let state = server.state();
        if !matches!(state, ServerState::Stopped | ServerState::Crashed) {
            return Err(Error::InvalidState {
                operation: "update",
                state,
            });
        }
        if let Err(e) = self.installer.ensure_available() {
            (self.observer)(&e.to_string());
            return Err(e);
        }

        server.set_idle_state(ServerState::Updating);
        let result = self
            .installer
            .install_or_update(server.config(), self.observer.clone())
            .await;
        server.set_idle_state(ServerState::Stopped);

        match &result {
            Ok(true) => tracing::info!("Update completed"),
            Ok(false) => {
                tracing::warn!("Installer reported failure");
                (self.observer)(&format!("Update of {} failed", server.name()));
            }
            Err(e) => {
                tracing::error!(error = %e, "Update failed");
                (self.observer)(&format!("Error updating server: {}", e));
            }
        }
        result
    }

    /// Launch the server process.
    ///
    /// Only a Stopped or Crashed server can be started. A missing executable
    /// leaves the state untouched; a launch failure settles in Stopped.
    #[tracing::instrument(skip(self, server), fields(server = %server.name()))]
    pub async fn start(&self, server: &ManagedServer) -> Result<()> {
        let _guard = server.lock_lifecycle().await;
        self.start_locked(server)
    }

    fn start_locked(&self, server: &ManagedServer) -> Result<()> {
        let state = server.state();
        if !matches!(state, ServerState::Stopped | ServerState::Crashed) {
            return Err(Error::InvalidState {
                operation: "start",
                state,
            });
        }

        let executable = &server.config().executable_path;
        if !executable.is_file() {
            let e = Error::ExecutableNotFound(executable.clone());
            (self.observer)(&e.to_string());
            return Err(e);
        }

        match ServerProcess::spawn(server.config(), &self.observer) {
            Ok(process) => {
                let pid = process.pid();
                server.attach_process(process);
                tracing::info!(pid, "Server started");
                (self.observer)(&format!("Server {} started successfully.", server.name()));
                Ok(())
            }
            Err(e) => {
                server.set_idle_state(ServerState::Stopped);
                tracing::error!(error = %e, "Failed to start server");
                (self.observer)(&format!("Error starting server: {}", e));
                Err(e)
            }
        }
    }

    /// Terminate a running server, waiting up to the stop timeout for exit.
    #[tracing::instrument(skip(self, server), fields(server = %server.name()))]
    pub async fn stop(&self, server: &ManagedServer) -> Result<()> {
        let _guard = server.lock_lifecycle().await;
        self.stop_locked(server).await
    }

    async fn stop_locked(&self, server: &ManagedServer) -> Result<()> {
        server.begin_stop()?;

        let deadline = Instant::now() + self.config.stop_timeout;
        while !server.process_exited() {
            if Instant::now() >= deadline {
                tracing::warn!(
                    timeout_ms = self.config.stop_timeout.as_millis() as u64,
                    "Process did not exit before the stop timeout"
                );
                break;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        server.finish_stop();
        tracing::info!("Server stopped");
        (self.observer)(&format!("Server {} stopped.", server.name()));
        Ok(())
    }

    /// Stop, wait the restart delay, then start. Both halves must succeed.
    #[tracing::instrument(skip(self, server), fields(server = %server.name()))]
    pub async fn restart(&self, server: &ManagedServer) -> Result<()> {
        let _guard = server.lock_lifecycle().await;
        self.stop_locked(server).await?;
        tokio::time::sleep(self.config.restart_delay).await;
        self.start_locked(server)
    }

    /// Run `operation` while holding the lifecycle lock, stopping the server first if it is running.
    ///
    /// Nothing can start the server until `operation` completes.
    pub async fn while_stopped<F, Fut, T>(&self, server: &ManagedServer, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = server.lock_lifecycle().await;
        if server.state() == ServerState::Running {
            self.stop_locked(server).await?;
        }
        operation().await
    }
}
