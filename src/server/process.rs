// src/server/process.rs
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::output::{self, OutputObserver};
use async_process::{Child, Command, Stdio};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of each server's state-change channel.
const STATE_CHANNEL_CAPACITY: usize = 64;

/// Unique identifier for a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(Uuid);

impl ServerId {
    /// Generate a fresh random identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ServerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ServerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::ServerNotFound(format!("'{}' is not a valid server id: {}", s, e)))
    }
}

/// Lifecycle state of a managed server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerState {
    /// No process is running
    Stopped,
    /// A process has been launched and is being handed over
    Starting,
    /// The process is running
    Running,
    /// The process is being terminated on request
    Stopping,
    /// The installer tool is validating or updating the install directory
    Updating,
    /// The process exited while it was supposed to be running
    Crashed,
}

impl ServerState {
    /// Whether a process handle is held in this state.
    pub fn has_process(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Updating => "updating",
            Self::Crashed => "crashed",
        };
        f.write_str(name)
    }
}

/// A state transition published to subscribers
#[derive(Debug, Clone)]
pub struct StateChange {
    pub server_id: ServerId,
    pub server_name: String,
    pub from: ServerState,
    pub to: ServerState,
    pub at: DateTime<Local>,
}

/// Point-in-time view of a server's identity and state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSnapshot {
    pub id: ServerId,
    pub name: String,
    pub state: ServerState,
}

/// Outcome of a single liveness poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessPoll {
    /// No process handle is held
    NoProcess,
    /// The process is alive
    Alive { pid: u32, uptime: Duration },
    /// The process exited while the server was running; state is now Crashed
    Crashed { exit_code: Option<i32> },
    /// The process exited during an intentional stop
    Exited,
    /// The process could not be queried this tick
    Unavailable,
}

/// A live external server process
pub struct ServerProcess {
    child: Child,
    pid: u32,
    started_at: Instant,
}

impl ServerProcess {
    /// Launch the server executable with its launch arguments.
    ///
    /// The working directory is the executable's directory. Stdout and stderr
    /// are forwarded line by line to `observer`. The process is not tied to the
    /// handle: it keeps running when the handle or this program goes away.
    pub(crate) fn spawn(config: &ServerConfig, observer: &OutputObserver) -> Result<Self> {
        let executable = Path::new(&config.executable_path);
        let mut command = Command::new(executable);
        command.args(split_args(&config.launch_args));

        if let Some(dir) = executable.parent().filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            output::forward_lines(stdout, observer.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            output::forward_lines(stderr, observer.clone());
        }

        Ok(Self {
            pid: child.id(),
            child,
            started_at: Instant::now(),
        })
    }

    /// OS process id
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Time since launch
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

struct ServerSlot {
    state: ServerState,
    process: Option<ServerProcess>,
}

/// A server under management.
///
/// State and process handle live behind one lock so that the pair is always
/// observed consistently: a handle is held exactly when the state is
/// Starting, Running, or Stopping. Lifecycle operations on one server are
/// serialized through a separate async lock.
pub struct ManagedServer {
    config: ServerConfig,
    slot: Mutex<ServerSlot>,
    lifecycle: tokio::sync::Mutex<()>,
    events: broadcast::Sender<StateChange>,
}

impl ManagedServer {
    /// Create a stopped server from its configuration
    pub fn new(config: ServerConfig) -> Self {
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            config,
            slot: Mutex::new(ServerSlot {
                state: ServerState::Stopped,
                process: None,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn id(&self) -> ServerId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.slot().state
    }

    /// Whether a process handle is currently held
    pub fn has_process(&self) -> bool {
        self.slot().process.is_some()
    }

    /// Process id of the live process, if any
    pub fn pid(&self) -> Option<u32> {
        self.slot().process.as_ref().map(ServerProcess::pid)
    }

    /// Uptime of the live process, if any
    pub fn uptime(&self) -> Option<Duration> {
        self.slot().process.as_ref().map(ServerProcess::uptime)
    }

    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            id: self.id(),
            name: self.config.name.clone(),
            state: self.state(),
        }
    }

    /// Subscribe to this server's state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.events.subscribe()
    }

    fn slot(&self) -> MutexGuard<'_, ServerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn lock_lifecycle(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lifecycle.lock().await
    }

    fn transition(&self, slot: &mut ServerSlot, to: ServerState) {
        let from = slot.state;
        slot.state = to;
        tracing::debug!(server = %self.config.name, %from, %to, "State transition");
        let _ = self.events.send(StateChange {
            server_id: self.id(),
            server_name: self.config.name.clone(),
            from,
            to,
            at: Local::now(),
        });
    }

    /// Move to a state that holds no process (Stopped, Updating).
    pub(crate) fn set_idle_state(&self, to: ServerState) {
        debug_assert!(!to.has_process());
        let mut slot = self.slot();
        slot.process = None;
        if slot.state != to {
            self.transition(&mut slot, to);
        }
    }

    /// Hand a freshly launched process over: Starting, then Running.
    pub(crate) fn attach_process(&self, process: ServerProcess) {
        let mut slot = self.slot();
        slot.process = Some(process);
        self.transition(&mut slot, ServerState::Starting);
        self.transition(&mut slot, ServerState::Running);
    }

    /// Leave Running for Stopping, then send the kill signal.
    ///
    /// The state changes before the kill so that a supervisor tick observing
    /// the exit never reports it as a crash.
    pub(crate) fn begin_stop(&self) -> Result<()> {
        let mut slot = self.slot();
        if slot.state != ServerState::Running || slot.process.is_none() {
            return Err(Error::InvalidState {
                operation: "stop",
                state: slot.state,
            });
        }
        self.transition(&mut slot, ServerState::Stopping);

        if let Some(process) = slot.process.as_mut() {
            if let Err(e) = process.child.kill() {
                tracing::debug!(server = %self.config.name, error = %e, "Kill failed, process may have already exited");
            }
        }
        Ok(())
    }

    /// Whether the held process has exited (true when no process is held).
    pub(crate) fn process_exited(&self) -> bool {
        let mut slot = self.slot();
        match slot.process.as_mut() {
            Some(process) => match process.child.try_status() {
                Ok(status) => status.is_some(),
                Err(e) => {
                    tracing::debug!(server = %self.config.name, error = %e, "Failed to query process status");
                    false
                }
            },
            None => true,
        }
    }

    /// Release the process handle and settle in Stopped.
    pub(crate) fn finish_stop(&self) {
        self.set_idle_state(ServerState::Stopped);
    }

    /// One supervisor liveness check.
    ///
    /// An exit observed while Running atomically moves the server to Crashed
    /// and drops the handle, so a crash is reported exactly once.
    pub(crate) fn poll(&self) -> ProcessPoll {
        let mut slot = self.slot();
        let state = slot.state;
        let Some(process) = slot.process.as_mut() else {
            return ProcessPoll::NoProcess;
        };

        match process.child.try_status() {
            Ok(None) => ProcessPoll::Alive {
                pid: process.pid,
                uptime: process.uptime(),
            },
            Ok(Some(status)) if state == ServerState::Running => {
                slot.process = None;
                self.transition(&mut slot, ServerState::Crashed);
                ProcessPoll::Crashed {
                    exit_code: status.code(),
                }
            }
            Ok(Some(_)) => ProcessPoll::Exited,
            Err(e) => {
                tracing::warn!(server = %self.config.name, error = %e, "Process information unavailable");
                ProcessPoll::Unavailable
            }
        }
    }
}

impl fmt::Debug for ManagedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedServer")
            .field("id", &self.id())
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Split a launch argument string on whitespace, keeping double-quoted runs together.
pub fn split_args(args: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    result.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        result.push(current);
    }
    result
}
