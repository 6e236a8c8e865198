use crate::server::process::ProcessPoll;
use crate::server::sampler::{Sample, Sampler};
use crate::server::{ManagedServer, ServerId};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Capacity of the supervisor event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Supervisor configuration
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between liveness polls of each supervised process
    pub poll_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Event emitted by a supervision session
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    /// A resource reading of a live process
    Sample(Sample),
    /// The process exited while the server was running
    Crashed {
        server_id: ServerId,
        server_name: String,
        exit_code: Option<i32>,
        at: DateTime<Local>,
    },
}

struct SupervisionSession {
    server: Arc<ManagedServer>,
    task: JoinHandle<()>,
}

/// Polls supervised server processes for liveness and resource usage.
///
/// One supervisor runs any number of concurrent sessions keyed by server id,
/// with at most one session per server: supervising a server that already
/// has a session first cancels the old session and waits for it to finish.
/// A session ends by itself once it reports a crash.
pub struct ProcessSupervisor {
    sampler: Arc<Sampler>,
    config: SupervisorConfig,
    sessions: Mutex<HashMap<ServerId, SupervisionSession>>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl ProcessSupervisor {
    /// Create a new supervisor
    pub fn new(sampler: Arc<Sampler>, config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            sampler,
            config,
            sessions: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to samples and crash reports
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Begin polling `server`, replacing any existing session for it
    #[tracing::instrument(skip(self, server), fields(server = %server.name()))]
    pub async fn start_supervising(&self, server: Arc<ManagedServer>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.remove(&server.id()) {
            tracing::debug!("Replacing existing supervision session");
            Self::cancel(previous).await;
        }
        self.sampler.forget(server.id());

        let task = tokio::spawn(Self::run_session(
            Arc::clone(&server),
            Arc::clone(&self.sampler),
            self.events.clone(),
            self.config.poll_interval,
        ));
        tracing::info!("Supervision started");
        sessions.insert(server.id(), SupervisionSession { server, task });
    }

    /// Stop polling a server and release its cached readings.
    ///
    /// The session has fully terminated when this returns. Returns whether a
    /// session existed.
    pub async fn stop_supervising(&self, server_id: ServerId) -> bool {
        let session = self.sessions.lock().await.remove(&server_id);
        self.sampler.forget(server_id);
        match session {
            Some(session) => {
                tracing::info!(server = %session.server.name(), "Supervision stopped");
                Self::cancel(session).await;
                true
            }
            None => false,
        }
    }

    /// Stop every session
    pub async fn stop_all(&self) {
        let sessions: Vec<_> = self.sessions.lock().await.drain().collect();
        for (id, session) in sessions {
            self.sampler.forget(id);
            Self::cancel(session).await;
        }
    }

    /// Whether a live session exists for `server_id`
    pub async fn is_supervising(&self, server_id: ServerId) -> bool {
        self.sessions
            .lock()
            .await
            .get(&server_id)
            .is_some_and(|s| !s.task.is_finished())
    }

    /// Number of live sessions
    pub async fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| !s.task.is_finished())
            .count()
    }

    async fn cancel(session: SupervisionSession) {
        session.task.abort();
        if let Err(e) = session.task.await {
            if !e.is_cancelled() {
                tracing::warn!(server = %session.server.name(), error = %e, "Supervision task failed");
            }
        }
    }

    async fn run_session(
        server: Arc<ManagedServer>,
        sampler: Arc<Sampler>,
        events: broadcast::Sender<SupervisorEvent>,
        poll_interval: Duration,
    ) {
        let mut interval = time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match server.poll() {
                ProcessPoll::Alive { pid, uptime } => {
                    let Some(usage) = sampler.fetch_usage(server.id(), pid).await else {
                        tracing::debug!(server = %server.name(), pid, "No resource reading this tick");
                        continue;
                    };
                    let sample = Sample {
                        timestamp: Local::now(),
                        server_id: server.id(),
                        cpu_percent: usage.cpu_percent,
                        ram_bytes: usage.ram_bytes,
                        state: server.state(),
                        uptime,
                    };
                    let _ = events.send(SupervisorEvent::Sample(sample));
                }
                ProcessPoll::Crashed { exit_code } => {
                    tracing::error!(server = %server.name(), ?exit_code, "Server process crashed");
                    let _ = events.send(SupervisorEvent::Crashed {
                        server_id: server.id(),
                        server_name: server.name().to_string(),
                        exit_code,
                        at: Local::now(),
                    });
                    break;
                }
                ProcessPoll::Exited | ProcessPoll::NoProcess | ProcessPoll::Unavailable => {}
            }
        }
    }
}
