//! Resource sampling for supervised processes.
//!
//! A [`ResourceProbe`] performs the (comparatively expensive) OS query and a
//! [`Sampler`] fronts it with the shared [`Cache`] so that the supervisor's
//! poll and the metrics collector do not both hit the OS in the same window.

use crate::cache::Cache;
use crate::server::{ManagedServer, ServerId, ServerState};
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// CPU and memory usage of one process
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ResourceUsage {
    /// CPU usage as a percentage of the whole machine
    pub cpu_percent: f32,
    /// Resident memory in bytes
    pub ram_bytes: u64,
}

/// One point-in-time reading for a server
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Local>,
    pub server_id: ServerId,
    pub cpu_percent: f32,
    pub ram_bytes: u64,
    pub state: ServerState,
    pub uptime: Duration,
}

/// Reads resource usage of a process by pid.
pub trait ResourceProbe: Send + Sync {
    /// Returns `None` when the process cannot be inspected.
    fn probe(&self, pid: u32) -> Option<ResourceUsage>;
}

/// [`ResourceProbe`] backed by `sysinfo`.
///
/// The `System` is kept between calls because CPU usage is computed from
/// the difference between two refreshes.
pub struct SysinfoProbe {
    system: Mutex<System>,
    cpu_count: f32,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f32;
        Self {
            system: Mutex::new(System::new()),
            cpu_count,
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn probe(&self, pid: u32) -> Option<ResourceUsage> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let pid = Pid::from_u32(pid);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cpu().with_memory(),
        );
        let process = system.process(pid)?;
        Some(ResourceUsage {
            cpu_percent: process.cpu_usage() / self.cpu_count,
            ram_bytes: process.memory(),
        })
    }
}

/// Cached front for a [`ResourceProbe`], shared by all observers.
pub struct Sampler {
    probe: Arc<dyn ResourceProbe>,
    cache: Cache<ServerId, ResourceUsage>,
}

impl Sampler {
    /// Wrap `probe`, caching each reading for `ttl`.
    pub fn new(probe: Arc<dyn ResourceProbe>, ttl: Duration) -> Self {
        Self {
            probe,
            cache: Cache::new(ttl),
        }
    }

    /// Resource usage of `pid`, served from cache when fresh.
    pub fn usage(&self, server_id: ServerId, pid: u32) -> Option<ResourceUsage> {
        if let Some(usage) = self.cache.get(&server_id) {
            return Some(usage);
        }
        let usage = self.probe.probe(pid)?;
        self.cache.set(server_id, usage);
        Some(usage)
    }

    /// [`usage`](Self::usage) with the OS query run on the blocking pool.
    pub async fn fetch_usage(self: &Arc<Self>, server_id: ServerId, pid: u32) -> Option<ResourceUsage> {
        if let Some(usage) = self.cache.get(&server_id) {
            return Some(usage);
        }
        let sampler = Arc::clone(self);
        match tokio::task::spawn_blocking(move || sampler.usage(server_id, pid)).await {
            Ok(usage) => usage,
            Err(e) => {
                tracing::warn!(%server_id, error = %e, "Resource probe task failed");
                None
            }
        }
    }

    /// Sample a server regardless of state; usage is zero without a live process.
    pub fn sample(&self, server: &ManagedServer) -> Sample {
        let state = server.state();
        let (usage, uptime) = match (server.pid(), server.uptime()) {
            (Some(pid), Some(uptime)) => (self.usage(server.id(), pid).unwrap_or_default(), uptime),
            _ => (ResourceUsage::default(), Duration::ZERO),
        };
        Sample {
            timestamp: Local::now(),
            server_id: server.id(),
            cpu_percent: usage.cpu_percent,
            ram_bytes: usage.ram_bytes,
            state,
            uptime,
        }
    }

    /// Drop any cached reading for a server.
    pub fn forget(&self, server_id: ServerId) {
        self.cache.remove(&server_id);
    }
}
