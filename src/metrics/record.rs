use crate::server::{Sample, ServerId, ServerState};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Persisted form of a [`Sample`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub timestamp: DateTime<Local>,
    pub server_id: ServerId,
    pub cpu_percent: f32,
    pub ram_bytes: u64,
    pub state: ServerState,
    /// Process uptime in whole seconds
    pub uptime_secs: u64,
}

impl From<Sample> for MetricRecord {
    fn from(sample: Sample) -> Self {
        Self {
            timestamp: sample.timestamp,
            server_id: sample.server_id,
            cpu_percent: sample.cpu_percent,
            ram_bytes: sample.ram_bytes,
            state: sample.state,
            uptime_secs: sample.uptime.as_secs(),
        }
    }
}
