//! Time-series persistence of server samples.
//!
//! Records are stored as one pretty-printed JSON array per calendar day
//! (`metrics_YYYYMMDD.json`). Appends merge with what is already on disk, so
//! history only ever grows.

mod record;

pub use record::MetricRecord;

use crate::error::{Error, Result};
use crate::server::{ManagedServer, Sampler, ServerId};
use chrono::{DateTime, Local, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Periodically samples registered servers and answers range queries.
pub struct MetricsStore {
    dir: PathBuf,
    sampler: Arc<Sampler>,
    servers: Mutex<HashMap<ServerId, Arc<ManagedServer>>>,
    write_lock: tokio::sync::Mutex<()>,
}

impl MetricsStore {
    /// Create a store writing day files under `dir`
    pub fn new(dir: impl Into<PathBuf>, sampler: Arc<Sampler>) -> Self {
        Self {
            dir: dir.into(),
            sampler,
            servers: Mutex::new(HashMap::new()),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn servers(&self) -> MutexGuard<'_, HashMap<ServerId, Arc<ManagedServer>>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Include a server in collection. Returns false if it was already registered.
    pub fn register(&self, server: Arc<ManagedServer>) -> bool {
        self.servers().insert(server.id(), server).is_none()
    }

    /// Exclude a server from collection. Returns false if it was not registered.
    pub fn unregister(&self, server_id: ServerId) -> bool {
        self.servers().remove(&server_id).is_some()
    }

    pub fn registered(&self) -> Vec<ServerId> {
        self.servers().keys().copied().collect()
    }

    /// Path of the day file for `date`
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("metrics_{}.json", date.format("%Y%m%d")))
    }

    /// Sample every registered server and append the records in one write per day file.
    ///
    /// Returns the number of records written; zero (and no I/O) when nothing is registered.
    pub async fn collect_once(&self) -> Result<usize> {
        let servers: Vec<_> = self.servers().values().cloned().collect();
        if servers.is_empty() {
            return Ok(0);
        }

        let sampler = Arc::clone(&self.sampler);
        let records: Vec<MetricRecord> = tokio::task::spawn_blocking(move || {
            servers
                .iter()
                .map(|server| MetricRecord::from(sampler.sample(server)))
                .collect()
        })
        .await
        .map_err(|e| Error::Metrics(format!("Metrics sampling task failed: {}", e)))?;
        let count = records.len();
        self.append(records).await?;
        tracing::debug!(count, "Collected metrics");
        Ok(count)
    }

    /// Append records to their day files, merging with existing contents.
    pub async fn append(&self, records: Vec<MetricRecord>) -> Result<()> {
        let mut by_day: BTreeMap<NaiveDate, Vec<MetricRecord>> = BTreeMap::new();
        for record in records {
            by_day
                .entry(record.timestamp.date_naive())
                .or_default()
                .push(record);
        }
        if by_day.is_empty() {
            return Ok(());
        }

        let _guard = self.write_lock.lock().await;
        let files: Vec<_> = by_day
            .into_iter()
            .map(|(date, records)| (self.day_file(date), records))
            .collect();
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || {
            fs::create_dir_all(&dir)
                .map_err(|e| Error::Metrics(format!("Failed to create {}: {}", dir.display(), e)))?;
            for (path, records) in files {
                merge_append(&path, records)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| Error::Metrics(format!("Metrics writer task failed: {}", e)))?
    }

    /// Records for `server_id` with `from <= timestamp <= to`, oldest first.
    ///
    /// Unreadable or corrupt day files are skipped with a warning.
    pub async fn query(
        &self,
        server_id: ServerId,
        from: DateTime<Local>,
        to: DateTime<Local>,
    ) -> Result<Vec<MetricRecord>> {
        if from > to {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut date = from.date_naive();
        while date <= to.date_naive() {
            paths.push(self.day_file(date));
            match date.succ_opt() {
                Some(next) => date = next,
                None => break,
            }
        }

        tokio::task::spawn_blocking(move || {
            let mut records: Vec<MetricRecord> = paths
                .iter()
                .filter(|path| path.exists())
                .filter_map(|path| match read_day_file(path) {
                    Ok(records) => Some(records),
                    Err(e) => {
                        tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable metrics file");
                        None
                    }
                })
                .flatten()
                .filter(|r| r.server_id == server_id && r.timestamp >= from && r.timestamp <= to)
                .collect();
            records.sort_by_key(|r| r.timestamp);
            records
        })
        .await
        .map_err(|e| Error::Metrics(format!("Metrics reader task failed: {}", e)))
    }

    /// Spawn the collection timer; the first collection happens one interval from now.
    pub fn spawn_collector(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = self.collect_once().await {
                    tracing::error!(error = %e, "Metrics collection failed");
                }
            }
        })
    }
}

fn read_day_file(path: &Path) -> Result<Vec<MetricRecord>> {
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Metrics(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::Serialization(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Read-modify-write of one day file. A corrupt file is moved aside, not overwritten.
fn merge_append(path: &Path, records: Vec<MetricRecord>) -> Result<()> {
    let mut existing = if path.exists() {
        match read_day_file(path) {
            Ok(existing) => existing,
            Err(e) => {
                let aside = path.with_extension(format!("json.corrupt-{}", Local::now().format("%H%M%S")));
                tracing::warn!(file = %path.display(), moved_to = %aside.display(), error = %e, "Moving corrupt metrics file aside");
                fs::rename(path, &aside)
                    .map_err(|e| Error::Metrics(format!("Failed to move {} aside: {}", path.display(), e)))?;
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };
    existing.extend(records);

    let json = serde_json::to_string_pretty(&existing)
        .map_err(|e| Error::Serialization(format!("Failed to serialize metrics: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|e| Error::Metrics(format!("Failed to write {}: {}", tmp.display(), e)))?;
    fs::rename(&tmp, path).map_err(|e| Error::Metrics(format!("Failed to replace {}: {}", path.display(), e)))
}
