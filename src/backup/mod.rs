//! Full and incremental zip backups of server install directories.
//!
//! The backup directory is the only source of truth: records are derived by
//! parsing archive file names (`{server}_{Full|Incremental}_{yyyyMMdd_HHmmss}.zip`),
//! and anything that does not parse is ignored.

mod archive;
mod naming;
mod policy;

pub use naming::{BackupKind, BackupRecord};
pub use policy::{BackupPlan, select};

use crate::config::BackupSettings;
use crate::error::{Error, Result};
use chrono::{DateTime, Local, TimeDelta};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of a restore
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
    /// Number of files extracted
    pub files_restored: usize,
    /// Where the previous install directory was moved, if there was one
    pub previous_install: Option<PathBuf>,
}

/// Creates, lists, prunes and restores archives in one backup directory.
#[derive(Debug, Clone)]
pub struct BackupEngine {
    backup_dir: PathBuf,
    settings: BackupSettings,
}

async fn blocking<T, F>(operation: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::Backup(format!("Backup worker failed: {}", e)))?
}

impl BackupEngine {
    pub fn new(backup_dir: impl Into<PathBuf>, settings: BackupSettings) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            settings,
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    /// Archive the whole install directory.
    ///
    /// The returned record carries the exact capture time, taken before the
    /// directory walk, so it can be used as the `since` of a later incremental.
    #[tracing::instrument(skip(self, install_path), fields(install = %install_path.as_ref().display()))]
    pub async fn create_full(&self, server_name: &str, install_path: impl AsRef<Path>) -> Result<BackupRecord> {
        self.create(server_name, install_path.as_ref(), BackupKind::Full, None)
            .await
    }

    /// Archive only files modified strictly after `since`.
    #[tracing::instrument(skip(self, install_path), fields(install = %install_path.as_ref().display()))]
    pub async fn create_incremental(
        &self,
        server_name: &str,
        install_path: impl AsRef<Path>,
        since: DateTime<Local>,
    ) -> Result<BackupRecord> {
        self.create(server_name, install_path.as_ref(), BackupKind::Incremental, Some(since))
            .await
    }

    async fn create(
        &self,
        server_name: &str,
        install_path: &Path,
        kind: BackupKind,
        since: Option<DateTime<Local>>,
    ) -> Result<BackupRecord> {
        let created_at = Local::now();
        let file_name = naming::archive_name(server_name, kind, created_at);
        let archive_file = file_name.clone();
        let backup_dir = self.backup_dir.clone();
        let install_path = install_path.to_path_buf();

        let (path, entries, size) = blocking(move || {
            if !install_path.is_dir() {
                return Err(Error::Backup(format!(
                    "Install directory {} does not exist",
                    install_path.display()
                )));
            }
            fs::create_dir_all(&backup_dir)
                .map_err(|e| Error::Backup(format!("Failed to create {}: {}", backup_dir.display(), e)))?;

            let root = install_path
                .canonicalize()
                .map_err(|e| Error::Backup(format!("Failed to resolve {}: {}", install_path.display(), e)))?;
            let backup_dir = backup_dir
                .canonicalize()
                .map_err(|e| Error::Backup(format!("Failed to resolve {}: {}", backup_dir.display(), e)))?;
            let exclude = backup_dir.starts_with(&root).then_some(backup_dir.as_path());

            let path = backup_dir.join(&archive_file);
            if path.exists() {
                return Err(Error::Backup(format!("Archive {} already exists", path.display())));
            }
            let entries = archive::write_archive(&root, &path, exclude, since)?;
            let size = fs::metadata(&path)
                .map_err(|e| Error::Backup(format!("Failed to stat {}: {}", path.display(), e)))?
                .len();
            Ok((path, entries, size))
        })
        .await?;

        let record = BackupRecord {
            file_name,
            path,
            created_at,
            size,
            kind,
        };
        tracing::info!(
            archive = %record.file_name,
            entries,
            size = %record.size_display(),
            "Created {} backup",
            kind
        );
        Ok(record)
    }

    /// Archives of `server_name`, newest first. A missing directory yields an empty list.
    pub async fn list_backups(&self, server_name: &str) -> Result<Vec<BackupRecord>> {
        let backup_dir = self.backup_dir.clone();
        let server_name = server_name.to_string();
        blocking(move || list_dir(&backup_dir, &server_name)).await
    }

    /// Delete archives older than `retention_days`. Returns how many were deleted.
    pub async fn prune(&self, server_name: &str, retention_days: u32) -> Result<usize> {
        self.prune_at(server_name, retention_days, Local::now()).await
    }

    /// [`prune`](Self::prune) with an explicit clock. An archive exactly at the
    /// cutoff is kept; failures to delete are logged and skipped.
    pub async fn prune_at(&self, server_name: &str, retention_days: u32, now: DateTime<Local>) -> Result<usize> {
        let cutoff = now - TimeDelta::days(i64::from(retention_days));
        let records = self.list_backups(server_name).await?;

        blocking(move || Ok(remove_expired(&records, cutoff))).await
    }

    /// Choose between an incremental and a full backup for `existing` archives.
    pub fn select(&self, existing: &[BackupRecord], now: DateTime<Local>) -> BackupPlan {
        let max_age = Duration::from_secs(u64::from(self.settings.full_backup_max_age_days) * 24 * 60 * 60);
        select(existing, now, max_age)
    }

    /// Apply the selection policy and create the chosen archive.
    pub async fn run_scheduled(&self, server_name: &str, install_path: impl AsRef<Path>) -> Result<BackupRecord> {
        let existing = self.list_backups(server_name).await?;
        match self.select(&existing, Local::now()) {
            BackupPlan::Full => self.create_full(server_name, install_path).await,
            BackupPlan::Incremental { since } => {
                self.create_incremental(server_name, install_path, since)
                    .await
            }
        }
    }

    /// Extract `archive_path` into `install_path`.
    ///
    /// An existing install directory is first renamed to
    /// `{install}_backup_{yyyyMMdd_HHmmss}`. If extraction fails the partial
    /// output is removed and the renamed directory is left in place. The caller
    /// must make sure the server is not running.
    #[tracing::instrument(skip_all, fields(archive = %archive_path.as_ref().display()))]
    pub async fn restore(
        &self,
        archive_path: impl AsRef<Path>,
        install_path: impl AsRef<Path>,
    ) -> Result<RestoreReport> {
        let archive_path = archive_path.as_ref().to_path_buf();
        let install_path = install_path.as_ref().to_path_buf();

        let report = blocking(move || {
            let mut zip = archive::open_archive(&archive_path)?;

            let previous_install = if install_path.exists() {
                let aside = aside_path(&install_path, Local::now())?;
                fs::rename(&install_path, &aside).map_err(|e| {
                    Error::Backup(format!("Failed to move {} aside: {}", install_path.display(), e))
                })?;
                tracing::info!(moved_to = %aside.display(), "Moved existing install aside");
                Some(aside)
            } else {
                None
            };

            match archive::extract_archive(&mut zip, &install_path) {
                Ok(files_restored) => Ok(RestoreReport {
                    files_restored,
                    previous_install,
                }),
                Err(e) => {
                    if install_path.exists() {
                        if let Err(cleanup) = fs::remove_dir_all(&install_path) {
                            tracing::warn!(path = %install_path.display(), error = %cleanup, "Failed to remove partial restore");
                        }
                    }
                    let preserved = previous_install
                        .map(|aside| format!("; previous install preserved at {}", aside.display()))
                        .unwrap_or_default();
                    Err(Error::Backup(format!("Restore failed: {}{}", e, preserved)))
                }
            }
        })
        .await?;

        tracing::info!(files = report.files_restored, "Restore complete");
        Ok(report)
    }
}

/// Delete every record created before `cutoff`, logging and skipping failures.
fn remove_expired(records: &[BackupRecord], cutoff: DateTime<Local>) -> usize {
    let mut deleted = 0;
    for record in records.iter().filter(|r| r.created_at < cutoff) {
        match fs::remove_file(&record.path) {
            Ok(()) => {
                tracing::info!(archive = %record.file_name, "Deleted expired backup");
                deleted += 1;
            }
            Err(e) => {
                tracing::warn!(archive = %record.file_name, error = %e, "Failed to delete expired backup");
            }
        }
    }
    deleted
}

fn list_dir(backup_dir: &Path, server_name: &str) -> Result<Vec<BackupRecord>> {
    if !backup_dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(backup_dir)
        .map_err(|e| Error::Backup(format!("Failed to read {}: {}", backup_dir.display(), e)))?;

    let mut records: Vec<BackupRecord> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().into_string().ok()?;
            let (kind, created_at) = naming::parse_archive_name(server_name, &file_name)?;
            let metadata = entry.metadata().ok().filter(|m| m.is_file())?;
            Some(BackupRecord {
                file_name,
                path: entry.path(),
                created_at,
                size: metadata.len(),
                kind,
            })
        })
        .collect();
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(records)
}

/// Unused sibling path `{install}_backup_{yyyyMMdd_HHmmss}[_n]`
fn aside_path(install_path: &Path, now: DateTime<Local>) -> Result<PathBuf> {
    let name = install_path
        .file_name()
        .ok_or_else(|| Error::Backup(format!("Cannot restore over {}", install_path.display())))?
        .to_string_lossy();
    let base = format!("{}_backup_{}", name, now.format("%Y%m%d_%H%M%S"));

    let mut candidate = install_path.with_file_name(&base);
    let mut suffix = 1;
    while candidate.exists() {
        candidate = install_path.with_file_name(format!("{}_{}", base, suffix));
        suffix += 1;
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(path: PathBuf, created_at: DateTime<Local>) -> BackupRecord {
        BackupRecord {
            file_name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
            created_at,
            size: 1,
            kind: BackupKind::Full,
        }
    }

    #[test]
    fn test_remove_expired_skips_failures() {
        let temp = tempfile::tempdir().unwrap();
        let old = Local.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap();
        let fresh = Local.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        let cutoff = Local.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let locked = temp.path().join("ark_Full_20240101_030000.zip");
        fs::create_dir(&locked).unwrap();
        let vanished = temp.path().join("ark_Full_20240101_040000.zip");
        let expired = temp.path().join("ark_Incremental_20240102_030000.zip");
        fs::write(&expired, "x").unwrap();
        let kept = temp.path().join("ark_Full_20240301_030000.zip");
        fs::write(&kept, "x").unwrap();

        let records = vec![
            record(locked.clone(), old),
            record(vanished, old),
            record(expired.clone(), old),
            record(kept.clone(), fresh),
        ];

        assert_eq!(remove_expired(&records, cutoff), 1);
        assert!(!expired.exists());
        assert!(locked.exists());
        assert!(kept.exists());
    }
}
