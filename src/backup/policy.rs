use super::{BackupKind, BackupRecord};
use chrono::{DateTime, Local, TimeDelta};
use std::time::Duration;

/// What a scheduled backup should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPlan {
    Full,
    /// Only files modified after the latest full backup
    Incremental { since: DateTime<Local> },
}

/// Incremental since the newest Full if that Full is younger than `max_full_age`,
/// otherwise a new Full.
pub fn select(existing: &[BackupRecord], now: DateTime<Local>, max_full_age: Duration) -> BackupPlan {
    let max_age = TimeDelta::from_std(max_full_age).unwrap_or(TimeDelta::MAX);
    existing
        .iter()
        .filter(|record| record.kind == BackupKind::Full)
        .max_by_key(|record| record.created_at)
        .filter(|full| {
            let age = now.signed_duration_since(full.created_at);
            age >= TimeDelta::zero() && age < max_age
        })
        .map_or(BackupPlan::Full, |full| BackupPlan::Incremental {
            since: full.created_at,
        })
}
