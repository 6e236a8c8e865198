use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const ARCHIVE_EXTENSION: &str = ".zip";

/// Whether an archive holds the whole install directory or only changed files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Incremental => "Incremental",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "Full" => Some(Self::Full),
            "Incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An archive found in (or just written to) the backup directory.
///
/// Everything except `size` is derived from the file name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub file_name: String,
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub size: u64,
    pub kind: BackupKind,
}

impl BackupRecord {
    /// Human readable size, e.g. `1.5 MB`
    pub fn size_display(&self) -> String {
        const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
        let mut size = self.size as f64;
        let mut unit = 0;
        while size >= 1024.0 && unit < UNITS.len() - 1 {
            size /= 1024.0;
            unit += 1;
        }
        if unit == 0 {
            format!("{} {}", self.size, UNITS[0])
        } else {
            format!("{:.1} {}", size, UNITS[unit])
        }
    }
}

/// Server name as it appears in archive file names.
///
/// Path separators and other characters that are unsafe in file names become `_`.
pub(crate) fn file_stem(server_name: &str) -> String {
    server_name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// `{server}_{Full|Incremental}_{yyyyMMdd_HHmmss}.zip`
pub(crate) fn archive_name(server_name: &str, kind: BackupKind, at: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}{}",
        file_stem(server_name),
        kind,
        at.format(TIMESTAMP_FORMAT),
        ARCHIVE_EXTENSION
    )
}

/// Kind and timestamp encoded in `file_name`, if it is an archive of `server_name`.
pub(crate) fn parse_archive_name(server_name: &str, file_name: &str) -> Option<(BackupKind, DateTime<Local>)> {
    let rest = file_name
        .strip_prefix(file_stem(server_name).as_str())?
        .strip_prefix('_')?
        .strip_suffix(ARCHIVE_EXTENSION)?;
    let (kind, timestamp) = rest.split_once('_')?;
    let kind = BackupKind::parse(kind)?;
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    let created_at = Local.from_local_datetime(&naive).earliest()?;
    Some((kind, created_at))
}
