//! Blocking zip I/O. Callers run these on the blocking pool.

use crate::error::{Error, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

fn io_error(context: &str, path: &Path, e: impl std::fmt::Display) -> Error {
    Error::Backup(format!("{} {}: {}", context, path.display(), e))
}

/// Archive entry name for a path relative to the archive root, always `/`-separated.
pub(crate) fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Write the files under `root` into a new archive at `dest`.
///
/// With `since`, only regular files modified strictly after it are included and
/// directories are not recorded. Anything under `exclude` is skipped. The archive
/// is written to a `.partial` sibling and renamed into place once complete.
/// Returns the number of file entries written.
pub(crate) fn write_archive(
    root: &Path,
    dest: &Path,
    exclude: Option<&Path>,
    since: Option<DateTime<Local>>,
) -> Result<usize> {
    let partial = dest.with_extension("zip.partial");
    match write_entries(root, &partial, exclude, since) {
        Ok(entries) => {
            fs::rename(&partial, dest).map_err(|e| io_error("Failed to finalize", dest, e))?;
            Ok(entries)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&partial) {
                tracing::warn!(file = %partial.display(), error = %cleanup, "Failed to remove partial archive");
            }
            Err(e)
        }
    }
}

fn write_entries(
    root: &Path,
    partial: &Path,
    exclude: Option<&Path>,
    since: Option<DateTime<Local>>,
) -> Result<usize> {
    let file = File::create(partial).map_err(|e| io_error("Failed to create", partial, e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut entries = 0;

    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| exclude.is_none_or(|excluded| !entry.path().starts_with(excluded)));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Backup(format!("Failed to walk {}: {}", root.display(), e)))?;
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| io_error("Unexpected path outside", root, e))?;
        let name = entry_name(relative);

        if entry.file_type().is_dir() {
            if since.is_none() {
                writer
                    .add_directory(name, options)
                    .map_err(|e| io_error("Failed to add directory", entry.path(), e))?;
            }
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(since) = since {
            let modified = entry
                .metadata()
                .map_err(|e| io_error("Failed to read metadata of", entry.path(), e))?
                .modified()
                .map_err(|e| io_error("Failed to read mtime of", entry.path(), e))?;
            if DateTime::<Local>::from(modified) <= since {
                continue;
            }
        }

        writer
            .start_file(name, options)
            .map_err(|e| io_error("Failed to add", entry.path(), e))?;
        let mut source = File::open(entry.path()).map_err(|e| io_error("Failed to open", entry.path(), e))?;
        io::copy(&mut source, &mut writer).map_err(|e| io_error("Failed to archive", entry.path(), e))?;
        entries += 1;
    }

    writer
        .finish()
        .map_err(|e| io_error("Failed to finish", partial, e))?;
    Ok(entries)
}

/// Open an archive and check that every entry stays inside the extraction root.
pub(crate) fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path).map_err(|e| Error::InvalidArchive(format!("{}: {}", path.display(), e)))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| Error::InvalidArchive(format!("{}: {}", path.display(), e)))?;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| Error::InvalidArchive(format!("{}: {}", path.display(), e)))?;
        if entry.enclosed_name().is_none() {
            return Err(Error::InvalidArchive(format!(
                "{}: entry '{}' escapes the extraction directory",
                path.display(),
                entry.name()
            )));
        }
    }
    Ok(archive)
}

/// Extract every entry of `archive` under `dest`. Returns the number of files written.
pub(crate) fn extract_archive(archive: &mut ZipArchive<File>, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest).map_err(|e| io_error("Failed to create", dest, e))?;
    let mut files = 0;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::Backup(format!("Failed to read archive entry {}: {}", i, e)))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::InvalidArchive(format!("Unsafe entry name '{}'", entry.name())));
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&out).map_err(|e| io_error("Failed to create", &out, e))?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("Failed to create", parent, e))?;
        }
        let mut target = File::create(&out).map_err(|e| io_error("Failed to create", &out, e))?;
        io::copy(&mut entry, &mut target).map_err(|e| io_error("Failed to extract", &out, e))?;
        files += 1;
    }
    Ok(files)
}
