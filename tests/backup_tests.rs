use assert_fs::prelude::*;
use chrono::{Local, TimeZone};
use pulse_panel::backup::{BackupEngine, BackupKind, BackupPlan};
use pulse_panel::config::BackupSettings;
use pulse_panel::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zip::ZipArchive;
use zip::write::SimpleFileOptions;

fn engine(backup_dir: &Path) -> BackupEngine {
    BackupEngine::new(backup_dir, BackupSettings::default())
}

/// Install directory with a small nested layout
fn install_dir(root: &assert_fs::TempDir) -> PathBuf {
    let install = root.child("ark");
    install.child("ShooterGame/Saved/world.ark").write_str("world").unwrap();
    install.child("ShooterGame/Config/Game.ini").write_str("[settings]").unwrap();
    install.child("server.exe").write_binary(&[0x4d, 0x5a]).unwrap();
    install.path().to_path_buf()
}

fn entry_names(archive: &Path) -> Vec<String> {
    let mut zip = ZipArchive::new(fs::File::open(archive).unwrap()).unwrap();
    let mut names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    names
}

/// Names in `dir` starting with `prefix`
fn children_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
        .map(|e| e.path())
        .collect()
}

#[tokio::test]
async fn test_list_backups_ignores_foreign_files() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("ark_Full_20240101_030000.zip").write_str("x").unwrap();
    temp.child("ark_Incremental_20240102_030000.zip").write_str("xy").unwrap();
    temp.child("notes.txt").write_str("hello").unwrap();
    temp.child("rust_Full_20240103_030000.zip").write_str("x").unwrap();

    let backups = engine(temp.path()).list_backups("ark").await?;

    assert_eq!(backups.len(), 2);
    assert_eq!(backups[0].file_name, "ark_Incremental_20240102_030000.zip");
    assert_eq!(backups[0].kind, BackupKind::Incremental);
    assert_eq!(backups[0].size, 2);
    assert_eq!(backups[1].kind, BackupKind::Full);
    assert_eq!(
        backups[1].created_at,
        Local.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()
    );
    Ok(())
}

#[tokio::test]
async fn test_list_missing_directory_is_empty() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let backups = engine(&temp.path().join("nope")).list_backups("ark").await?;
    assert!(backups.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_prune_keeps_archive_at_cutoff() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("ark_Full_20240102_030000.zip").write_str("x").unwrap();
    temp.child("ark_Full_20240102_025959.zip").write_str("x").unwrap();
    temp.child("ark_Incremental_20231201_000000.zip").write_str("x").unwrap();
    temp.child("notes.txt").write_str("keep me").unwrap();

    let now = Local.with_ymd_and_hms(2024, 2, 1, 3, 0, 0).unwrap();
    let deleted = engine(temp.path()).prune_at("ark", 30, now).await?;

    assert_eq!(deleted, 2);
    assert!(temp.child("ark_Full_20240102_030000.zip").path().exists());
    assert!(!temp.child("ark_Full_20240102_025959.zip").path().exists());
    assert!(!temp.child("ark_Incremental_20231201_000000.zip").path().exists());
    assert!(temp.child("notes.txt").path().exists());
    Ok(())
}

#[tokio::test]
async fn test_full_backup_layout() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let backups = temp.child("backups");

    let record = engine(backups.path()).create_full("ark", &install).await?;

    assert_eq!(record.kind, BackupKind::Full);
    assert!(record.file_name.starts_with("ark_Full_"));
    assert!(record.path.exists());
    assert_eq!(record.size, fs::metadata(&record.path).unwrap().len());

    let names = entry_names(&record.path);
    assert!(names.contains(&"ShooterGame/Saved/world.ark".to_string()));
    assert!(names.contains(&"ShooterGame/Config/Game.ini".to_string()));
    assert!(names.contains(&"server.exe".to_string()));
    assert!(names.iter().all(|n| !n.contains('\\')));
    Ok(())
}

#[tokio::test]
async fn test_backup_dir_inside_install_is_skipped() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let engine = engine(&install.join("backups"));

    let first = engine.create_full("ark", &install).await?;
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = engine.create_full("ark", &install).await?;

    assert_ne!(first.file_name, second.file_name);
    assert!(entry_names(&second.path).iter().all(|n| !n.starts_with("backups")));
    Ok(())
}

#[tokio::test]
async fn test_incremental_after_full_has_only_changes() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let engine = engine(temp.child("backups").path());

    let full = engine.create_full("ark", &install).await?;
    let unchanged = engine.create_incremental("ark", &install, full.created_at).await?;
    assert_eq!(unchanged.kind, BackupKind::Incremental);
    assert!(entry_names(&unchanged.path).is_empty());

    tokio::time::sleep(Duration::from_millis(50)).await;
    fs::write(install.join("ShooterGame/Saved/world.ark"), "world v2").unwrap();

    let changed = engine.create_incremental("ark", &install, full.created_at).await?;
    assert_eq!(entry_names(&changed.path), vec!["ShooterGame/Saved/world.ark"]);
    Ok(())
}

#[tokio::test]
async fn test_scheduled_backup_selects_incremental_after_full() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let engine = engine(temp.child("backups").path());

    assert_eq!(engine.select(&[], Local::now()), BackupPlan::Full);
    let first = engine.run_scheduled("ark", &install).await?;
    assert_eq!(first.kind, BackupKind::Full);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let second = engine.run_scheduled("ark", &install).await?;
    assert_eq!(second.kind, BackupKind::Incremental);

    let listed = engine.list_backups("ark").await?;
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].kind, BackupKind::Incremental);
    Ok(())
}

#[tokio::test]
async fn test_backup_of_missing_install_fails() {
    let temp = assert_fs::TempDir::new().unwrap();
    let result = engine(temp.path())
        .create_full("ark", temp.path().join("missing"))
        .await;
    assert!(matches!(result, Err(Error::Backup(_))));
}

#[tokio::test]
async fn test_restore_moves_existing_install_aside() -> Result<()> {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let engine = engine(temp.child("backups").path());
    let record = engine.create_full("ark", &install).await?;

    fs::write(install.join("ShooterGame/Saved/world.ark"), "corrupted world").unwrap();
    fs::write(install.join("crash.log"), "segfault").unwrap();

    let report = engine.restore(&record.path, &install).await?;

    assert_eq!(report.files_restored, 3);
    assert_eq!(
        fs::read_to_string(install.join("ShooterGame/Saved/world.ark")).unwrap(),
        "world"
    );
    assert!(!install.join("crash.log").exists());

    let aside = report.previous_install.expect("existing install moved aside");
    assert!(aside.file_name().unwrap().to_string_lossy().starts_with("ark_backup_"));
    assert_eq!(fs::read_to_string(aside.join("crash.log")).unwrap(), "segfault");
    Ok(())
}

#[tokio::test]
async fn test_restore_rejects_invalid_archive() {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);
    let bogus = temp.child("bogus.zip");
    bogus.write_str("definitely not a zip").unwrap();

    let result = engine(temp.path()).restore(bogus.path(), &install).await;

    assert!(matches!(result, Err(Error::InvalidArchive(_))));
    assert!(install.join("server.exe").exists());
    assert!(children_with_prefix(temp.path(), "ark_backup_").is_empty());
}

#[tokio::test]
async fn test_failed_extraction_keeps_previous_install() {
    let temp = assert_fs::TempDir::new().unwrap();
    let install = install_dir(&temp);

    // Stored entry whose payload no longer matches its checksum
    let payload = [b'A'; 64];
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    writer.start_file("data/blob.bin", options).unwrap();
    writer.write_all(&payload).unwrap();
    let mut bytes = writer.finish().unwrap().into_inner();
    let start = bytes
        .windows(payload.len())
        .position(|w| w == payload)
        .unwrap();
    bytes[start..start + payload.len()].fill(b'B');
    let archive = temp.child("damaged.zip");
    archive.write_binary(&bytes).unwrap();

    let result = engine(temp.path()).restore(archive.path(), &install).await;

    let Err(Error::Backup(message)) = result else {
        panic!("expected a backup error, got {:?}", result);
    };
    assert!(message.contains("previous install preserved"));
    assert!(!install.exists());

    let aside = children_with_prefix(temp.path(), "ark_backup_");
    assert_eq!(aside.len(), 1);
    assert!(aside[0].join("server.exe").exists());
}
