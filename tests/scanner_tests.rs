use assert_fs::prelude::*;
use pulse_panel::config::ServerConfig;
use pulse_panel::server::ServerRegistry;
use pulse_panel::server::scanner::{register_scanned, scan, scan_dir};

#[test]
fn test_scan_finds_known_executables() {
    let root = assert_fs::TempDir::new().unwrap();
    root.child("valheim/valheim_server.x86_64").write_str("").unwrap();
    root.child("cs2/cs2.exe").write_str("").unwrap();
    root.child("notes/readme.txt").write_str("").unwrap();
    root.child("loose_file.exe").write_str("").unwrap();

    let found = scan_dir(root.path());

    assert_eq!(found.len(), 2);
    let cs2 = &found[0];
    assert_eq!(cs2.name, "cs2");
    assert_eq!(cs2.app_id, "730");
    assert_eq!(cs2.game_name, "Counter-Strike 2");
    assert_eq!(cs2.install_path, root.child("cs2").path());
    assert_eq!(cs2.executable_path, root.child("cs2/cs2.exe").path());
    assert_eq!(cs2.launch_args, "-dedicated +map de_dust2 +maxplayers 10");
    assert_eq!(cs2.port, 27015);

    let valheim = &found[1];
    assert_eq!(valheim.name, "valheim");
    assert_eq!(valheim.app_id, "896660");
    assert_eq!(valheim.game_name, "Valheim");
}

#[test]
fn test_one_server_per_directory() {
    let root = assert_fs::TempDir::new().unwrap();
    root.child("arma/arma3server_x64.exe").write_str("").unwrap();
    root.child("arma/arma3server.exe").write_str("").unwrap();

    let found = scan_dir(root.path());
    assert_eq!(found.len(), 1);
    assert!(found[0].executable_path.ends_with("arma3server_x64.exe"));
}

#[test]
fn test_missing_roots_are_skipped() {
    let root = assert_fs::TempDir::new().unwrap();
    root.child("rust/RustDedicated").write_str("").unwrap();

    let found = scan(&[root.path().join("missing"), root.path().to_path_buf()]);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].game_name, "Rust");
    assert!(scan_dir(&root.path().join("missing")).is_empty());
}

#[cfg(unix)]
#[test]
fn test_unreadable_directory_is_skipped() {
    use std::os::unix::fs::PermissionsExt;

    let root = assert_fs::TempDir::new().unwrap();
    root.child("locked/PalServer.sh").write_str("").unwrap();
    root.child("open/PalServer.sh").write_str("").unwrap();
    let locked = root.child("locked");
    std::fs::set_permissions(locked.path(), std::fs::Permissions::from_mode(0o000)).unwrap();

    let readable = std::fs::read_dir(locked.path()).is_ok();
    let found = scan_dir(root.path());
    std::fs::set_permissions(locked.path(), std::fs::Permissions::from_mode(0o755)).unwrap();

    // Permission bits do not bind a privileged user
    let expected = if readable { 2 } else { 1 };
    assert_eq!(found.len(), expected);
    assert!(found.iter().any(|s| s.name == "open"));
}

#[test]
fn test_register_scanned_skips_known_install_paths() {
    let root = assert_fs::TempDir::new().unwrap();
    root.child("valheim/valheim_server.x86_64").write_str("").unwrap();
    root.child("palworld/PalServer.sh").write_str("").unwrap();

    let registry = ServerRegistry::new();
    let existing = root.child("valheim");
    registry
        .add(ServerConfig::new("my-valheim", existing.path(), existing.child("valheim_server.x86_64").path()))
        .unwrap();

    let added = register_scanned(&registry, scan_dir(root.path()));
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].name(), "palworld");
    assert_eq!(registry.len(), 2);

    let again = register_scanned(&registry, scan_dir(root.path()));
    assert!(again.is_empty());
    assert_eq!(registry.len(), 2);
}
