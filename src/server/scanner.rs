//! Discovery of existing server installations.
//!
//! Each immediate subdirectory of a scan root is checked for a known
//! dedicated-server executable. A hit becomes a [`ServerConfig`] named after
//! the directory, with the game's Steam app id and default launch arguments.

use crate::config::ServerConfig;
use crate::error::Error;
use crate::server::{ManagedServer, ServerRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A dedicated-server executable and the game it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownServer {
    pub executable: &'static str,
    pub app_id: &'static str,
    pub game_name: &'static str,
}

const fn known(executable: &'static str, app_id: &'static str, game_name: &'static str) -> KnownServer {
    KnownServer {
        executable,
        app_id,
        game_name,
    }
}

/// Executables recognised by the scan, Windows names first, then Linux builds
pub const KNOWN_SERVERS: &[KnownServer] = &[
    // Source engine
    known("srcds.exe", "232250", "Source Dedicated Server"),
    known("cs2.exe", "730", "Counter-Strike 2"),
    known("hlds.exe", "90", "Half-Life Dedicated Server"),
    known("tf2_server.exe", "232250", "Team Fortress 2"),
    known("gmod_server.exe", "4020", "Garry's Mod"),
    known("left4dead2.exe", "222860", "Left 4 Dead 2"),
    // Military and tactical
    known("arma3server_x64.exe", "233780", "Arma 3"),
    known("arma3server.exe", "233780", "Arma 3"),
    known("SquadGameServer.exe", "403240", "Squad"),
    known("PostScriptumServer.exe", "736220", "Post Scriptum"),
    known("HellLetLooseServer.exe", "686810", "Hell Let Loose"),
    known("InsurgencyServer.exe", "581330", "Insurgency: Sandstorm"),
    // Survival and crafting
    known("RustDedicated.exe", "258550", "Rust"),
    known("7DaysToDieServer.exe", "294420", "7 Days to Die"),
    known("TheForestDedicatedServer.exe", "556450", "The Forest"),
    known("valheim_server.exe", "896660", "Valheim"),
    known("ProjectZomboidServer.exe", "380870", "Project Zomboid"),
    known("ConanSandboxServer.exe", "443030", "Conan Exiles"),
    known("ArkAscendedServer.exe", "2430930", "ARK: Survival Ascended"),
    known("ShooterGameServer.exe", "376030", "ARK: Survival Evolved"),
    // Racing
    known("BeamMP-Server.exe", "284160", "BeamNG.drive"),
    known("assettocorsa_server.exe", "244210", "Assetto Corsa"),
    known("rFactor2_Dedicated.exe", "365960", "rFactor 2"),
    // Space and sci-fi
    known("SpaceEngineersServer.exe", "298740", "Space Engineers"),
    known("AstronauteerDedicatedServer.exe", "728470", "Astroneer"),
    known("SatisfactoryServer.exe", "526870", "Satisfactory"),
    // Voxel
    known("VintageStoryServer.exe", "559080", "Vintage Story"),
    known("EcoServer.exe", "382310", "Eco"),
    // Other
    known("PalServer.exe", "2394010", "Palworld"),
    known("EnshroudedServer.exe", "1203620", "Enshrouded"),
    known("V_RisingServer.exe", "1604030", "V Rising"),
    known("DayZServer_x64.exe", "223350", "DayZ"),
    known("UnturnedServer.exe", "304930", "Unturned"),
    known("FoundryDedicatedServer.exe", "983870", "Foundry"),
    known("FarmingSimulator22Server.exe", "1248130", "Farming Simulator 22"),
    // Linux builds
    known("srcds_linux", "232250", "Source Dedicated Server"),
    known("srcds_run", "232250", "Source Dedicated Server"),
    known("hlds_linux", "90", "Half-Life Dedicated Server"),
    known("arma3server_x64", "233780", "Arma 3"),
    known("SquadGameServer.sh", "403240", "Squad"),
    known("RustDedicated", "258550", "Rust"),
    known("7DaysToDieServer.x86_64", "294420", "7 Days to Die"),
    known("valheim_server.x86_64", "896660", "Valheim"),
    known("start-server.sh", "380870", "Project Zomboid"),
    known("PalServer.sh", "2394010", "Palworld"),
    known("FactoryServer.sh", "526870", "Satisfactory"),
    known("DayZServer", "223350", "DayZ"),
    known("Unturned_Headless.x86_64", "304930", "Unturned"),
];

/// Look up a server executable by file name
pub fn known_server(file_name: &str) -> Option<&'static KnownServer> {
    KNOWN_SERVERS.iter().find(|k| k.executable == file_name)
}

/// Default launch arguments for a Steam app id
pub fn default_launch_args(app_id: &str) -> &'static str {
    match app_id {
        "730" => "-dedicated +map de_dust2 +maxplayers 10",
        "4020" => "-console -game garrysmod +map gm_flatgrass +maxplayers 16",
        "232250" => "-console -game tf +map cp_dustbowl +maxplayers 24",
        "222860" => "-console -game left4dead2 +map c1m1_hotel +maxplayers 8",
        "233780" => "-port=2302 -config=server.cfg -world=VR -profiles=profiles",
        "403240" => "Port=7787 QueryPort=27165",
        "686810" => "-log -USEALLAVAILABLECORES",
        "581330" => "-Port=27102 -QueryPort=27131",
        "258550" => "-batchmode -nographics +server.port 28015 +server.maxplayers 100",
        "294420" => "-configfile=serverconfig.xml -logfile logs/output_log.txt",
        "556450" => "-batchmode -nographics -dedicated",
        "896660" => r#"-nographics -batchmode -name "My Valheim Server" -port 2456 -world "Dedicated" -password "secret""#,
        "380870" => "-cachedir=Zomboid -adminusername admin -adminpassword changeme",
        "443030" => "ConanSandbox?listen?MaxPlayers=40?PVP=True",
        "376030" => "TheIsland?listen?SessionName=MyARKServer?MaxPlayers=70",
        "2430930" => "TheIsland_WP?listen?SessionName=MyASAServer?MaxPlayers=70",
        "298740" => "-noconsole -path SpaceEngineers",
        "526870" => "-log -unattended",
        "2394010" => "-useperfthreads -NoAsyncLoadingThread -UseMultithreadForDS",
        "1604030" => "-persistentDataPath save-data -saveName MyVRisingServer",
        "223350" => "-config=serverDZ.cfg -port=2302 -profiles=profiles",
        "304930" => "-nographics -batchmode +secureserver/MyServer",
        _ => "-console",
    }
}

/// Server configurations for every recognised installation directly under `root`.
///
/// A directory holding several known executables yields one server, for the
/// first match in [`KNOWN_SERVERS`] order. An unreadable root or subdirectory
/// is skipped with a warning.
pub fn scan_dir(root: &Path) -> Vec<ServerConfig> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(path = %root.display(), error = %e, "Cannot scan directory");
            return Vec::new();
        }
    };

    let mut directories: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
        .map(|entry| entry.path())
        .collect();
    directories.sort();

    directories
        .into_iter()
        .filter_map(|directory| detect(&directory))
        .collect()
}

/// Scan every existing root in order
pub fn scan(roots: &[PathBuf]) -> Vec<ServerConfig> {
    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| scan_dir(root))
        .collect()
}

/// Register scanned servers, skipping ones whose id or install path is taken.
///
/// Returns the newly registered servers.
pub fn register_scanned(registry: &ServerRegistry, found: Vec<ServerConfig>) -> Vec<Arc<ManagedServer>> {
    found
        .into_iter()
        .filter_map(|config| match registry.add(config) {
            Ok(server) => Some(server),
            Err(Error::DuplicateServer(reason)) => {
                tracing::debug!(%reason, "Skipping scanned server");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to register scanned server");
                None
            }
        })
        .collect()
}

fn detect(directory: &Path) -> Option<ServerConfig> {
    if let Err(e) = fs::read_dir(directory) {
        tracing::warn!(path = %directory.display(), error = %e, "Skipping unreadable directory");
        return None;
    }

    let known = KNOWN_SERVERS
        .iter()
        .find(|k| directory.join(k.executable).is_file())?;
    let name = directory.file_name()?.to_string_lossy().into_owned();

    tracing::info!(server = %name, game = known.game_name, "Found server installation");
    let mut config = ServerConfig::new(name, directory, directory.join(known.executable));
    config.game_name = known.game_name.to_string();
    config.app_id = known.app_id.to_string();
    config.launch_args = default_launch_args(known.app_id).to_string();
    Some(config)
}
