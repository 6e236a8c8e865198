//! Command-line entry points for schedulers and operators.

use anyhow::{Context, bail};
use chrono::{Local, TimeDelta};
use clap::{Parser, Subcommand};
use pulse_panel::{Config, PulsePanel, ServerId};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_CONFIG_FILE: &str = "pulse-panel.json";

/// Supervise, update and back up dedicated game servers
#[derive(Parser)]
#[command(name = "pulse-panel", version, about)]
struct Cli {
    /// Configuration file (defaults to ./pulse-panel.json when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Install or update a server's files with SteamCMD
    UpdateServer { server: String },
    /// Stop a server, wait, and start it again
    RestartServer { server: String },
    /// Full backup followed by pruning
    BackupServer { server: String },
    /// Incremental or full backup depending on the age of the last full one
    ScheduledBackup { server: String },
    /// List a server's backups, newest first
    ListBackups { server: String },
    /// Stop a server and restore a backup over its install directory
    Restore { server: String, archive: PathBuf },
    /// Print stored metrics for a server
    Metrics {
        server: String,
        /// How many hours back to look
        #[arg(long, default_value_t = 24)]
        hours: u32,
    },
    /// Look for server installations and print their configuration entries
    Scan {
        /// Directories to scan (defaults to the configured scan paths)
        paths: Vec<PathBuf>,
    },
    /// Start all servers and supervise them until Ctrl-C
    Run,
}

/// Console output plus a daily rolling file in `log_dir`
fn init_tracing(log_dir: &Path, verbose: bool) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match std::fs::create_dir_all(log_dir) {
        Ok(()) => {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "pulse-panel.log"));
            Some((fmt::layer().with_writer(writer).with_ansi(false), guard))
        }
        Err(e) => {
            eprintln!("Failed to create log directory {}: {}", log_dir.display(), e);
            None
        }
    };
    let (file_layer, guard) = file_layer.unzip();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .init();
    guard
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path).with_context(|| format!("Failed to load {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Config::from_file(DEFAULT_CONFIG_FILE).with_context(|| format!("Failed to load {}", DEFAULT_CONFIG_FILE))
        }
        None => Ok(Config::default()),
    }
}

/// Accept either a server id or a configured server name
fn resolve(panel: &PulsePanel, server: &str) -> anyhow::Result<ServerId> {
    if let Ok(id) = server.parse::<ServerId>() {
        return Ok(id);
    }
    match panel.registry().find_by_name(server) {
        Some(found) => Ok(found.id()),
        None => bail!("No server with id or name '{}'", server),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _log_guard = init_tracing(&config.log_dir(), cli.verbose);

    let panel = PulsePanel::new(config)?;

    match cli.command {
        Command::UpdateServer { server } => {
            let id = resolve(&panel, &server)?;
            if !panel.update_server(id).await? {
                bail!("SteamCMD reported a failure while updating '{}'", server);
            }
            println!("Server '{}' is up to date", server);
        }
        Command::RestartServer { server } => {
            let id = resolve(&panel, &server)?;
            panel.restart_server(id).await?;
            println!("Server '{}' restarted", server);
        }
        Command::BackupServer { server } => {
            let id = resolve(&panel, &server)?;
            let record = panel.backup_server(id).await?;
            println!("Created {} ({})", record.file_name, record.size_display());
        }
        Command::ScheduledBackup { server } => {
            let id = resolve(&panel, &server)?;
            let record = panel.scheduled_backup(id).await?;
            println!("Created {} backup {} ({})", record.kind, record.file_name, record.size_display());
        }
        Command::ListBackups { server } => {
            let id = resolve(&panel, &server)?;
            let backups = panel.list_backups(id).await?;
            if backups.is_empty() {
                println!("No backups for '{}'", server);
            }
            for record in backups {
                println!(
                    "{}  {:<11}  {:>10}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record.kind.to_string(),
                    record.size_display(),
                    record.file_name
                );
            }
        }
        Command::Restore { server, archive } => {
            let id = resolve(&panel, &server)?;
            let report = panel.restore_server(id, &archive).await?;
            println!("Restored {} files from {}", report.files_restored, archive.display());
            if let Some(previous) = report.previous_install {
                println!("Previous install kept at {}", previous.display());
            }
        }
        Command::Metrics { server, hours } => {
            let id = resolve(&panel, &server)?;
            let to = Local::now();
            let from = to - TimeDelta::hours(i64::from(hours));
            let records = panel.query_metrics(id, from, to).await?;
            for record in &records {
                println!(
                    "{}  {:<8}  cpu {:>5.1}%  ram {:>8.1} MB  up {}s",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.state.to_string(),
                    record.cpu_percent,
                    record.ram_bytes as f64 / (1024.0 * 1024.0),
                    record.uptime_secs
                );
            }
            println!("{} records in the last {} hours", records.len(), hours);
        }
        Command::Scan { paths } => {
            let roots = if paths.is_empty() { panel.config().scan_paths.clone() } else { paths };
            let found = panel.scan_servers(&roots);
            if found.is_empty() {
                println!("No new server installations found");
            }
            let configs: Vec<_> = found.iter().map(|server| server.config()).collect();
            if !configs.is_empty() {
                println!("{}", serde_json::to_string_pretty(&configs)?);
            }
        }
        Command::Run => {
            panel
                .run(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                    }
                })
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_metrics_hours() {
        let cli = Cli::parse_from(["pulse-panel", "--config", "panel.json", "metrics", "ark", "--hours", "6"]);
        assert_eq!(cli.config, Some(PathBuf::from("panel.json")));
        match cli.command {
            Command::Metrics { server, hours } => {
                assert_eq!(server, "ark");
                assert_eq!(hours, 6);
            }
            _ => panic!("expected metrics command"),
        }
    }

    #[test]
    fn test_scan_paths() {
        let cli = Cli::parse_from(["pulse-panel", "scan", "/srv/a", "/srv/b"]);
        match cli.command {
            Command::Scan { paths } => assert_eq!(paths, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]),
            _ => panic!("expected scan command"),
        }
    }
}
