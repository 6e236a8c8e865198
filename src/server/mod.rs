/// Server management module for Pulse Panel.
///
/// This module owns the managed servers, their external processes, and the
/// components that act on them. All public components are instrumented with
/// `tracing` spans.
///
/// # Components
///
/// * `process` - Managed server state, process handle, and state-change events
/// * `lifecycle` - Install/update, start, stop, and restart, serialized per server
/// * `monitor` - Periodic liveness and resource polling with crash detection
/// * `registry` - The owned set of managed servers
/// * `scanner` - Discovery of existing installations by known executables
/// * `sampler` - Cached CPU/memory readings
/// * `output` - Line-by-line forwarding of process output
///
/// # Examples
///
/// Starting a server and supervising it:
///
/// ```no_run
/// use pulse_panel::config::ServerConfig;
/// use pulse_panel::installer::SteamCmd;
/// use pulse_panel::server::{
///     LifecycleConfig, LifecycleManager, ProcessSupervisor, Sampler, ServerRegistry,
///     SupervisorConfig, SysinfoProbe, output,
/// };
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # async fn demo() -> pulse_panel::Result<()> {
/// let registry = ServerRegistry::new();
/// let server = registry.add(ServerConfig::new("cs2", "/srv/cs2", "/srv/cs2/game/bin/cs2"))?;
///
/// let installer = Arc::new(SteamCmd::new("/usr/games/steamcmd", Default::default()));
/// let lifecycle = LifecycleManager::new(installer, output::log_observer("cs2"), LifecycleConfig::default());
/// let sampler = Arc::new(Sampler::new(Arc::new(SysinfoProbe::new()), Duration::from_secs(2)));
/// let supervisor = ProcessSupervisor::new(sampler, SupervisorConfig::default());
///
/// lifecycle.start(&server).await?;
/// supervisor.start_supervising(Arc::clone(&server)).await;
/// # Ok(())
/// # }
/// ```
pub mod lifecycle;
pub mod monitor;
pub mod output;
mod process;
pub mod registry;
pub mod sampler;
pub mod scanner;

pub use lifecycle::{LifecycleConfig, LifecycleManager};
pub use monitor::{ProcessSupervisor, SupervisorConfig, SupervisorEvent};
pub use output::OutputObserver;
pub use process::{
    ManagedServer, ServerId, ServerProcess, ServerSnapshot, ServerState, StateChange, split_args,
};
pub use registry::ServerRegistry;
pub use sampler::{ResourceProbe, ResourceUsage, Sample, Sampler, SysinfoProbe};
