pub mod daemon_process;
pub mod process;
pub mod state_machine;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, Mutex};

use crate::error::{BridgeError, Result};
use crate::protocol::channel::DaemonChannel;
use crate::resolver::{BinaryDescriptor, BinaryResolver};
use daemon_process::{DaemonProcess, ExitSummary, LaunchSpec};
use state_machine::{DaemonState, StateMachine};

/// Directory chainlink creates in a workspace root; also holds daemon state.
pub const PROJECT_MARKER: &str = ".chainlink";
pub const PID_FILE: &str = "daemon.pid";
pub const LOG_FILE: &str = "daemon.log";

// ── Configuration ──────────────────────────────────────────

/// Which executable hosts the daemon loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonHost {
    /// The resolved chainlink binary speaks the protocol itself.
    Native,
    /// A bridge executable runs `daemon run` and drives the resolved binary as its engine.
    Bridge(PathBuf),
}

impl DaemonHost {
    /// The running executable as daemon host.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::Bridge(std::env::current_exe()?))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    /// `None` disables host→daemon pings.
    pub heartbeat_interval: Option<Duration>,
    /// Passed to a bridge-hosted daemon; `None` leaves only the parent watch.
    pub daemon_heartbeat_timeout: Option<Duration>,
    pub command_timeout: Duration,
    pub daemon_host: DaemonHost,
    pub show_output: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(3),
            heartbeat_interval: Some(Duration::from_secs(5)),
            daemon_heartbeat_timeout: Some(Duration::from_secs(30)),
            command_timeout: Duration::from_secs(30),
            daemon_host: DaemonHost::current_exe().unwrap_or(DaemonHost::Native),
            show_output: false,
        }
    }
}

impl SupervisorConfig {
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn with_heartbeat(mut self, interval: Option<Duration>, daemon_timeout: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self.daemon_heartbeat_timeout = daemon_timeout;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_daemon_host(mut self, host: DaemonHost) -> Self {
        self.daemon_host = host;
        self
    }

    pub fn with_show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }
}

// ── Workspace ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub root_path: PathBuf,
    pub project_marker_present: bool,
}

impl WorkspaceContext {
    pub fn detect(root: impl Into<PathBuf>) -> Self {
        let root_path = root.into();
        let project_marker_present = root_path.join(PROJECT_MARKER).is_dir();
        Self { root_path, project_marker_present }
    }

    /// Per-workspace daemon state (pid marker, log).
    pub fn state_dir(&self) -> PathBuf {
        self.root_path.join(PROJECT_MARKER)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonHandle {
    pub pid: u32,
    pub started_at: u64,
    pub log_path: PathBuf,
    pub state: DaemonState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    Starting,
    Running { pid: u32 },
    Stopping,
    Stopped,
    Crashed { reason: String },
    Disposed,
}

/// Result of applying a new binary location.
#[derive(Debug, Clone)]
pub enum RestartOutcome {
    NotRunning,
    Restarted(DaemonHandle),
}

// ── Supervisor ─────────────────────────────────────────────

/// The single mutable slot per workspace. Only transition logic writes it.
struct Slot {
    machine: StateMachine,
    handle: Option<DaemonHandle>,
    process: Option<Arc<DaemonProcess>>,
    channel: Option<Arc<DaemonChannel>>,
    descriptor: Option<BinaryDescriptor>,
    /// Bumped per launch and on dispose; stale exit callbacks compare against it.
    generation: u64,
    attempts: u64,
    last_error: Option<String>,
}

type SharedSlot = Arc<StdMutex<Slot>>;

/// Owns one workspace daemon's lifecycle.
pub struct ProcessSupervisor {
    workspace: WorkspaceContext,
    bundle_root: PathBuf,
    resolver: BinaryResolver,
    config: SupervisorConfig,
    /// start/stop/reconfigure 직렬화
    lifecycle: Mutex<()>,
    slot: SharedSlot,
    override_path: StdMutex<Option<PathBuf>>,
    disposed: AtomicBool,
    show_output: AtomicBool,
    events: broadcast::Sender<LifecycleEvent>,
}

impl ProcessSupervisor {
    /// `bundle_root` holds the bundled `bin/` directory.
    pub fn new(
        workspace: WorkspaceContext,
        bundle_root: impl Into<PathBuf>,
        resolver: BinaryResolver,
        config: SupervisorConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let show_output = config.show_output;
        Self {
            workspace,
            bundle_root: bundle_root.into(),
            resolver,
            config,
            lifecycle: Mutex::new(()),
            slot: Arc::new(StdMutex::new(Slot {
                machine: StateMachine::new(),
                handle: None,
                process: None,
                channel: None,
                descriptor: None,
                generation: 0,
                attempts: 0,
                last_error: None,
            })),
            override_path: StdMutex::new(None),
            disposed: AtomicBool::new(false),
            show_output: AtomicBool::new(show_output),
            events,
        }
    }

    pub fn with_override(self, path: Option<PathBuf>) -> Self {
        self.set_override_path(path);
        self
    }

    pub fn workspace(&self) -> &WorkspaceContext {
        &self.workspace
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    pub fn log_path(&self) -> PathBuf {
        self.workspace.state_dir().join(LOG_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.workspace.state_dir().join(PID_FILE)
    }

    // ── Queries ─────────────────────────────────────────────

    pub fn has_chainlink_project(&self) -> bool {
        self.workspace.project_marker_present
    }

    pub fn state(&self) -> DaemonState {
        self.slot().machine.state()
    }

    pub fn is_running(&self) -> bool {
        self.state() == DaemonState::Running
    }

    pub fn get_pid(&self) -> Option<u32> {
        let slot = self.slot();
        if slot.machine.state() == DaemonState::Running {
            slot.handle.as_ref().map(|h| h.pid)
        } else {
            None
        }
    }

    /// Current handle with its live state; `None` when no daemon exists.
    pub fn handle(&self) -> Option<DaemonHandle> {
        let slot = self.slot();
        let state = slot.machine.state();
        slot.handle.clone().filter(|_| state.is_live()).map(|mut h| {
            h.state = state;
            h
        })
    }

    /// Request channel of the running daemon.
    pub fn channel(&self) -> Option<Arc<DaemonChannel>> {
        let slot = self.slot();
        if slot.machine.state() == DaemonState::Running {
            slot.channel.clone()
        } else {
            None
        }
    }

    pub fn last_error(&self) -> Option<String> {
        self.slot().last_error.clone()
    }

    pub fn override_path(&self) -> Option<PathBuf> {
        lock(&self.override_path).clone()
    }

    /// Store a new override without touching the cached descriptor.
    /// [`reconfigure`](Self::reconfigure) is the path that applies it.
    pub fn set_override_path(&self, path: Option<PathBuf>) {
        *lock(&self.override_path) = path.filter(|p| !p.as_os_str().is_empty());
    }

    pub fn set_show_output(&self, show: bool) {
        self.show_output.store(show, Ordering::SeqCst);
    }

    /// The descriptor for this activation, resolved on first use.
    pub fn binary(&self) -> Result<BinaryDescriptor> {
        // 슬롯 락을 잡은 채로 해석해야 reconfigure와 엇갈리지 않음
        let mut slot = self.slot();
        if let Some(descriptor) = slot.descriptor.clone() {
            return Ok(descriptor);
        }
        let override_path = self.override_path();
        let descriptor = self.resolver.resolve(&self.bundle_root, override_path.as_deref())?;
        tracing::info!("Resolved chainlink binary: {}", descriptor);
        slot.descriptor = Some(descriptor.clone());
        Ok(descriptor)
    }

    // ── Lifecycle ───────────────────────────────────────────

    /// Start the daemon, or join an in-flight start. Never spawns a second
    /// process while one is live.
    pub async fn start(&self) -> Result<DaemonHandle> {
        self.ensure_live()?;
        let observed_attempts = self.slot().attempts;
        let _guard = self.lifecycle.lock().await;
        self.ensure_live()?;

        {
            let slot = self.slot();
            match slot.machine.state() {
                DaemonState::Running => {
                    if let Some(handle) = slot.handle.clone() {
                        return Ok(handle);
                    }
                }
                // 대기 중 다른 start가 실패함 → 같은 결과를 반환, 재시도하지 않음
                DaemonState::Crashed if slot.attempts != observed_attempts => {
                    return Err(BridgeError::ProcessSpawn(
                        slot.last_error.clone().unwrap_or_else(|| "daemon crashed".into()),
                    ));
                }
                _ => {}
            }
        }

        self.start_locked().await
    }

    /// Graceful shutdown with a bounded grace period, then force kill.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await
    }

    /// Forced termination regardless of state. Does not wait for the
    /// lifecycle lock, so it also cuts short a pending `stop()` or `start()`.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let process = {
            let mut slot = self.slot();
            slot.generation += 1;
            slot.machine.force_idle();
            slot.handle = None;
            slot.channel = None;
            slot.process.take()
        };
        if let Some(process) = process {
            tracing::info!("Disposing daemon {} for {}", process.pid(), self.workspace.root_path.display());
            process.kill();
            if !process.wait_for_exit(self.config.stop_grace).await {
                tracing::warn!("Daemon {} did not exit after kill", process.pid());
            }
        }
        process::remove_pid_file(&self.pid_file());
        let _ = self.events.send(LifecycleEvent::Disposed);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Apply a new override path. A running daemon is stopped and started
    /// again on the new binary; if that fails the previous binary is restored.
    pub async fn reconfigure(&self, override_path: Option<PathBuf>) -> Result<RestartOutcome> {
        let _guard = self.lifecycle.lock().await;
        self.ensure_live()?;

        let previous_override = self.override_path();
        self.set_override_path(override_path);
        let previous_descriptor = self.slot().descriptor.take();

        if self.state() != DaemonState::Running {
            tracing::debug!("Binary location changed; no daemon running, nothing to restart");
            return Ok(RestartOutcome::NotRunning);
        }

        tracing::info!("Binary location changed; restarting daemon");
        self.stop_locked().await?;

        let err = match self.start_locked().await {
            Ok(handle) => return Ok(RestartOutcome::Restarted(handle)),
            Err(e) => e,
        };

        tracing::warn!("Restart on new binary failed: {}", err);
        self.set_override_path(previous_override);
        self.slot().descriptor = previous_descriptor;

        match self.start_locked().await {
            Ok(handle) => Err(BridgeError::ConfigRestart(format!(
                "{}; previous binary restored (daemon pid {})",
                err, handle.pid
            ))),
            Err(restore_err) => Err(BridgeError::ConfigRestart(format!(
                "{}; restoring the previous binary also failed ({}), no daemon is running",
                err, restore_err
            ))),
        }
    }

    // ── Internals ───────────────────────────────────────────

    fn slot(&self) -> MutexGuard<'_, Slot> {
        lock(&self.slot)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(BridgeError::Disposed(self.workspace.root_path.clone()))
        } else {
            Ok(())
        }
    }

    async fn start_locked(&self) -> Result<DaemonHandle> {
        let descriptor = self.binary()?;

        let generation = {
            let mut slot = self.slot();
            slot.machine
                .transition(DaemonState::Starting)
                .map_err(|e| BridgeError::ProcessSpawn(e.to_string()))?;
            slot.attempts += 1;
            slot.generation += 1;
            slot.last_error = None;
            slot.generation
        };
        let _ = self.events.send(LifecycleEvent::Starting);

        match self.launch(&descriptor, generation).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                mark_crashed(&self.slot, &self.events, generation, e.to_string());
                Err(e)
            }
        }
    }

    async fn launch(&self, descriptor: &BinaryDescriptor, generation: u64) -> Result<DaemonHandle> {
        let spec = self.launch_spec(descriptor);

        if let Some(pid) = process::reap_stale_daemon(&self.pid_file(), &spec.program_name()).await {
            tracing::info!("Reaped orphaned daemon {} before starting", pid);
        }

        let slot_ref = Arc::downgrade(&self.slot);
        let events = self.events.clone();
        let (daemon, pipes) = DaemonProcess::spawn(&spec, move |exit| {
            on_daemon_exit(slot_ref, &events, generation, exit)
        })?;
        let daemon = Arc::new(daemon);
        let pid = daemon.pid();
        self.slot().process = Some(daemon.clone());

        if self.is_disposed() {
            daemon.kill();
            return Err(BridgeError::Disposed(self.workspace.root_path.clone()));
        }

        let channel = Arc::new(pipes.connect(self.config.startup_timeout).await?);

        let handle = {
            let mut slot = self.slot();
            if slot.generation != generation || slot.machine.state() != DaemonState::Starting {
                return Err(BridgeError::ProcessSpawn(
                    "daemon was terminated while starting".into(),
                ));
            }
            slot.machine
                .transition(DaemonState::Running)
                .map_err(|e| BridgeError::ProcessSpawn(e.to_string()))?;
            let handle = DaemonHandle {
                pid,
                started_at: crate::utils::current_timestamp(),
                log_path: self.log_path(),
                state: DaemonState::Running,
            };
            slot.handle = Some(handle.clone());
            slot.channel = Some(channel.clone());
            handle
        };

        if let Some(interval) = self.config.heartbeat_interval {
            spawn_heartbeat(Arc::downgrade(&channel), &daemon, interval);
        }

        if self.show_output.load(Ordering::SeqCst) {
            tracing::info!("Chainlink daemon {} running, log: {}", pid, handle.log_path.display());
        } else {
            tracing::debug!("Chainlink daemon {} running, log: {}", pid, handle.log_path.display());
        }
        let _ = self.events.send(LifecycleEvent::Running { pid });
        Ok(handle)
    }

    async fn stop_locked(&self) -> Result<()> {
        let (daemon, channel) = {
            let mut slot = self.slot();
            match slot.machine.state() {
                DaemonState::Idle | DaemonState::Stopping => return Ok(()),
                DaemonState::Crashed => {
                    let _ = slot.machine.transition(DaemonState::Idle);
                    slot.handle = None;
                    slot.channel = None;
                    slot.process = None;
                    return Ok(());
                }
                DaemonState::Starting | DaemonState::Running => {
                    slot.machine
                        .transition(DaemonState::Stopping)
                        .map_err(|e| BridgeError::ProcessSpawn(e.to_string()))?;
                    (slot.process.clone(), slot.channel.take())
                }
            }
        };
        let _ = self.events.send(LifecycleEvent::Stopping);

        if let Some(channel) = channel {
            // 멈춘 데몬의 stdin이 가득 차면 쓰기가 끝나지 않으므로 grace로 제한
            match tokio::time::timeout(self.config.stop_grace, channel.shutdown()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!("Shutdown request not delivered: {}", e),
                Err(_) => tracing::warn!("Shutdown request not written within {:?}", self.config.stop_grace),
            }
        }

        if let Some(daemon) = &daemon {
            if !daemon.wait_for_exit(self.config.stop_grace).await {
                tracing::warn!(
                    "Daemon {} did not exit within {:?}, force killing",
                    daemon.pid(),
                    self.config.stop_grace
                );
                daemon.kill();
                if !daemon.wait_for_exit(self.config.stop_grace).await {
                    tracing::error!("Daemon {} survived force kill", daemon.pid());
                }
                process::remove_pid_file(&self.pid_file());
            }
        }

        {
            let mut slot = self.slot();
            if slot.machine.state() == DaemonState::Stopping {
                let _ = slot.machine.transition(DaemonState::Idle);
            }
            slot.handle = None;
            slot.process = None;
        }
        tracing::info!("Chainlink daemon stopped for {}", self.workspace.root_path.display());
        let _ = self.events.send(LifecycleEvent::Stopped);
        Ok(())
    }

    fn launch_spec(&self, descriptor: &BinaryDescriptor) -> LaunchSpec {
        let state_dir = self.workspace.state_dir();
        let mut args: Vec<OsString> = vec!["daemon".into(), "run".into(), "--dir".into(), state_dir.into()];

        let program = match &self.config.daemon_host {
            DaemonHost::Native => descriptor.resolved_path.clone(),
            DaemonHost::Bridge(exe) => {
                args.push("--engine".into());
                args.push(descriptor.resolved_path.clone().into());
                args.push("--parent-pid".into());
                args.push(std::process::id().to_string().into());
                if let Some(timeout) = self.config.daemon_heartbeat_timeout {
                    args.push("--heartbeat-timeout-ms".into());
                    args.push(timeout.as_millis().to_string().into());
                }
                exe.clone()
            }
        };

        LaunchSpec {
            program,
            args,
            working_dir: self.workspace.root_path.clone(),
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        // dispose 없이 드롭되면 프로세스만이라도 정리
        if let Some(process) = lock(&self.slot).process.take() {
            process.kill();
        }
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn mark_crashed(slot: &StdMutex<Slot>, events: &broadcast::Sender<LifecycleEvent>, generation: u64, reason: String) {
    let process = {
        let mut slot = lock(slot);
        if slot.generation != generation {
            return;
        }
        let state = slot.machine.state();
        if matches!(state, DaemonState::Starting | DaemonState::Running) {
            let _ = slot.machine.transition(DaemonState::Crashed);
            tracing::error!("Chainlink daemon crashed: {}", reason);
            let _ = events.send(LifecycleEvent::Crashed { reason: reason.clone() });
        }
        if slot.machine.state() != DaemonState::Crashed {
            return;
        }
        slot.last_error = Some(reason);
        slot.handle = None;
        slot.channel = None;
        slot.process.take()
    };
    if let Some(process) = process {
        process.kill();
    }
}

fn on_daemon_exit(
    slot: Weak<StdMutex<Slot>>,
    events: &broadcast::Sender<LifecycleEvent>,
    generation: u64,
    exit: ExitSummary,
) {
    if let Some(slot) = slot.upgrade() {
        mark_crashed(&slot, events, generation, exit.description);
    }
}

/// Ping the daemon while it lives so its heartbeat watch stays satisfied.
fn spawn_heartbeat(channel: Weak<DaemonChannel>, daemon: &DaemonProcess, interval: Duration) {
    let mut exited = daemon.exit_watch();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = exited.changed() => {
                    if changed.is_err() || *exited.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let Some(channel) = channel.upgrade() else { break };
            if channel.is_closed() {
                break;
            }
            if let Err(e) = channel.ping().await {
                tracing::debug!("Heartbeat stopped: {}", e);
                break;
            }
        }
    });
}

/// Resolve a workspace-relative or absolute override string.
pub fn override_from_setting(root: &Path, setting: &str) -> Option<PathBuf> {
    let trimmed = setting.trim();
    if trimmed.is_empty() {
        return None;
    }
    let path = PathBuf::from(trimmed);
    Some(if path.is_absolute() { path } else { root.join(path) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{bundled_name, Arch, Platform};

    fn supervisor_for(root: &Path) -> ProcessSupervisor {
        let resolver = BinaryResolver::for_target(Platform::Linux, Arch::X64);
        ProcessSupervisor::new(
            WorkspaceContext::detect(root),
            root,
            resolver,
            SupervisorConfig::default().with_daemon_host(DaemonHost::Native),
        )
    }

    #[test]
    fn workspace_marker_detection() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!WorkspaceContext::detect(dir.path()).project_marker_present);
        std::fs::create_dir(dir.path().join(PROJECT_MARKER)).unwrap();
        let ctx = WorkspaceContext::detect(dir.path());
        assert!(ctx.project_marker_present);
        assert_eq!(ctx.state_dir(), dir.path().join(".chainlink"));
    }

    #[test]
    fn idle_supervisor_reports_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_for(dir.path());
        assert_eq!(sup.state(), DaemonState::Idle);
        assert!(!sup.is_running());
        assert_eq!(sup.get_pid(), None);
        assert!(sup.handle().is_none());
        assert!(sup.channel().is_none());
        assert!(!sup.has_chainlink_project());
    }

    #[tokio::test]
    async fn start_without_binary_is_binary_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_for(dir.path());
        let err = sup.start().await.unwrap_err();
        assert!(matches!(err, BridgeError::BinaryNotFound(_)));
        assert_eq!(sup.state(), DaemonState::Idle);
    }

    #[tokio::test]
    async fn stop_and_dispose_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor_for(dir.path());
        sup.stop().await.unwrap();
        sup.stop().await.unwrap();
        sup.dispose().await;
        sup.dispose().await;
        assert!(!sup.is_running());
        assert!(matches!(sup.start().await, Err(BridgeError::Disposed(_))));
    }

    #[tokio::test]
    async fn reconfigure_without_daemon_only_swaps_binary() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(bundled_name(Platform::Linux, Arch::X64)), b"").unwrap();
        let custom = dir.path().join("custom-chainlink");
        std::fs::write(&custom, b"").unwrap();

        let sup = supervisor_for(dir.path());
        assert_eq!(sup.binary().unwrap().source_kind, crate::resolver::SourceKind::Bundled);

        let outcome = sup.reconfigure(Some(custom.clone())).await.unwrap();
        assert!(matches!(outcome, RestartOutcome::NotRunning));
        let descriptor = sup.binary().unwrap();
        assert_eq!(descriptor.resolved_path, custom);
        assert_eq!(sup.state(), DaemonState::Idle);
    }

    #[test]
    fn override_path_is_not_applied_until_reconfigure() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        std::fs::write(bin.join(bundled_name(Platform::Linux, Arch::X64)), b"").unwrap();
        let custom = dir.path().join("custom-chainlink");
        std::fs::write(&custom, b"").unwrap();

        let sup = supervisor_for(dir.path());
        let first = sup.binary().unwrap();
        sup.set_override_path(Some(custom));
        assert_eq!(sup.binary().unwrap(), first);
    }

    #[test]
    fn bridge_launch_spec_carries_engine_and_parent() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Linux, Arch::X64);
        let sup = ProcessSupervisor::new(
            WorkspaceContext::detect(dir.path()),
            dir.path(),
            resolver,
            SupervisorConfig::default()
                .with_daemon_host(DaemonHost::Bridge(PathBuf::from("/opt/bridge")))
                .with_heartbeat(None, Some(Duration::from_millis(1500))),
        );
        let descriptor = BinaryDescriptor {
            platform: Platform::Linux,
            arch: Arch::X64,
            resolved_path: PathBuf::from("/opt/chainlink"),
            source_kind: crate::resolver::SourceKind::Override,
        };
        let spec = sup.launch_spec(&descriptor);
        assert_eq!(spec.program, PathBuf::from("/opt/bridge"));
        let args: Vec<String> = spec.args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(&args[..2], &["daemon", "run"]);
        assert!(args.windows(2).any(|w| w[0] == "--engine" && w[1] == "/opt/chainlink"));
        assert!(args.windows(2).any(|w| w[0] == "--parent-pid" && w[1] == std::process::id().to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--heartbeat-timeout-ms" && w[1] == "1500"));
        assert_eq!(spec.working_dir, dir.path());
    }

    #[test]
    fn override_setting_resolution() {
        let root = Path::new("/work");
        assert_eq!(override_from_setting(root, "  "), None);
        assert_eq!(override_from_setting(root, "tools/chainlink"), Some(PathBuf::from("/work/tools/chainlink")));
        assert_eq!(override_from_setting(root, "/usr/bin/chainlink"), Some(PathBuf::from("/usr/bin/chainlink")));
    }
}
