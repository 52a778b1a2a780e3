//! 통합 테스트 공용 픽스처: 가짜 chainlink 실행 파일과 작업공간

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chainlink_bridge::resolver::BinaryResolver;
use chainlink_bridge::supervisor::{DaemonHost, ProcessSupervisor, SupervisorConfig, WorkspaceContext};
use tempfile::TempDir;

/// Shell stand-in for the chainlink CLI. Runs in the workspace root.
pub const FAKE_CHAINLINK: &str = r#"#!/bin/sh
case "$1" in
  list)
    echo x >> .spawns
    printf '#1    [open]   Fix login\n#2    [open]   Add tests\n'
    ;;
  show)
    if [ "$2" = 99 ]; then echo "Issue #99 not found" >&2; exit 1; fi
    if [ "$2" = 12 ]; then sleep 0.3; fi
    echo "Issue #$2"
    ;;
  log)
    echo "$2" >> order.log
    echo "$2"
    ;;
  slow)
    echo $$ > engine.pid
    sleep "$2"
    echo slept
    ;;
  *)
    echo "error: unrecognized subcommand '$1'" >&2
    exit 2
    ;;
esac
"#;

/// Minimal daemon that speaks the wire protocol itself.
pub const FAKE_NATIVE_DAEMON: &str = r#"#!/bin/sh
printf '{"v":1,"type":"ready","pid":%d}\n' $$
while read -r line; do
  case "$line" in
    *shutdown*) exit 0 ;;
  esac
done
"#;

/// Signals readiness, then never reads stdin again.
pub const FAKE_STUCK_DAEMON: &str = r#"#!/bin/sh
printf '{"v":1,"type":"ready","pid":%d}\n' $$
exec sleep 30
"#;

pub struct Fixture {
    pub bundle: TempDir,
    pub workspace: TempDir,
    pub engine: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_engine(FAKE_CHAINLINK)
    }

    pub fn with_engine(script: &str) -> Self {
        let bundle = tempfile::tempdir().unwrap();
        let workspace = tempfile::tempdir().unwrap();
        std::fs::create_dir(workspace.path().join(".chainlink")).unwrap();

        let engine = BinaryResolver::new().unwrap().bundled_path(bundle.path());
        write_script(&engine, script);
        Self { bundle, workspace, engine }
    }

    pub fn root(&self) -> &Path {
        self.workspace.path()
    }

    pub fn supervisor(&self, config: SupervisorConfig) -> Arc<ProcessSupervisor> {
        Arc::new(ProcessSupervisor::new(
            WorkspaceContext::detect(self.root()),
            self.bundle.path(),
            BinaryResolver::new().unwrap(),
            config,
        ))
    }

    pub fn read(&self, name: &str) -> String {
        std::fs::read_to_string(self.root().join(name)).unwrap_or_default()
    }

    /// Pid of the engine process currently running `slow`.
    pub async fn engine_pid(&self) -> u32 {
        for _ in 0..250 {
            if let Ok(pid) = self.read("engine.pid").trim().parse() {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("engine never recorded its pid");
    }
}

pub fn write_script(path: &Path, body: &str) {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

pub fn bridge_exe() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chainlink-bridge"))
}

/// Supervisor settings for tests: bridge-hosted daemon, short timeouts.
pub fn test_config() -> SupervisorConfig {
    SupervisorConfig::default()
        .with_daemon_host(DaemonHost::Bridge(bridge_exe()))
        .with_startup_timeout(Duration::from_secs(10))
        .with_stop_grace(Duration::from_secs(2))
        .with_heartbeat(Some(Duration::from_millis(200)), Some(Duration::from_secs(5)))
        .with_command_timeout(Duration::from_secs(10))
}

pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Poll until `pid` is gone or `limit` elapses.
pub async fn wait_gone(pid: u32, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !chainlink_bridge::process_monitor::is_running_async(pid).await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
