//! Daemon Process - the supervised background child
//!
//! Owns the OS process handle through a waiter task:
//! - stdin/stdout are handed to the protocol channel once the daemon is ready
//! - stderr lines are forwarded to tracing
//! - a cancellation token requests a forced kill of the daemon and its children
//! - a watch channel reports exit
//!
//! On unix the daemon leads its own process group. Engine processes it
//! spawns join that group, so a forced kill never leaves them running.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::process;
use crate::error::BridgeError;
use crate::protocol::channel::DaemonChannel;

/// What to run for a workspace daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: PathBuf,
}

impl LaunchSpec {
    /// File name used to recognise our own daemons in the process table.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct ExitSummary {
    pub pid: u32,
    pub code: Option<i32>,
    pub description: String,
}

/// The daemon's stdio before the readiness handshake.
pub struct DaemonPipes {
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl DaemonPipes {
    /// Wait for the startup token and build the request channel.
    pub async fn connect(self, startup_timeout: Duration) -> Result<DaemonChannel, BridgeError> {
        let (channel, reported_pid) =
            DaemonChannel::connect(self.stdout, self.stdin, startup_timeout).await?;
        tracing::debug!("Daemon signalled readiness (pid {})", reported_pid);
        Ok(channel)
    }
}

pub struct DaemonProcess {
    pid: u32,
    kill: CancellationToken,
    exited_rx: watch::Receiver<bool>,
}

impl DaemonProcess {
    /// Spawn the daemon. `on_exit` runs once, from the waiter task, after the
    /// process has been reaped.
    pub fn spawn<F>(spec: &LaunchSpec, on_exit: F) -> Result<(Self, DaemonPipes), BridgeError>
    where
        F: FnOnce(ExitSummary) + Send + 'static,
    {
        let mut cmd = TokioCommand::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().map_err(|e| {
            BridgeError::ProcessSpawn(format!("failed to spawn '{}': {}", spec.program.display(), e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| BridgeError::ProcessSpawn("daemon exited immediately after spawn".into()))?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => return Err(BridgeError::ProcessSpawn("daemon stdio was not captured".into())),
        };

        // ── stderr reader ────────────────────────────────────
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!("[daemon {}] {}", pid, line);
                }
            });
        }

        // ── process waiter ───────────────────────────────────
        let kill = CancellationToken::new();
        let (exited_tx, exited_rx) = watch::channel(false);
        {
            let kill = kill.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = kill.cancelled() => {
                        tracing::debug!("Force-killing daemon {} and its children", pid);
                        // Windows에서는 taskkill 실행을 기다리므로 블로킹 스레드에서
                        match tokio::task::spawn_blocking(move || process::force_kill_tree(pid)).await {
                            Ok(Err(e)) => tracing::debug!("{}", e),
                            Err(e) => tracing::debug!("Tree kill task failed: {}", e),
                            Ok(Ok(())) => {}
                        }
                        let _ = child.start_kill();
                        child.wait().await
                    }
                };
                // 데몬이 먼저 죽어도 그룹에 남은 엔진 프로세스 정리
                #[cfg(unix)]
                {
                    if process::kill_process_group(pid).is_ok() {
                        tracing::debug!("Killed leftover processes of daemon {}", pid);
                    }
                }
                let (code, description) = match status {
                    Ok(status) => (status.code(), format!("daemon exited with {}", status)),
                    Err(e) => (None, format!("failed to wait for daemon: {}", e)),
                };
                tracing::info!("Daemon {} {}", pid, description);
                let _ = exited_tx.send(true);
                on_exit(ExitSummary { pid, code, description });
            });
        }

        tracing::info!("Daemon process started with PID {}", pid);
        Ok((Self { pid, kill, exited_rx }, DaemonPipes { stdin, stdout }))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn has_exited(&self) -> bool {
        *self.exited_rx.borrow()
    }

    /// Request a forced kill; returns immediately.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Receiver that flips to `true` once the process is reaped.
    pub fn exit_watch(&self) -> watch::Receiver<bool> {
        self.exited_rx.clone()
    }

    /// Wait until the process exits or `limit` elapses. Returns whether it exited.
    pub async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut rx = self.exited_rx.clone();
        let exited = async move {
            while !*rx.borrow_and_update() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        tokio::time::timeout(limit, exited).await.is_ok()
    }
}

impl Drop for DaemonProcess {
    fn drop(&mut self) {
        // 마지막 참조가 사라지면 프로세스도 정리
        self.kill.cancel();
    }
}
