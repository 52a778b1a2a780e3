//! OS-level helpers: pid marker files and killing stray daemons.

use std::path::Path;

use thiserror::Error;

use crate::process_monitor;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("process {pid} not found")]
    NotFound { pid: u32 },
    #[error("failed to terminate process {pid}: {reason}")]
    TerminationFailed { pid: u32, reason: String },
}

/// Force-kill a process by PID. Cross-platform helper.
pub fn force_kill_pid(pid: u32) -> Result<(), ProcessError> {
    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return Err(ProcessError::NotFound { pid });
            }
            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);
            if result == 0 {
                return Err(ProcessError::TerminationFailed {
                    pid,
                    reason: "TerminateProcess failed".to_string(),
                });
            }
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Err(ProcessError::NotFound { pid }),
            Err(e) => {
                return Err(ProcessError::TerminationFailed {
                    pid,
                    reason: format!("Failed to send signal: {}", e),
                })
            }
        }
    }

    Ok(())
}

/// Force-kill a daemon together with everything it spawned.
///
/// On unix the daemon leads its own process group, so the whole group is
/// signalled; a pid that leads no group gets a plain kill. Windows walks
/// the tree with `taskkill /T`.
pub fn force_kill_tree(pid: u32) -> Result<(), ProcessError> {
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;

        let status = std::process::Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .map(|output| output.status.success());
        if !matches!(status, Ok(true)) {
            // 트리 종료 실패 시 단일 프로세스라도 종료
            force_kill_pid(pid)?;
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        match kill_process_group(pid) {
            Ok(()) => {}
            Err(ProcessError::NotFound { .. }) => force_kill_pid(pid)?,
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

/// SIGKILL every member of the process group led by `pgid`.
#[cfg(not(target_os = "windows"))]
pub fn kill_process_group(pgid: u32) -> Result<(), ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    match signal::killpg(Pid::from_raw(pgid as i32), Signal::SIGKILL) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => Err(ProcessError::NotFound { pid: pgid }),
        Err(e) => Err(ProcessError::TerminationFailed {
            pid: pgid,
            reason: format!("Failed to signal process group: {}", e),
        }),
    }
}

/// Contents of the daemon pid file: the daemon, and the host that launched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidRecord {
    pub pid: u32,
    pub host_pid: Option<u32>,
}

/// Read a pid marker file. Missing or garbled files yield `None`.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    read_pid_record(path).map(|record| record.pid)
}

/// First line is the daemon pid, an optional second line the host pid.
pub fn read_pid_record(path: &Path) -> Option<PidRecord> {
    let content = std::fs::read_to_string(path).ok()?;
    let mut lines = content.lines();
    let pid = lines.next()?.trim().parse().ok()?;
    let host_pid = lines.next().and_then(|line| line.trim().parse().ok());
    Some(PidRecord { pid, host_pid })
}

pub fn write_pid_file(path: &Path, pid: u32) -> std::io::Result<()> {
    write_pid_record(path, PidRecord { pid, host_pid: None })
}

pub fn write_pid_record(path: &Path, record: PidRecord) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = match record.host_pid {
        Some(host) => format!("{}\n{}\n", record.pid, host),
        None => record.pid.to_string(),
    };
    std::fs::write(path, content)
}

pub fn remove_pid_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove pid file {}: {}", path.display(), e),
    }
}

/// 이전 호스트가 남긴 데몬 정리
///
/// A dead pid only leaves a stale file behind. A live pid running
/// `program_name` whose recorded host is gone (or is this process) is an
/// orphan still holding the workspace log, so it is killed with its children.
/// A daemon whose host is another live process is left to that host.
/// Returns the pid that was killed, if any.
pub async fn reap_stale_daemon(pid_file: &Path, program_name: &str) -> Option<u32> {
    let PidRecord { pid, host_pid } = read_pid_record(pid_file)?;

    if !process_monitor::is_running_async(pid).await {
        tracing::debug!("Removing stale pid file {} (pid {} is gone)", pid_file.display(), pid);
        remove_pid_file(pid_file);
        return None;
    }

    if !process_monitor::matches_program_async(pid, program_name).await {
        // PID 재사용, 다른 프로세스이므로 건드리지 않음
        tracing::debug!("pid {} from {} belongs to another program", pid, pid_file.display());
        remove_pid_file(pid_file);
        return None;
    }

    if let Some(host) = host_pid.filter(|host| *host != std::process::id()) {
        if process_monitor::is_running_async(host).await {
            tracing::warn!(
                "Daemon {} for {} is owned by live host {}, leaving it alone",
                pid,
                pid_file.display(),
                host
            );
            return None;
        }
    }

    tracing::warn!("Killing orphaned chainlink daemon (pid {}) left by a previous session", pid);
    if let Err(e) = force_kill_tree(pid) {
        tracing::warn!("{}", e);
    }
    remove_pid_file(pid_file);
    Some(pid)
}
