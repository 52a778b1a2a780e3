use sysinfo::{Pid, ProcessStatus, System};

/// 특정 PID가 실행 중인지 확인 (크로스 플랫폼)
///
/// Zombies count as gone: their owner has exited and only the process table
/// entry remains.
pub fn is_running(pid: u32) -> bool {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid))
        .map(|p| !matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
        .unwrap_or(false)
}

/// Name of a live process, if any.
pub fn process_name(pid: u32) -> Option<String> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.process(Pid::from_u32(pid)).map(|p| p.name().to_string())
}

/// Whether `pid` is alive and its name matches `program_name`
/// (case-insensitive, ignoring an `.exe` suffix). Guards against pid reuse.
pub fn matches_program(pid: u32, program_name: &str) -> bool {
    let Some(name) = process_name(pid) else {
        return false;
    };
    let normalize = |s: &str| s.to_lowercase().trim_end_matches(".exe").to_string();
    let name = normalize(&name);
    let wanted = normalize(program_name);
    // 리눅스는 프로세스 이름을 15자로 자름
    !name.is_empty() && (name == wanted || wanted.starts_with(&name))
}

// ── Async wrappers ─────────────────────────────────────────
// sysinfo 시스템 콜은 동기적으로 OS 프로세스 테이블 전체를 스캔합니다.
// tokio 워커 스레드에서 직접 호출하면 런타임 전체가 블로킹되므로,
// spawn_blocking을 통해 전용 블로킹 스레드풀에서 실행합니다.

/// `is_running`의 비동기 래퍼.
pub async fn is_running_async(pid: u32) -> bool {
    tokio::task::spawn_blocking(move || is_running(pid))
        .await
        .unwrap_or(false)
}

/// `matches_program`의 비동기 래퍼.
pub async fn matches_program_async(pid: u32, program_name: &str) -> bool {
    let program_name = program_name.to_string();
    tokio::task::spawn_blocking(move || matches_program(pid, &program_name))
        .await
        .unwrap_or(false)
}
