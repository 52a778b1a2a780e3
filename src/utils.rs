//! Shared utility functions for the chainlink bridge.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::process::Command;

/// Apply platform-specific flags to hide the console window on Windows.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// Unix timestamp in seconds.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// 사용자 홈 디렉토리 (Windows: USERPROFILE, 그 외: HOME)
pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = std::env::var_os("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let var = std::env::var_os("HOME");

    var.filter(|v| !v.is_empty()).map(PathBuf::from)
}
