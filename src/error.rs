//! Bridge 전용 에러 타입 - 에러 종류를 구분하여 호스트가
//! 사용자에게 보여줄 메시지와 복구 정책을 결정할 수 있게 합니다.

use std::path::PathBuf;

/// Errors surfaced by the resolver, supervisor, dispatcher, installer and config watcher.
#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("chainlink binary not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to start chainlink daemon: {0}")]
    ProcessSpawn(String),

    #[error("chainlink exited with code {exit_code}: {stderr}")]
    Command { exit_code: i32, stderr: String },

    #[error("command timed out after {0} ms")]
    Timeout(u64),

    #[error("daemon is not reachable: {0}")]
    DaemonUnavailable(String),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("failed to install chainlink binary: {0}")]
    Install(String),

    #[error("restart after configuration change failed: {0}")]
    ConfigRestart(String),

    #[error("supervisor for '{0}' has been disposed")]
    Disposed(PathBuf),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BinaryNotFound(_) => "BINARY_NOT_FOUND",
            Self::ProcessSpawn(_) => "PROCESS_SPAWN",
            Self::Command { .. } => "COMMAND_FAILED",
            Self::Timeout(_) => "TIMEOUT",
            Self::DaemonUnavailable(_) => "DAEMON_UNAVAILABLE",
            Self::Protocol(_) => "PROTOCOL",
            Self::Install(_) => "INSTALL_FAILED",
            Self::ConfigRestart(_) => "CONFIG_RESTART",
            Self::Disposed(_) => "DISPOSED",
            Self::Io(_) => "IO",
        }
    }

    /// Fatal errors end the workspace's activation; everything else is scoped
    /// to one call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::BinaryNotFound(_) | Self::Disposed(_))
    }

    /// Exit code for a failed command, if the engine produced one.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Command { exit_code, .. } => Some(*exit_code),
            _ => None,
        }
    }

    /// JSON 에러 응답 생성 (host 모드 출력용)
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
            "exit_code": self.exit_code(),
        })
    }
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
