//! Daemon wire protocol (v1) - 줄 단위 JSON (newline-delimited JSON)
//!
//! Every frame is one JSON object on one line carrying the protocol version in
//! `v` and a `type` tag:
//!
//! ```text
//! host  → daemon   {"v":1,"type":"exec","id":7,"args":["show","12"]}
//! host  → daemon   {"v":1,"type":"ping"}
//! host  → daemon   {"v":1,"type":"shutdown"}
//! daemon → host    {"v":1,"type":"ready","pid":4242}
//! daemon → host    {"v":1,"type":"result","id":7,"exit_code":0,"stdout":"...","stderr":""}
//! daemon → host    {"v":1,"type":"error","id":7,"message":"..."}
//! ```

pub mod channel;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::BridgeError;

pub const PROTOCOL_VERSION: u32 = 1;

/// 프로토콜 통신 오류 타입
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unsupported protocol version {0} (expected {})", PROTOCOL_VERSION)]
    Version(u32),
}

impl From<ProtocolError> for BridgeError {
    fn from(e: ProtocolError) -> Self {
        BridgeError::Protocol(e.to_string())
    }
}

/// Host → daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Exec { id: u64, args: Vec<String> },
    Ping,
    Shutdown,
}

/// Daemon → host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Ready { pid: u32 },
    Result {
        id: u64,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        message: String,
    },
}

/// Raw outcome of one engine invocation. Both dispatch paths produce this and
/// classify it with [`CommandOutput::into_result`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn from_output(output: std::process::Output) -> Self {
        Self {
            // 시그널로 종료된 경우 exit code 없음
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Exit code zero yields stdout verbatim; anything else is a `Command` error.
    pub fn into_result(self) -> Result<String, BridgeError> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(BridgeError::Command {
                exit_code: self.exit_code,
                stderr: self.stderr.trim_end().to_string(),
            })
        }
    }
}

impl Message {
    pub fn result(id: u64, output: CommandOutput) -> Self {
        Message::Result {
            id,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }
    }
}

/// Serialize one frame including the trailing newline.
pub fn encode<T: Serialize>(body: &T) -> String {
    // 내부 타입은 문자열/정수만 포함하므로 직렬화 실패 없음
    let mut value = serde_json::to_value(body).unwrap_or_default();
    if let Some(obj) = value.as_object_mut() {
        obj.insert("v".into(), PROTOCOL_VERSION.into());
    }
    let mut line = value.to_string();
    line.push('\n');
    line
}

pub fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(line.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    let version = value
        .get("v")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| ProtocolError::Malformed("missing protocol version".into()))?;
    if version != u64::from(PROTOCOL_VERSION) {
        return Err(ProtocolError::Version(version as u32));
    }
    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_frame_is_one_line() {
        let line = encode(&Request::Exec { id: 7, args: vec!["show".into(), "12".into()] });
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["v"], 1);
        assert_eq!(value["type"], "exec");
        assert_eq!(value["args"][1], "12");
    }

    #[test]
    fn multiline_stdout_stays_on_one_frame() {
        let msg = Message::result(
            3,
            CommandOutput {
                exit_code: 0,
                stdout: "#1 first\n#2 second\n".into(),
                stderr: String::new(),
            },
        );
        let line = encode(&msg);
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode::<Message>(&line).unwrap(), msg);
    }

    #[test]
    fn ready_frame_carries_version_in_v() {
        let line = encode(&Message::Ready { pid: 4242 });
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, serde_json::json!({ "v": 1, "type": "ready", "pid": 4242 }));
    }

    #[test]
    fn rejects_other_versions() {
        let err = decode::<Request>(r#"{"v":2,"type":"ping"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Version(2)));
        let err = decode::<Request>(r#"{"type":"ping"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }

    #[test]
    fn classification() {
        let ok = CommandOutput { exit_code: 0, stdout: "Created issue #4\n".into(), stderr: String::new() };
        assert_eq!(ok.into_result().unwrap(), "Created issue #4\n");

        let failed = CommandOutput { exit_code: 1, stdout: String::new(), stderr: "Error: Issue #99 not found\n".into() };
        match failed.into_result().unwrap_err() {
            BridgeError::Command { exit_code, stderr } => {
                assert_eq!(exit_code, 1);
                assert_eq!(stderr, "Error: Issue #99 not found");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
