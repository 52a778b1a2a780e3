//! One-shot invocation of the wrapped chainlink executable.
//!
//! The Direct path and the daemon host both run commands through
//! [`ProcessEngine`], so a given argv produces the same [`CommandOutput`]
//! whichever path carried it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command as TokioCommand;

use crate::protocol::CommandOutput;

#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    working_dir: PathBuf,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            working_dir: working_dir.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Spawn `program args…`, wait, and capture both streams.
    ///
    /// The child is killed if the returned future is dropped, so callers can
    /// bound it with `tokio::time::timeout`.
    pub async fn run(&self, args: &[String]) -> std::io::Result<CommandOutput> {
        let mut cmd = TokioCommand::new(&self.program);
        cmd.args(args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        tracing::debug!("Running {} {:?}", self.program.display(), args);
        let output = cmd.output().await.map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("failed to run '{}': {}", self.program.display(), e),
            )
        })?;
        Ok(CommandOutput::from_output(output))
    }
}
