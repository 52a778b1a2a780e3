//! Command routing: daemon when it runs, a fresh process otherwise.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::ProcessEngine;
use crate::error::{BridgeError, Result};
use crate::protocol::channel::SubmitError;
use crate::protocol::CommandOutput;
use crate::supervisor::ProcessSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Daemon,
}

/// Which commands may go through the daemon.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    direct_only: Vec<String>,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        // 작업공간/데몬 자체를 바꾸는 명령은 항상 새 프로세스로
        Self::direct_only(["init", "daemon", "import", "export"])
    }
}

impl RoutePolicy {
    pub fn direct_only<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { direct_only: commands.into_iter().map(Into::into).collect() }
    }

    /// Everything goes Direct.
    pub fn never_daemon() -> Self {
        Self { direct_only: vec!["*".into()] }
    }

    pub fn allows_daemon(&self, args: &[String]) -> bool {
        let Some(command) = args.first() else {
            return false;
        };
        !self.direct_only.iter().any(|c| c == "*" || c == command)
    }
}

pub struct CommandDispatcher {
    supervisor: Arc<ProcessSupervisor>,
    policy: RoutePolicy,
    timeout: Duration,
}

impl CommandDispatcher {
    pub fn new(supervisor: Arc<ProcessSupervisor>) -> Self {
        let timeout = supervisor.config().command_timeout;
        Self { supervisor, policy: RoutePolicy::default(), timeout }
    }

    pub fn with_policy(mut self, policy: RoutePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    /// Route for `args` given the daemon's current state.
    pub fn route(&self, args: &[String]) -> Route {
        if self.policy.allows_daemon(args) && self.supervisor.is_running() {
            Route::Daemon
        } else {
            Route::Direct
        }
    }

    /// Run a chainlink command. Stdout is returned verbatim on exit 0;
    /// a non-zero exit becomes [`BridgeError::Command`].
    pub async fn execute(&self, args: &[String]) -> Result<String> {
        self.execute_output(args).await?.into_result()
    }

    /// Like [`execute`](Self::execute) but keeps the raw output.
    pub async fn execute_output(&self, args: &[String]) -> Result<CommandOutput> {
        match self.route(args) {
            Route::Daemon => match self.submit_to_daemon(args).await {
                Ok(output) => Ok(output),
                Err(SubmitError::NotSent(e)) => {
                    tracing::debug!("Daemon unavailable ({}), running {:?} directly", e, args);
                    self.run_direct(args).await
                }
                Err(SubmitError::Failed(e)) => Err(e),
            },
            Route::Direct => self.run_direct(args).await,
        }
    }

    /// Always spawn a fresh process.
    pub async fn execute_direct(&self, args: &[String]) -> Result<String> {
        self.run_direct(args).await?.into_result()
    }

    /// Require the daemon path; fails instead of falling back.
    pub async fn execute_via_daemon(&self, args: &[String]) -> Result<String> {
        self.submit_to_daemon(args)
            .await
            .map_err(SubmitError::into_inner)?
            .into_result()
    }

    async fn submit_to_daemon(&self, args: &[String]) -> std::result::Result<CommandOutput, SubmitError> {
        let channel = self.supervisor.channel().ok_or_else(|| {
            SubmitError::NotSent(BridgeError::DaemonUnavailable("daemon is not running".into()))
        })?;
        tracing::debug!("Dispatching {:?} via daemon", args);
        channel.submit(args, self.timeout).await
    }

    async fn run_direct(&self, args: &[String]) -> Result<CommandOutput> {
        let descriptor = self.supervisor.binary()?;
        let engine = ProcessEngine::new(
            descriptor.resolved_path,
            self.supervisor.workspace().root_path.clone(),
        );
        match tokio::time::timeout(self.timeout, engine.run(args)).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(BridgeError::ProcessSpawn(e.to_string())),
            Err(_) => {
                tracing::warn!("Direct command {:?} timed out after {:?}", args, self.timeout);
                Err(BridgeError::Timeout(self.timeout.as_millis() as u64))
            }
        }
    }
}
