use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Idle,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl DaemonState {
    /// States in which a daemon process may exist.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }

    /// `start()` may only begin from these.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Crashed)
    }
}

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("invalid transition: {0:?} -> {1:?}")]
    InvalidTransition(DaemonState, DaemonState),
}

pub struct StateMachine {
    state: DaemonState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self { state: DaemonState::Idle }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn can_transition(&self, to: DaemonState) -> bool {
        use DaemonState::*;
        matches!(
            (self.state, to),
            (Idle, Starting)
                | (Crashed, Starting)
                | (Starting, Running)
                | (Starting, Crashed)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Running, Crashed)
                | (Stopping, Idle)
                | (Crashed, Idle)
        )
    }

    pub fn transition(&mut self, to: DaemonState) -> Result<(), TransitionError> {
        if self.can_transition(to) {
            tracing::info!("Daemon state transition: {:?} -> {:?}", self.state, to);
            self.state = to;
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition(self.state, to))
        }
    }

    /// dispose 전용: 현재 상태와 무관하게 Idle로 강제 전환
    pub fn force_idle(&mut self) {
        if self.state != DaemonState::Idle {
            tracing::info!("Daemon state forced: {:?} -> Idle", self.state);
            self.state = DaemonState::Idle;
        }
    }
}
