//! Applies configuration changes to a workspace supervisor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::ConfigSnapshot;
use crate::error::Result;
use crate::subscription::Subscription;
use crate::supervisor::{DaemonHandle, ProcessSupervisor, RestartOutcome};

#[derive(Debug, Clone)]
pub enum ChangeOutcome {
    /// Nothing about the binary location changed.
    Irrelevant,
    /// New binary recorded; no daemon to restart.
    NotRunning,
    Restarted(DaemonHandle),
    /// Folded into a restart already in progress.
    Coalesced,
}

pub struct ConfigWatcher {
    supervisor: Arc<ProcessSupervisor>,
    current: Mutex<ConfigSnapshot>,
    restarting: AtomicBool,
    dirty: AtomicBool,
}

impl ConfigWatcher {
    pub fn new(supervisor: Arc<ProcessSupervisor>, initial: ConfigSnapshot) -> Self {
        Self {
            supervisor,
            current: Mutex::new(initial),
            restarting: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Handle one snapshot. A change arriving while a restart runs marks the
    /// runner dirty; the runner then performs one more pass with the newest
    /// location, however many changes arrived meanwhile.
    pub async fn on_change(&self, next: ConfigSnapshot) -> Result<ChangeOutcome> {
        self.supervisor.set_show_output(next.show_output);

        {
            let mut current = self.lock_current();
            let relevant = current.binary_location_changed(&next);
            *current = next;
            if !relevant {
                return Ok(ChangeOutcome::Irrelevant);
            }
        }

        self.dirty.store(true, Ordering::SeqCst);
        if self.restarting.swap(true, Ordering::SeqCst) {
            tracing::debug!("Binary path change coalesced with restart in progress");
            return Ok(ChangeOutcome::Coalesced);
        }

        let mut outcome;
        loop {
            self.dirty.store(false, Ordering::SeqCst);
            outcome = self.supervisor.reconfigure(self.latest_override()).await;
            self.restarting.store(false, Ordering::SeqCst);
            // 재시작 중 도착한 변경이 있으면 한 번 더
            if !self.dirty.load(Ordering::SeqCst) || self.restarting.swap(true, Ordering::SeqCst) {
                break;
            }
        }

        match outcome {
            Ok(RestartOutcome::NotRunning) => Ok(ChangeOutcome::NotRunning),
            Ok(RestartOutcome::Restarted(handle)) => Ok(ChangeOutcome::Restarted(handle)),
            Err(e) => {
                tracing::error!("{}", e);
                Err(e)
            }
        }
    }

    /// Follow `updates` until the returned subscription is released.
    pub fn spawn(self: Arc<Self>, mut updates: watch::Receiver<ConfigSnapshot>) -> Subscription {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = updates.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
                let snapshot = updates.borrow_and_update().clone();
                let watcher = self.clone();
                tokio::spawn(async move {
                    // ConfigRestart 에러는 on_change에서 로깅됨
                    let _ = watcher.on_change(snapshot).await;
                });
            }
        });
        Subscription::new("config-watcher", cancel, task)
    }

    fn latest_override(&self) -> Option<PathBuf> {
        self.lock_current().override_for(&self.supervisor.workspace().root_path)
    }

    fn lock_current(&self) -> std::sync::MutexGuard<'_, ConfigSnapshot> {
        self.current.lock().unwrap_or_else(|e| e.into_inner())
    }
}
