//! How a daemon notices that its launcher is gone.
//!
//! Stdin EOF is always watched by the serve loop itself; these channels cover
//! the cases where the pipe stays open (inherited handles, a wedged host).

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::process_monitor;

/// Resolves with a human-readable reason once liveness is lost.
pub type LossFuture = Pin<Box<dyn Future<Output = String> + Send>>;

pub trait LivenessChannel: Send + 'static {
    /// `activity` carries the time of the last inbound line.
    fn watch(self, activity: watch::Receiver<Instant>) -> LossFuture;
}

/// Never reports loss.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

impl LivenessChannel for Never {
    fn watch(self, _activity: watch::Receiver<Instant>) -> LossFuture {
        Box::pin(std::future::pending())
    }
}

impl<L: LivenessChannel> LivenessChannel for Option<L> {
    fn watch(self, activity: watch::Receiver<Instant>) -> LossFuture {
        match self {
            Some(inner) => inner.watch(activity),
            None => Never.watch(activity),
        }
    }
}

/// Polls the launcher's pid.
#[derive(Debug, Clone, Copy)]
pub struct ParentWatch {
    pid: u32,
    interval: Duration,
}

impl ParentWatch {
    pub fn new(pid: u32, interval: Duration) -> Self {
        Self { pid, interval }
    }
}

impl LivenessChannel for ParentWatch {
    fn watch(self, _activity: watch::Receiver<Instant>) -> LossFuture {
        Box::pin(async move {
            loop {
                tokio::time::sleep(self.interval).await;
                if !process_monitor::is_running_async(self.pid).await {
                    return format!("launcher process {} exited", self.pid);
                }
            }
        })
    }
}

/// Loss when nothing arrives from the host for `timeout`.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatWatch {
    timeout: Duration,
}

impl HeartbeatWatch {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl LivenessChannel for HeartbeatWatch {
    fn watch(self, mut activity: watch::Receiver<Instant>) -> LossFuture {
        Box::pin(async move {
            loop {
                let last = *activity.borrow_and_update();
                let deadline = tokio::time::Instant::from_std(last + self.timeout);
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        if !activity.has_changed().unwrap_or(false) {
                            return format!("no message from host for {} ms", self.timeout.as_millis());
                        }
                    }
                    changed = activity.changed() => {
                        // 송신측 종료 = 입력 종료, serve 루프가 처리
                        if changed.is_err() {
                            std::future::pending::<()>().await;
                        }
                    }
                }
            }
        })
    }
}

/// Loss as soon as either side reports it.
#[derive(Debug, Clone, Copy)]
pub struct AnyOf<A, B>(pub A, pub B);

impl<A: LivenessChannel, B: LivenessChannel> LivenessChannel for AnyOf<A, B> {
    fn watch(self, activity: watch::Receiver<Instant>) -> LossFuture {
        let a = self.0.watch(activity.clone());
        let b = self.1.watch(activity);
        Box::pin(async move {
            tokio::select! {
                reason = a => reason,
                reason = b => reason,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_fires_without_activity() {
        let (_tx, rx) = watch::channel(Instant::now());
        let reason = tokio::time::timeout(
            Duration::from_secs(2),
            HeartbeatWatch::new(Duration::from_millis(100)).watch(rx),
        )
        .await
        .expect("heartbeat loss");
        assert!(reason.contains("100 ms"));
    }

    #[tokio::test]
    async fn heartbeat_is_kept_alive_by_activity() {
        let (tx, rx) = watch::channel(Instant::now());
        let mut lost = HeartbeatWatch::new(Duration::from_millis(200)).watch(rx);
        for _ in 0..6 {
            tokio::select! {
                reason = &mut lost => panic!("lost liveness: {}", reason),
                _ = tokio::time::sleep(Duration::from_millis(80)) => {
                    tx.send(Instant::now()).unwrap();
                }
            }
        }
    }

    #[tokio::test]
    async fn parent_watch_reports_dead_launcher() {
        let (_tx, rx) = watch::channel(Instant::now());
        let reason = tokio::time::timeout(
            Duration::from_secs(5),
            ParentWatch::new(u32::MAX - 1, Duration::from_millis(20)).watch(rx),
        )
        .await
        .expect("parent loss");
        assert!(reason.contains("exited"));
    }

    #[tokio::test]
    async fn any_of_and_absent_channels() {
        let (_tx, rx) = watch::channel(Instant::now());
        let composed = AnyOf(None::<ParentWatch>, Some(HeartbeatWatch::new(Duration::from_millis(50))));
        let reason = tokio::time::timeout(Duration::from_secs(2), composed.watch(rx.clone()))
            .await
            .unwrap();
        assert!(reason.starts_with("no message"));

        let idle = tokio::time::timeout(Duration::from_millis(100), Never.watch(rx)).await;
        assert!(idle.is_err());
    }
}
