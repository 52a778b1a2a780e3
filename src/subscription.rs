//! Disposable background registrations, released in reverse order.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A background task that stops when its token is cancelled.
pub struct Subscription {
    name: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(name: impl Into<String>, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self { name: name.into(), cancel, task: Some(task) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel and wait for the task to wind down.
    pub async fn release(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    tracing::warn!("Subscription '{}' ended abnormally: {}", self.name, e);
                }
            }
        }
        tracing::debug!("Released subscription '{}'", self.name);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Scoped list of subscriptions owned by an activation.
#[derive(Default)]
pub struct Disposables {
    items: Vec<Subscription>,
}

impl Disposables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, subscription: Subscription) {
        self.items.push(subscription);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Last registered is released first.
    pub async fn release_all(&mut self) {
        while let Some(subscription) = self.items.pop() {
            subscription.release().await;
        }
    }
}
