pub mod watcher;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::subscription::Subscription;

fn default_true() -> bool {
    true
}

/// Host settings the bridge reacts to. Storage belongs to the host; the
/// bridge only reads snapshots.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// Explicit chainlink executable; empty means "use the bundled one".
    #[serde(rename = "binary_path", default)]
    pub override_binary_path: Option<String>,
    #[serde(rename = "auto_start_daemon", default = "default_true")]
    pub auto_start: bool,
    #[serde(rename = "show_output_on_start", default)]
    pub show_output: bool,
}

impl Default for ConfigSnapshot {
    fn default() -> Self {
        Self {
            override_binary_path: None,
            auto_start: true,
            show_output: false,
        }
    }
}

impl ConfigSnapshot {
    /// Missing or unreadable files yield defaults.
    pub fn load(path: &Path) -> Self {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to read config {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };
        Self::from_toml_str(&s).unwrap_or_else(|e| {
            tracing::warn!("Invalid config {}: {}, using defaults", path.display(), e);
            Self::default()
        })
    }

    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Normalized override (blank → none).
    pub fn override_setting(&self) -> Option<&str> {
        self.override_binary_path
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Override resolved against a workspace root.
    pub fn override_for(&self, root: &Path) -> Option<PathBuf> {
        self.override_setting()
            .and_then(|s| crate::supervisor::override_from_setting(root, s))
    }

    /// Whether moving from `self` to `next` affects which binary runs.
    pub fn binary_location_changed(&self, next: &ConfigSnapshot) -> bool {
        self.override_setting() != next.override_setting()
    }
}

// ── File source ────────────────────────────────────────────

/// Re-reads a TOML file on an interval and publishes changed snapshots.
pub struct FileConfigSource {
    path: PathBuf,
    interval: Duration,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self { path: path.into(), interval }
    }

    /// Start polling. The receiver starts at the current file contents.
    pub fn spawn(self) -> (watch::Receiver<ConfigSnapshot>, Subscription) {
        let initial = ConfigSnapshot::load(&self.path);
        let (tx, rx) = watch::channel(initial.clone());
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut last = initial;
            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let path = self.path.clone();
                let next = match tokio::task::spawn_blocking(move || ConfigSnapshot::load(&path)).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!("Config reload task failed: {}", e);
                        continue;
                    }
                };
                if next != last {
                    tracing::info!("Configuration {} changed", self.path.display());
                    last = next.clone();
                    if tx.send(next).is_err() {
                        break;
                    }
                }
            }
        });

        (rx, Subscription::new("config-file", cancel, task))
    }
}
