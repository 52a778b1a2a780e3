//! Composition root: one supervisor and dispatcher per workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

use crate::config::watcher::ConfigWatcher;
use crate::config::ConfigSnapshot;
use crate::dispatcher::CommandDispatcher;
use crate::error::Result;
use crate::installer::{InstallOutcome, InstallTargets, Installer};
use crate::resolver::BinaryResolver;
use crate::subscription::{Disposables, Subscription};
use crate::supervisor::state_machine::DaemonState;
use crate::supervisor::{ProcessSupervisor, SupervisorConfig, WorkspaceContext};

pub struct ActivationOptions {
    pub workspaces: Vec<PathBuf>,
    /// Directory containing the bundled `bin/`.
    pub bundle_root: PathBuf,
    pub config: ConfigSnapshot,
    pub config_updates: Option<watch::Receiver<ConfigSnapshot>>,
    pub supervisor: SupervisorConfig,
    /// `None` skips installation.
    pub install_targets: Option<InstallTargets>,
    /// Defaults to the running platform.
    pub resolver: Option<BinaryResolver>,
}

impl ActivationOptions {
    pub fn new(workspaces: Vec<PathBuf>, bundle_root: impl Into<PathBuf>) -> Self {
        Self {
            workspaces,
            bundle_root: bundle_root.into(),
            config: ConfigSnapshot::default(),
            config_updates: None,
            supervisor: SupervisorConfig::default(),
            install_targets: InstallTargets::for_current_platform(),
            resolver: None,
        }
    }
}

pub struct WorkspaceBridge {
    pub supervisor: Arc<ProcessSupervisor>,
    pub dispatcher: Arc<CommandDispatcher>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceStatus {
    pub root: PathBuf,
    pub state: DaemonState,
    pub pid: Option<u32>,
    pub log_path: PathBuf,
    pub last_error: Option<String>,
}

pub struct Activation {
    bridges: Vec<WorkspaceBridge>,
    subscriptions: Disposables,
    notices: Vec<String>,
    installed: Option<InstallOutcome>,
}

impl Activation {
    /// Fails only when the platform itself is unsupported; a workspace whose
    /// binary cannot be resolved is skipped with a notice.
    pub async fn activate(options: ActivationOptions) -> Result<Self> {
        let resolver = match options.resolver {
            Some(resolver) => resolver,
            None => BinaryResolver::new()?,
        };

        let mut activation = Activation {
            bridges: Vec::new(),
            subscriptions: Disposables::new(),
            notices: Vec::new(),
            installed: None,
        };

        let supervisor_config = options.supervisor.with_show_output(options.config.show_output);

        for root in &options.workspaces {
            let workspace = WorkspaceContext::detect(root);
            let supervisor = ProcessSupervisor::new(
                workspace,
                &options.bundle_root,
                resolver,
                supervisor_config.clone(),
            )
            .with_override(options.config.override_for(root));

            let descriptor = match supervisor.binary() {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!("Chainlink unavailable for {}: {}", root.display(), e);
                    activation.notices.push(format!("{}: {}", root.display(), e));
                    continue;
                }
            };

            if activation.installed.is_none() {
                if let Some(targets) = options.install_targets.clone() {
                    activation.installed = install_best_effort(targets, descriptor.resolved_path.clone()).await;
                    if let Some(notice) = activation.installed.as_ref().and_then(|o| o.notice.clone()) {
                        activation.notices.push(notice);
                    }
                }
            }

            let supervisor = Arc::new(supervisor);
            let dispatcher = Arc::new(CommandDispatcher::new(supervisor.clone()));

            if options.config.auto_start && supervisor.has_chainlink_project() {
                if let Err(e) = supervisor.start().await {
                    // 자동 시작 실패는 Direct 경로로 계속 동작
                    tracing::warn!("Auto-start failed for {}: {}", root.display(), e);
                    activation.notices.push(format!("Chainlink daemon did not start: {}", e));
                }
            }

            if let Some(updates) = &options.config_updates {
                let watcher = Arc::new(ConfigWatcher::new(supervisor.clone(), options.config.clone()));
                activation.subscriptions.push(watcher.spawn(updates.clone()));
            }

            activation.bridges.push(WorkspaceBridge { supervisor, dispatcher });
        }

        tracing::info!(
            "Activated {} of {} workspace(s)",
            activation.bridges.len(),
            options.workspaces.len()
        );
        Ok(activation)
    }

    pub fn bridges(&self) -> &[WorkspaceBridge] {
        &self.bridges
    }

    pub fn bridge(&self, root: &Path) -> Option<&WorkspaceBridge> {
        self.bridges.iter().find(|b| b.supervisor.workspace().root_path == root)
    }

    /// User-facing messages collected during activation.
    pub fn notices(&self) -> &[String] {
        &self.notices
    }

    pub fn installed(&self) -> Option<&InstallOutcome> {
        self.installed.as_ref()
    }

    /// Register an extra subscription to be released on deactivation.
    pub fn register(&mut self, subscription: Subscription) {
        self.subscriptions.push(subscription);
    }

    pub fn status(&self) -> Vec<WorkspaceStatus> {
        self.bridges
            .iter()
            .map(|b| {
                let sup = &b.supervisor;
                WorkspaceStatus {
                    root: sup.workspace().root_path.clone(),
                    state: sup.state(),
                    pid: sup.get_pid(),
                    log_path: sup.log_path(),
                    last_error: sup.last_error(),
                }
            })
            .collect()
    }

    /// Release subscriptions (newest first), then dispose every supervisor.
    pub async fn deactivate(mut self) {
        self.subscriptions.release_all().await;
        for bridge in self.bridges.iter().rev() {
            bridge.supervisor.dispose().await;
        }
        tracing::info!("Deactivated");
    }
}

async fn install_best_effort(targets: InstallTargets, source: PathBuf) -> Option<InstallOutcome> {
    let result = tokio::task::spawn_blocking(move || Installer::new(targets).install(&source)).await;
    match result {
        Ok(Ok(outcome)) => Some(outcome),
        Ok(Err(e)) => {
            tracing::warn!("{}", e);
            None
        }
        Err(e) => {
            tracing::warn!("Install task failed: {}", e);
            None
        }
    }
}
