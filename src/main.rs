use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use chainlink_bridge::config::{ConfigSnapshot, FileConfigSource};
use chainlink_bridge::daemon::{self, DaemonOptions};
use chainlink_bridge::installer::{InstallTargets, Installer};
use chainlink_bridge::resolver::BinaryResolver;
use chainlink_bridge::supervisor::{SupervisorConfig, WorkspaceContext};
use chainlink_bridge::{Activation, ActivationOptions, CommandDispatcher, ProcessSupervisor};

const HOST_STATUS_COMMAND: &str = "bridge:status";

#[derive(Parser, Debug)]
#[command(
    name = "chainlink-bridge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Supervises per-workspace chainlink daemons and dispatches commands to them"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct BinaryArgs {
    /// Directory containing the bundled `bin/` (defaults to the install root of this executable).
    #[arg(long)]
    root: Option<PathBuf>,
    /// Explicit chainlink executable; wins over the bundled one when it exists.
    #[arg(long)]
    binary: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the chainlink binary that would be used
    Resolve(BinaryArgs),
    /// Check that the resolved binary exists and is executable
    Validate(BinaryArgs),
    /// Copy the resolved binary into a user-level bin directory
    Install(BinaryArgs),
    /// Run one chainlink command in a fresh process
    Exec {
        #[command(flatten)]
        binary: BinaryArgs,
        /// Workspace root the command runs in
        #[arg(long, default_value = ".")]
        workspace: PathBuf,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Activate workspaces and dispatch JSON-array commands read from stdin
    Host {
        #[command(flatten)]
        binary: BinaryArgs,
        /// Workspace roots; commands go to the first one
        #[arg(long = "workspace", required = true)]
        workspaces: Vec<PathBuf>,
        /// TOML settings file, re-read while running
        #[arg(long)]
        config: Option<PathBuf>,
        /// Skip copying the binary into user bin directories
        #[arg(long)]
        no_install: bool,
    },
    /// Internal: daemon host loop (launched by the supervisor)
    #[command(hide = true)]
    Daemon {
        #[command(subcommand)]
        action: DaemonCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    Run {
        #[arg(long)]
        dir: PathBuf,
        #[arg(long)]
        engine: PathBuf,
        #[arg(long)]
        parent_pid: Option<u32>,
        #[arg(long)]
        heartbeat_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Daemon {
            action: DaemonCommand::Run { dir, engine, parent_pid, heartbeat_timeout_ms },
        } => {
            daemon::init_logging(&dir)?;
            let opts = DaemonOptions {
                state_dir: dir,
                engine,
                parent_pid,
                heartbeat_timeout: heartbeat_timeout_ms.map(Duration::from_millis),
                parent_poll: Duration::from_secs(1),
            };
            let code = match daemon::run(opts).await {
                Ok(_) => 0,
                Err(_) => 1,
            };
            // stdin 읽기 스레드가 런타임 종료를 막으므로 바로 종료
            std::process::exit(code);
        }
        Command::Resolve(args) => {
            init_logging();
            let descriptor = resolver()?.resolve(&args.bundle_root(), args.binary.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&descriptor)?);
        }
        Command::Validate(args) => {
            init_logging();
            let validation = resolver()?.validate(&args.bundle_root(), args.binary.as_deref());
            println!("{}", serde_json::to_string_pretty(&validation)?);
            if !validation.valid {
                std::process::exit(1);
            }
        }
        Command::Install(args) => {
            init_logging();
            let descriptor = resolver()?.resolve(&args.bundle_root(), args.binary.as_deref())?;
            let targets = InstallTargets::for_current_platform().context("cannot determine home directory")?;
            let outcome = Installer::new(targets).install(&descriptor.resolved_path)?;
            println!("{}", outcome.installed_path.display());
            if let Some(notice) = outcome.notice {
                eprintln!("{}", notice);
            }
        }
        Command::Exec { binary, workspace, args } => {
            init_logging();
            let supervisor = ProcessSupervisor::new(
                WorkspaceContext::detect(&workspace),
                binary.bundle_root(),
                resolver()?,
                SupervisorConfig::default(),
            )
            .with_override(binary.binary.clone());
            let dispatcher = CommandDispatcher::new(Arc::new(supervisor));
            match dispatcher.execute_direct(&args).await {
                Ok(stdout) => print!("{}", stdout),
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(e.exit_code().unwrap_or(1));
                }
            }
        }
        Command::Host { binary, workspaces, config, no_install } => {
            init_logging();
            let code = match host(binary, workspaces, config, no_install).await {
                Ok(()) => 0,
                Err(e) => {
                    tracing::error!("{:#}", e);
                    1
                }
            };
            std::process::exit(code);
        }
    }

    Ok(())
}

impl BinaryArgs {
    fn bundle_root(&self) -> PathBuf {
        self.root.clone().unwrap_or_else(default_bundle_root)
    }
}

/// `<root>/bin/chainlink-bridge` → `<root>`
fn default_bundle_root() -> PathBuf {
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .and_then(Path::parent)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn resolver() -> anyhow::Result<BinaryResolver> {
    Ok(BinaryResolver::new()?)
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn host(
    binary: BinaryArgs,
    workspaces: Vec<PathBuf>,
    config: Option<PathBuf>,
    no_install: bool,
) -> anyhow::Result<()> {
    let mut options = ActivationOptions::new(workspaces, binary.bundle_root());
    let mut config_source = None;
    if let Some(path) = config {
        let (updates, subscription) = FileConfigSource::new(path, Duration::from_secs(2)).spawn();
        options.config = updates.borrow().clone();
        options.config_updates = Some(updates);
        config_source = Some(subscription);
    }
    if let Some(path) = binary.binary {
        options.config = ConfigSnapshot {
            override_binary_path: Some(path.display().to_string()),
            ..options.config
        };
    }
    if no_install {
        options.install_targets = None;
    }

    let mut activation = Activation::activate(options).await?;
    if let Some(subscription) = config_source {
        activation.register(subscription);
    }
    for notice in activation.notices() {
        tracing::warn!("{}", notice);
    }
    println!("{}", serde_json::json!({ "event": "activated", "workspaces": activation.status() }));

    let dispatcher = activation.bridges().first().map(|b| b.dispatcher.clone());
    let Some(dispatcher) = dispatcher else {
        activation.deactivate().await;
        anyhow::bail!("no workspace could be activated");
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received, cleaning up...");
                None
            }
        };
        let Some(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Vec<String>>(&line) {
            // 브리지 자체 질의는 chainlink 명령과 겹치지 않는 이름을 사용
            Ok(args) if args.len() == 1 && args[0] == HOST_STATUS_COMMAND => {
                serde_json::json!({ "success": true, "status": activation.status() })
            }
            Ok(args) => match dispatcher.execute(&args).await {
                Ok(output) => serde_json::json!({ "success": true, "output": output }),
                Err(e) => e.to_json(),
            },
            Err(e) => serde_json::json!({
                "success": false,
                "error": format!("expected a JSON array of strings: {}", e),
                "error_code": "BAD_REQUEST",
            }),
        };
        println!("{}", response);
    }

    activation.deactivate().await;
    Ok(())
}
