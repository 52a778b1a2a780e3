//! Daemon host loop (`chainlink-bridge daemon run`).
//!
//! Announces readiness on stdout, then executes one request at a time
//! through the wrapped executable until told to stop, its input closes, or
//! the launcher is found dead.

pub mod liveness;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use crate::engine::ProcessEngine;
use crate::error::Result;
use crate::protocol::{decode, encode, Message, Request};
use crate::supervisor::{process, LOG_FILE, PID_FILE};
use liveness::{AnyOf, HeartbeatWatch, LivenessChannel, ParentWatch};

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub state_dir: PathBuf,
    pub engine: PathBuf,
    pub parent_pid: Option<u32>,
    pub heartbeat_timeout: Option<Duration>,
    pub parent_poll: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Shutdown,
    InputClosed,
    LivenessLost(String),
}

enum Inbound {
    Exec { id: u64, args: Vec<String> },
    Shutdown,
    Invalid(String),
}

/// Route tracing output to the workspace log. Only the daemon opens this
/// file, once, in append mode.
pub fn init_logging(state_dir: &std::path::Path) -> Result<PathBuf> {
    std::fs::create_dir_all(state_dir)?;
    let log_path = state_dir.join(LOG_FILE);
    let file = std::fs::OpenOptions::new().create(true).append(true).open(&log_path)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .try_init();
    Ok(log_path)
}

/// Serve requests on stdin/stdout. The pid marker exists exactly while this runs.
pub async fn run(opts: DaemonOptions) -> Result<ExitReason> {
    let pid_file = opts.state_dir.join(PID_FILE);
    // 호스트 PID도 기록: 다른 살아있는 호스트의 데몬은 정리 대상이 아님
    process::write_pid_record(
        &pid_file,
        process::PidRecord {
            pid: std::process::id(),
            host_pid: opts.parent_pid,
        },
    )?;
    tracing::info!(
        "Daemon {} starting (engine {}, parent {:?})",
        std::process::id(),
        opts.engine.display(),
        opts.parent_pid
    );

    let result = serve_stdio(&opts).await;

    process::remove_pid_file(&pid_file);
    match &result {
        Ok(reason) => tracing::info!("Daemon exiting: {:?}", reason),
        Err(e) => tracing::error!("Daemon failed: {}", e),
    }
    result
}

async fn serve_stdio(opts: &DaemonOptions) -> Result<ExitReason> {
    // 데몬은 작업공간 루트에서 실행됨
    let engine = ProcessEngine::new(&opts.engine, std::env::current_dir()?);
    let liveness = AnyOf(
        opts.parent_pid.map(|pid| ParentWatch::new(pid, opts.parent_poll)),
        opts.heartbeat_timeout.map(HeartbeatWatch::new),
    );
    serve(tokio::io::stdin(), tokio::io::stdout(), engine, liveness).await
}

pub async fn serve<R, W, L>(reader: R, mut writer: W, engine: ProcessEngine, liveness: L) -> Result<ExitReason>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Unpin,
    L: LivenessChannel,
{
    let (activity_tx, activity_rx) = watch::channel(Instant::now());
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let reader_task = tokio::spawn(read_requests(reader, inbound_tx, activity_tx));
    let mut lost = liveness.watch(activity_rx);

    send(&mut writer, &Message::Ready { pid: std::process::id() }).await?;

    let reason = loop {
        let inbound = tokio::select! {
            reason = &mut lost => break ExitReason::LivenessLost(reason),
            inbound = inbound_rx.recv() => inbound,
        };

        let reply = match inbound {
            None => break ExitReason::InputClosed,
            Some(Inbound::Shutdown) => break ExitReason::Shutdown,
            Some(Inbound::Invalid(message)) => Message::Error { id: None, message },
            Some(Inbound::Exec { id, args }) => {
                tracing::debug!("exec #{} {:?}", id, args);
                // 실행 중에도 호스트 생존 감시 (드롭 시 자식 프로세스 kill)
                tokio::select! {
                    reason = &mut lost => break ExitReason::LivenessLost(reason),
                    output = engine.run(&args) => match output {
                        Ok(output) => Message::result(id, output),
                        Err(e) => Message::Error { id: Some(id), message: e.to_string() },
                    },
                }
            }
        };

        if let Err(e) = send(&mut writer, &reply).await {
            break ExitReason::LivenessLost(format!("host output closed: {}", e));
        }
    };

    reader_task.abort();
    Ok(reason)
}

async fn send<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> std::io::Result<()> {
    writer.write_all(encode(message).as_bytes()).await?;
    writer.flush().await
}

async fn read_requests<R>(reader: R, inbound: mpsc::UnboundedSender<Inbound>, activity: watch::Sender<Instant>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Failed to read request: {}", e);
                break;
            }
        };
        let _ = activity.send(Instant::now());
        if line.trim().is_empty() {
            continue;
        }
        let item = match decode::<Request>(&line) {
            Ok(Request::Ping) => continue,
            Ok(Request::Exec { id, args }) => Inbound::Exec { id, args },
            Ok(Request::Shutdown) => Inbound::Shutdown,
            Err(e) => {
                tracing::warn!("Rejected request '{}': {}", line, e);
                Inbound::Invalid(e.to_string())
            }
        };
        let stop = matches!(item, Inbound::Shutdown);
        if inbound.send(item).is_err() || stop {
            break;
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::liveness::Never;
    use super::*;
    use crate::protocol::CommandOutput;
    use std::os::unix::fs::PermissionsExt;
    use tokio::io::{duplex, AsyncBufReadExt, BufReader, DuplexStream, Lines};

    fn engine(dir: &std::path::Path, body: &str) -> ProcessEngine {
        let path = dir.join("chainlink");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ProcessEngine::new(path, dir)
    }

    struct Host {
        input: DuplexStream,
        output: Lines<BufReader<DuplexStream>>,
    }

    impl Host {
        async fn send(&mut self, request: &Request) {
            self.input.write_all(encode(request).as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Message {
            let line = self.output.next_line().await.unwrap().expect("daemon output");
            decode(&line).unwrap()
        }
    }

    fn start<L: LivenessChannel>(
        engine: ProcessEngine,
        liveness: L,
    ) -> (Host, tokio::task::JoinHandle<Result<ExitReason>>) {
        let (host_in, daemon_in) = duplex(64 * 1024);
        let (daemon_out, host_out) = duplex(64 * 1024);
        let task = tokio::spawn(serve(daemon_in, daemon_out, engine, liveness));
        let host = Host { input: host_in, output: BufReader::new(host_out).lines() };
        (host, task)
    }

    #[tokio::test]
    async fn executes_requests_in_order_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, task) = start(engine(dir.path(), "echo \"$*\"; [ \"$1\" = fail ] && exit 3; exit 0"), Never);

        assert!(matches!(host.recv().await, Message::Ready { .. }));
        host.send(&Request::Exec { id: 1, args: vec!["show".into(), "12".into()] }).await;
        host.send(&Request::Ping).await;
        host.send(&Request::Exec { id: 2, args: vec!["fail".into()] }).await;

        match host.recv().await {
            Message::Result { id, exit_code, stdout, .. } => {
                assert_eq!((id, exit_code, stdout.as_str()), (1, 0, "show 12\n"));
            }
            other => panic!("unexpected {:?}", other),
        }
        let second = host.recv().await;
        assert_eq!(
            second,
            Message::result(2, CommandOutput { exit_code: 3, stdout: "fail\n".into(), stderr: String::new() })
        );

        host.send(&Request::Shutdown).await;
        assert_eq!(task.await.unwrap().unwrap(), ExitReason::Shutdown);
    }

    #[tokio::test]
    async fn input_eof_ends_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, task) = start(engine(dir.path(), "exit 0"), Never);
        assert!(matches!(host.recv().await, Message::Ready { .. }));
        drop(host.input);
        assert_eq!(task.await.unwrap().unwrap(), ExitReason::InputClosed);
    }

    #[tokio::test]
    async fn silent_host_loses_liveness() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, task) = start(engine(dir.path(), "exit 0"), HeartbeatWatch::new(Duration::from_millis(150)));
        assert!(matches!(host.recv().await, Message::Ready { .. }));
        let reason = tokio::time::timeout(Duration::from_secs(3), task).await.unwrap().unwrap().unwrap();
        assert!(matches!(reason, ExitReason::LivenessLost(_)));
    }

    #[tokio::test]
    async fn malformed_request_is_reported_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut host, task) = start(engine(dir.path(), "echo ok"), Never);
        assert!(matches!(host.recv().await, Message::Ready { .. }));

        host.input.write_all(b"{\"type\":\"exec\"}\n").await.unwrap();
        assert!(matches!(host.recv().await, Message::Error { id: None, .. }));

        host.send(&Request::Exec { id: 5, args: vec![] }).await;
        assert!(matches!(host.recv().await, Message::Result { id: 5, exit_code: 0, .. }));
        host.send(&Request::Shutdown).await;
        assert_eq!(task.await.unwrap().unwrap(), ExitReason::Shutdown);
    }
}
