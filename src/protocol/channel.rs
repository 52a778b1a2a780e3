//! Host side of the daemon channel.
//!
//! Requests are written under one lock so the order of `submit` calls is the
//! order the daemon reads them. Responses are matched back to callers by
//! correlation id; every outstanding request is resolved exactly once (result,
//! error, timeout, or channel closure).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::{decode, encode, CommandOutput, Message, Request};
use crate::error::BridgeError;

type Reply = Result<CommandOutput, BridgeError>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type BoxedLines = Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>;

/// An outstanding daemon-path command.
struct PendingCommand {
    args: Vec<String>,
    issued_at: Instant,
    reply: oneshot::Sender<Reply>,
}

type PendingMap = Arc<StdMutex<HashMap<u64, PendingCommand>>>;

struct Writer {
    sink: BoxedWriter,
    next_id: u64,
}

/// Why a submission failed. `NotSent` means the daemon never saw the request,
/// so the caller may safely run it elsewhere.
#[derive(Debug)]
pub enum SubmitError {
    NotSent(BridgeError),
    Failed(BridgeError),
}

impl SubmitError {
    pub fn into_inner(self) -> BridgeError {
        match self {
            Self::NotSent(e) | Self::Failed(e) => e,
        }
    }
}

pub struct DaemonChannel {
    writer: Mutex<Option<Writer>>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl DaemonChannel {
    /// Wait for the daemon's `ready` frame, then start routing responses.
    /// Returns the pid the daemon reported.
    pub async fn connect<R, W>(
        reader: R,
        writer: W,
        startup_timeout: Duration,
    ) -> Result<(Self, u32), BridgeError>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let mut lines = BufReader::new(boxed).lines();

        let pid = match tokio::time::timeout(startup_timeout, wait_ready(&mut lines)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(BridgeError::ProcessSpawn(format!(
                    "daemon did not signal readiness within {} ms",
                    startup_timeout.as_millis()
                )))
            }
        };

        let pending: PendingMap = Arc::new(StdMutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(route_responses(lines, pending.clone(), closed.clone()));

        let channel = Self {
            writer: Mutex::new(Some(Writer { sink: Box::new(writer), next_id: 1 })),
            pending,
            closed,
            reader,
        };
        Ok((channel, pid))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of commands awaiting a response.
    pub fn outstanding(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Submit `args` and wait up to `timeout` for its response.
    pub async fn submit(&self, args: &[String], timeout: Duration) -> Result<CommandOutput, SubmitError> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut guard = self.writer.lock().await;
            if self.is_closed() {
                return Err(SubmitError::NotSent(closed_error()));
            }
            let writer = guard.as_mut().ok_or_else(|| SubmitError::NotSent(closed_error()))?;
            let id = writer.next_id;
            writer.next_id += 1;

            lock_pending(&self.pending).insert(
                id,
                PendingCommand { args: args.to_vec(), issued_at: Instant::now(), reply: tx },
            );
            let frame = encode(&Request::Exec { id, args: args.to_vec() });
            if let Err(e) = write_frame(&mut writer.sink, &frame).await {
                lock_pending(&self.pending).remove(&id);
                *guard = None;
                return Err(SubmitError::NotSent(BridgeError::DaemonUnavailable(e.to_string())));
            }
            id
        };

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => reply.map_err(SubmitError::Failed),
            Ok(Err(_)) => Err(SubmitError::Failed(BridgeError::DaemonUnavailable(format!(
                "daemon dropped request {}",
                id
            )))),
            Err(_) => {
                if let Some(cmd) = lock_pending(&self.pending).remove(&id) {
                    tracing::warn!(
                        "Daemon command {:?} (id {}) timed out after {:?}",
                        cmd.args,
                        id,
                        cmd.issued_at.elapsed()
                    );
                }
                Err(SubmitError::Failed(BridgeError::Timeout(timeout.as_millis() as u64)))
            }
        }
    }

    /// Heartbeat for the daemon's liveness watch.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        self.send_control(&Request::Ping, false).await
    }

    /// Ask the daemon to exit and close its input.
    pub async fn shutdown(&self) -> Result<(), BridgeError> {
        self.send_control(&Request::Shutdown, true).await
    }

    async fn send_control(&self, request: &Request, close_after: bool) -> Result<(), BridgeError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(closed_error)?;
        let result = write_frame(&mut writer.sink, &encode(request)).await;
        if close_after || result.is_err() {
            *guard = None;
        }
        result.map_err(|e| BridgeError::DaemonUnavailable(e.to_string()))
    }
}

impl Drop for DaemonChannel {
    fn drop(&mut self) {
        self.reader.abort();
        fail_all(&self.pending, "daemon channel dropped");
    }
}

async fn write_frame(sink: &mut BoxedWriter, frame: &str) -> std::io::Result<()> {
    sink.write_all(frame.as_bytes()).await?;
    sink.flush().await
}

async fn wait_ready(lines: &mut BoxedLines) -> Result<u32, BridgeError> {
    loop {
        let line = lines
            .next_line()
            .await?
            .ok_or_else(|| BridgeError::ProcessSpawn("daemon exited before signalling readiness".into()))?;
        if line.trim().is_empty() {
            continue;
        }
        match decode::<Message>(&line) {
            Ok(Message::Ready { pid }) => return Ok(pid),
            Ok(other) => tracing::debug!("Ignoring pre-ready frame {:?}", other),
            Err(e @ super::ProtocolError::Version(_)) => return Err(e.into()),
            Err(e) => tracing::debug!("Ignoring non-protocol daemon output '{}': {}", line, e),
        }
    }
}

async fn route_responses(mut lines: BoxedLines, pending: PendingMap, closed: Arc<AtomicBool>) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("Daemon channel read error: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match decode::<Message>(&line) {
            Ok(Message::Result { id, exit_code, stdout, stderr }) => {
                resolve(&pending, id, Ok(CommandOutput { exit_code, stdout, stderr }));
            }
            Ok(Message::Error { id: Some(id), message }) => {
                resolve(&pending, id, Err(BridgeError::ProcessSpawn(message)));
            }
            Ok(Message::Error { id: None, message }) => {
                tracing::warn!("Daemon reported: {}", message);
            }
            Ok(Message::Ready { pid }) => {
                tracing::debug!("Duplicate ready frame from daemon {}", pid);
            }
            Err(e) => tracing::warn!("Unreadable daemon frame '{}': {}", line, e),
        }
    }
    closed.store(true, Ordering::SeqCst);
    fail_all(&pending, "daemon channel closed");
}

fn resolve(pending: &PendingMap, id: u64, reply: Reply) {
    match lock_pending(pending).remove(&id) {
        Some(cmd) => {
            let _ = cmd.reply.send(reply);
        }
        // 타임아웃으로 이미 포기한 요청의 늦은 응답
        None => tracing::debug!("Discarding response for unknown or expired request {}", id),
    }
}

fn fail_all(pending: &PendingMap, reason: &str) {
    let drained: Vec<PendingCommand> = lock_pending(pending).drain().map(|(_, cmd)| cmd).collect();
    for cmd in drained {
        let _ = cmd.reply.send(Err(BridgeError::DaemonUnavailable(reason.to_string())));
    }
}

fn lock_pending(pending: &PendingMap) -> std::sync::MutexGuard<'_, HashMap<u64, PendingCommand>> {
    // 락 보유 중 panic 지점이 없으므로 poison은 무시
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn closed_error() -> BridgeError {
    BridgeError::DaemonUnavailable("daemon channel is closed".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// 가짜 데몬: 요청 순서를 기록하고 역순으로 응답을 돌려보냄
    async fn fake_daemon_reversed(io: DuplexStream, batch: usize) {
        let (read, mut write) = tokio::io::split(io);
        write.write_all(encode(&Message::Ready { pid: 42 }).as_bytes()).await.unwrap();
        let mut lines = BufReader::new(read).lines();
        let mut batch_buf = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Ok(Request::Exec { id, args }) = decode::<Request>(&line) {
                batch_buf.push((id, args));
                if batch_buf.len() == batch {
                    for (id, args) in batch_buf.drain(..).rev() {
                        let out = CommandOutput { exit_code: 0, stdout: args.join(" "), stderr: String::new() };
                        write.write_all(encode(&Message::result(id, out)).as_bytes()).await.unwrap();
                    }
                }
            }
        }
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn matches_responses_by_correlation_id() {
        let (host, daemon) = duplex(64 * 1024);
        tokio::spawn(fake_daemon_reversed(daemon, 2));
        let (read, write) = tokio::io::split(host);
        let (channel, pid) = DaemonChannel::connect(read, write, Duration::from_secs(2)).await.unwrap();
        assert_eq!(pid, 42);

        let a = args(&["show", "12"]);
        let b = args(&["show", "13"]);
        let t = Duration::from_secs(2);
        let (ra, rb) = tokio::join!(channel.submit(&a, t), channel.submit(&b, t));
        assert_eq!(ra.unwrap().stdout, "show 12");
        assert_eq!(rb.unwrap().stdout, "show 13");
        assert_eq!(channel.outstanding(), 0);
    }

    #[tokio::test]
    async fn timeout_resolves_caller_and_clears_pending() {
        let (host, daemon) = duplex(64 * 1024);
        // 두 개가 모일 때까지 응답하지 않음 → 첫 요청은 타임아웃
        tokio::spawn(fake_daemon_reversed(daemon, 2));
        let (read, write) = tokio::io::split(host);
        let (channel, _) = DaemonChannel::connect(read, write, Duration::from_secs(2)).await.unwrap();

        let err = channel.submit(&args(&["list"]), Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, SubmitError::Failed(BridgeError::Timeout(50))));
        assert_eq!(channel.outstanding(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn closed_channel_fails_outstanding_commands() {
        let (host, daemon) = duplex(64 * 1024);
        let (read, write) = tokio::io::split(host);
        let daemon_task = tokio::spawn(async move {
            let (dr, mut dw) = tokio::io::split(daemon);
            dw.write_all(encode(&Message::Ready { pid: 7 }).as_bytes()).await.unwrap();
            let mut lines = BufReader::new(dr).lines();
            // 요청 하나를 받은 뒤 응답 없이 종료
            let _ = lines.next_line().await;
        });
        let (channel, _) = DaemonChannel::connect(read, write, Duration::from_secs(2)).await.unwrap();

        let err = channel.submit(&args(&["next"]), Duration::from_secs(5)).await.unwrap_err();
        daemon_task.await.unwrap();
        assert!(matches!(err, SubmitError::Failed(BridgeError::DaemonUnavailable(_))));

        // 닫힌 뒤 제출은 전송되지 않음
        tokio::time::sleep(Duration::from_millis(20)).await;
        let err = channel.submit(&args(&["next"]), Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, SubmitError::NotSent(_)));
    }

    #[tokio::test]
    async fn eof_before_ready_is_spawn_error() {
        let (host, daemon) = duplex(1024);
        drop(daemon);
        let (read, write) = tokio::io::split(host);
        let err = DaemonChannel::connect(read, write, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, BridgeError::ProcessSpawn(_)));
    }

    #[tokio::test]
    async fn version_mismatch_aborts_startup() {
        let (host, daemon) = duplex(1024);
        let (_dr, mut dw) = tokio::io::split(daemon);
        dw.write_all(b"{\"v\":9,\"type\":\"ready\",\"pid\":1}\n").await.unwrap();
        let (read, write) = tokio::io::split(host);
        let err = DaemonChannel::connect(read, write, Duration::from_secs(1)).await.err().unwrap();
        assert!(matches!(err, BridgeError::Protocol(_)));
    }
}
