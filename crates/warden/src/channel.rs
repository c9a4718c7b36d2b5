// ABOUTME: Worker-side stdio transport to the supervisor.
// ABOUTME: Heartbeats are written as JSON lines to stdout; directives are read from stdin.

use async_trait::async_trait;
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use warden_core::protocol::{decode_line, encode_line};
use warden_core::{Directive, ParentChannel, WardenError, WorkerMessage};

/// Set by the supervisor on every worker it spawns
pub const CHANNEL_ENV: &str = "WARDEN_WORKER_CHANNEL";

/// Line-oriented channel to the parent over any writer
pub struct LineChannel<W> {
    available: AtomicBool,
    writer: Mutex<W>,
}

pub type StdioChannel = LineChannel<tokio::io::Stdout>;

impl StdioChannel {
    /// Available only when launched by a supervisor.
    pub fn from_env() -> Self {
        let available = std::env::var(CHANNEL_ENV)
            .map(|v| v == "stdio")
            .unwrap_or(false);
        LineChannel::new(tokio::io::stdout(), available)
    }
}

impl<W> LineChannel<W> {
    pub fn new(writer: W, available: bool) -> Self {
        Self {
            available: AtomicBool::new(available),
            writer: Mutex::new(writer),
        }
    }

    /// Mark the channel as gone; the heartbeat emitter stops on its next tick.
    pub fn close(&self) {
        self.available.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ParentChannel for LineChannel<W> {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn send(&self, message: &WorkerMessage) -> Result<(), WardenError> {
        if !self.is_available() {
            return Err(WardenError::ChannelUnavailable);
        }
        let line = encode_line(message)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

fn parse_directive(line: &str) -> Option<Directive> {
    tracing::info!(message = %line.trim(), "worker received a message");
    match decode_line::<Directive>(line) {
        Ok(directive) => Some(directive),
        Err(e) => {
            tracing::warn!(error = %e, "ignoring unknown message from parent");
            None
        }
    }
}

/// Read directives line by line until EOF. The receiver closes when the parent goes away.
pub fn spawn_directive_reader<R>(reader: R) -> mpsc::Receiver<Directive>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(directive) = parse_directive(&line) {
                        if tx.send(directive).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read from parent");
                    break;
                }
            }
        }
    });
    rx
}

/// Directives from this process's stdin.
///
/// Reads on a plain thread: a blocked read there does not hold up runtime
/// shutdown once the worker has drained.
pub fn stdin_directives() -> mpsc::Receiver<Directive> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read from parent");
                    break;
                }
            };
            if let Some(directive) = parse_directive(&line) {
                if tx.blocking_send(directive).is_err() {
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use warden_core::WorkerId;

    #[tokio::test]
    async fn test_send_writes_json_line() {
        let (client, mut server) = tokio::io::duplex(256);
        let channel = LineChannel::new(client, true);

        channel
            .send(&WorkerMessage::Heartbeat { pid: WorkerId(12) })
            .await
            .unwrap();
        drop(channel);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"type\":\"heartbeat\",\"pid\":12}\n");
    }

    #[tokio::test]
    async fn test_unavailable_channel_refuses_send() {
        let (client, _server) = tokio::io::duplex(64);
        let channel = LineChannel::new(client, false);
        let err = channel
            .send(&WorkerMessage::Heartbeat { pid: WorkerId(1) })
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::ChannelUnavailable));
    }

    #[tokio::test]
    async fn test_close_makes_channel_unavailable() {
        let (client, _server) = tokio::io::duplex(64);
        let channel = LineChannel::new(client, true);
        assert!(channel.is_available());
        channel.close();
        assert!(!channel.is_available());
    }

    #[tokio::test]
    async fn test_directive_reader_skips_garbage_and_closes_on_eof() {
        let input: &[u8] = b"hello\n\"shutdown\"\n{\"bogus\":1}\n";
        let mut rx = spawn_directive_reader(input);

        assert_eq!(rx.recv().await, Some(Directive::Shutdown));
        assert_eq!(rx.recv().await, None);
    }
}
