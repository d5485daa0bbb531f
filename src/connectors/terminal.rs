// ABOUTME: Local terminal connector: reads the owner's lines from stdin and prints replies
// ABOUTME: A spinner renders the typing indicator and shares one print lock with replies

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawlink_core::media;
use clawlink_core::metrics;
use clawlink_core::presence::{
    PresenceAnnouncer, PresenceSink, PresenceState, TERMINAL_INTERVAL,
};
use clawlink_core::{
    ChannelConnector, ChannelKind, DeliveryError, InboundContent, InboundHandler, ListenExit,
    ShutdownRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::io::BufRead;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};

const CHANNEL: ChannelKind = ChannelKind::Terminal;

pub const PROMPT: &str = "👤 You: ";
pub const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];
/// Carriage return plus ANSI erase-to-end-of-line
pub const CLEAR_LINE: &str = "\r\x1b[K";
const REPLY_PREFIX: &str = "    ⚡ clawlink: ";
const STOP_WORDS: [&str; 2] = ["exit", "quit"];

/// Where the owner's lines come from
enum Input {
    /// Lines from a dedicated reader thread
    Lines(mpsc::Receiver<std::io::Result<String>>),
    /// Any async reader, read on the runtime
    Stream(Box<dyn AsyncBufRead + Send + Unpin>),
}

impl Input {
    /// Next raw line; `None` at end of input
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        match self {
            Input::Lines(lines) => lines.recv().await.transpose(),
            Input::Stream(reader) => {
                let mut line = String::new();
                let read = reader.read_line(&mut line).await?;
                Ok((read > 0).then_some(line))
            }
        }
    }
}

/// Read lines on their own OS thread.
///
/// A pending read there never keeps the runtime from shutting down, unlike
/// tokio's stdin which parks the read on the blocking pool.
fn spawn_line_reader<R>(mut reader: R) -> std::io::Result<mpsc::Receiver<std::io::Result<String>>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    std::thread::Builder::new()
        .name("clawlink-stdin".to_string())
        .spawn(move || loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if tx.blocking_send(Ok(line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        })?;
    Ok(rx)
}

type Output = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

async fn write_out(output: &Output, text: &str) {
    let mut out = output.lock().await;
    let result = async {
        out.write_all(text.as_bytes()).await?;
        out.flush().await
    }
    .await;
    if let Err(e) = result {
        tracing::warn!(channel = %CHANNEL, error = %e, "Failed to write to terminal");
    }
}

struct Spinner {
    output: Output,
    frame: AtomicUsize,
}

#[async_trait]
impl PresenceSink for Spinner {
    async fn announce(&self, state: PresenceState) {
        let line = match state {
            PresenceState::Composing => {
                let frame = self.frame.fetch_add(1, Ordering::Relaxed);
                format!(
                    "\r{}{} thinking...",
                    REPLY_PREFIX,
                    SPINNER_FRAMES[frame % SPINNER_FRAMES.len()]
                )
            }
            PresenceState::Paused => CLEAR_LINE.to_string(),
        };
        write_out(&self.output, &line).await;
    }
}

pub struct TerminalConnector {
    input: Mutex<Input>,
    output: Output,
    presence: PresenceAnnouncer,
    shutdown: ShutdownRequest,
}

impl TerminalConnector {
    /// Connector over the process's stdin and stdout
    pub fn stdio() -> Self {
        match spawn_line_reader(std::io::BufReader::new(std::io::stdin())) {
            Ok(lines) => Self::with_input(Input::Lines(lines), tokio::io::stdout()),
            Err(e) => {
                tracing::warn!(channel = %CHANNEL, error = %e, "Failed to start stdin reader thread, reading on the runtime");
                Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            }
        }
    }

    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncBufRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_input(Input::Stream(Box::new(reader)), writer)
    }

    fn with_input<W>(input: Input, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let output: Output = Arc::new(Mutex::new(Box::new(writer)));
        let presence = PresenceAnnouncer::new(
            Arc::new(Spinner {
                output: output.clone(),
                frame: AtomicUsize::new(0),
            }),
            TERMINAL_INTERVAL,
        );

        Self {
            input: Mutex::new(input),
            output,
            presence,
            shutdown: ShutdownRequest::new(),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownRequest {
        self.shutdown.clone()
    }

    async fn print_reply(&self, body: &str) {
        write_out(&self.output, &format!("{}{}{}\n", CLEAR_LINE, REPLY_PREFIX, body)).await;
    }
}

#[async_trait]
impl ChannelConnector for TerminalConnector {
    fn channel(&self) -> ChannelKind {
        CHANNEL
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) -> Result<ListenExit> {
        let mut input = self.input.lock().await;
        write_out(&self.output, "\n--- clawlink active (terminal mode) ---\n").await;

        loop {
            write_out(&self.output, PROMPT).await;

            let next = tokio::select! {
                _ = self.shutdown.requested() => return Ok(ListenExit::Stopped),
                next = input.next_line() => next.context("Failed to read terminal input")?,
            };
            let Some(line) = next else {
                tracing::debug!(channel = %CHANNEL, "Terminal input closed");
                return Ok(ListenExit::Closed);
            };

            let text = line.trim();
            if STOP_WORDS.contains(&text.to_lowercase().as_str()) {
                return Ok(ListenExit::Closed);
            }
            if text.is_empty() {
                continue;
            }

            metrics::record_dispatched(CHANNEL);
            handler.handle(InboundContent::text(text)).await;
        }
    }

    async fn send(&self, text: &str) {
        self.print_reply(text).await;
    }

    async fn send_file(&self, path: &str) {
        match media::resolve_outbound_path(path) {
            Ok(resolved) => {
                self.print_reply(&format!("[FILE SENT] {}", resolved.display()))
                    .await
            }
            Err(DeliveryError::FileNotFound(missing)) => {
                self.print_reply(&media::file_not_found_reply(&missing)).await
            }
            Err(e) => tracing::warn!(channel = %CHANNEL, error = %e, "Failed to resolve file"),
        }
    }

    async fn start_typing(&self) {
        self.presence.start().await;
    }

    async fn stop_typing(&self) {
        self.presence.stop().await;
    }
}
