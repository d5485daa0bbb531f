// ABOUTME: Integration tests for the terminal connector over in-memory input and output
// ABOUTME: Covers stop words, EOF, reply formatting, file notices and the spinner

use clawlink::connectors::terminal::{TerminalConnector, CLEAR_LINE, PROMPT};
use clawlink_core::testing::RecordingHandler;
use clawlink_core::{ChannelConnector, InboundContent, ListenExit};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncWrite, BufReader};

/// AsyncWrite that appends into a shared buffer the test can inspect
#[derive(Clone, Default)]
struct SharedOutput(Arc<Mutex<Vec<u8>>>);

impl SharedOutput {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

impl AsyncWrite for SharedOutput {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn terminal(input: &'static str) -> (TerminalConnector, SharedOutput) {
    let output = SharedOutput::default();
    let connector = TerminalConnector::new(BufReader::new(input.as_bytes()), output.clone());
    (connector, output)
}

#[tokio::test]
async fn test_dispatches_trimmed_lines_until_exit() {
    let (connector, output) = terminal("  hello  \n\n   \nsecond\nexit\nnever seen\n");
    let handler = Arc::new(RecordingHandler::new());

    let exit = connector.listen(handler.clone()).await.unwrap();

    assert_eq!(exit, ListenExit::Closed);
    assert_eq!(
        handler.received(),
        vec![InboundContent::text("hello"), InboundContent::text("second")]
    );
    assert!(output.text().contains(PROMPT));
}

#[tokio::test]
async fn test_quit_is_case_insensitive() {
    let (connector, _output) = terminal("QUIT\nhello\n");
    let handler = Arc::new(RecordingHandler::new());

    assert_eq!(connector.listen(handler.clone()).await.unwrap(), ListenExit::Closed);
    assert!(handler.is_empty());
}

#[tokio::test]
async fn test_eof_closes_listen() {
    let (connector, _output) = terminal("only line");
    let handler = Arc::new(RecordingHandler::new());

    assert_eq!(connector.listen(handler.clone()).await.unwrap(), ListenExit::Closed);
    assert_eq!(handler.received(), vec![InboundContent::text("only line")]);
}

#[tokio::test]
async fn test_shutdown_request_stops_listen() {
    let (reader, _keep_open) = tokio::io::duplex(64);
    let output = SharedOutput::default();
    let connector = TerminalConnector::new(BufReader::new(reader), output);
    let shutdown = connector.shutdown_handle();
    shutdown.request();

    let handler = Arc::new(RecordingHandler::new());
    let exit = tokio::time::timeout(Duration::from_secs(1), connector.listen(handler))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, ListenExit::Stopped);
}

#[tokio::test]
async fn test_send_prints_reply_line() {
    let (connector, output) = terminal("");
    connector.send("four score").await;

    assert_eq!(output.text(), format!("{}    ⚡ clawlink: four score\n", CLEAR_LINE));
}

#[tokio::test]
async fn test_send_file_prints_absolute_path() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report.csv");
    std::fs::write(&file, "a,b").unwrap();

    let (connector, output) = terminal("");
    connector.send_file(file.to_str().unwrap()).await;

    assert!(output
        .text()
        .contains(&format!("[FILE SENT] {}", file.display())));
}

#[tokio::test]
async fn test_send_file_missing_reports_not_found() {
    let (connector, output) = terminal("");
    connector.send_file("/definitely/not/here.pdf").await;

    assert!(output
        .text()
        .contains("❌ File not found: /definitely/not/here.pdf"));
}

#[tokio::test(start_paused = true)]
async fn test_spinner_cycles_frames_and_clears_on_stop() {
    let (connector, output) = terminal("");

    connector.start_typing().await;
    connector.start_typing().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    connector.stop_typing().await;

    let text = output.text();
    assert!(text.contains("| thinking..."));
    assert!(text.contains("/ thinking..."));
    assert!(text.contains("- thinking..."));
    assert!(text.ends_with(CLEAR_LINE));

    // One loop only: ticks at 0, 150 and 300ms
    assert_eq!(text.matches("thinking...").count(), 3);
}
