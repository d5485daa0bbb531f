// ABOUTME: Integration tests for the bridge process manager against an in-memory fake helper
// ABOUTME: Covers ack correlation, chunked delivery, echo suppression, gating and verification

use base64::Engine;
use clawlink_bridge::{BridgeProcessManager, BridgeSettings, FILE_ACK_TIMEOUT, TEXT_ACK_TIMEOUT};
use clawlink_core::testing::RecordingHandler;
use clawlink_core::{
    AuthorizationGate, ChannelConnector, ChannelKind, DeliveryError, GateMode, IdentityStore,
    InboundContent, InboundHandler, ListenExit, MemoryIdentityStore, SqliteIdentityStore,
    VERIFICATION_CONFIRMATION,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    split, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tokio::task::JoinHandle;

const OWNER: &str = "15550001111@s.whatsapp.net";
const STRANGER: &str = "15559998888@s.whatsapp.net";

// =============================================================================
// Fake helper harness
// =============================================================================

struct FakeHelper {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeHelper {
    async fn emit(&mut self, event: Value) {
        self.emit_raw(&format!("JSON_EVENT:{}", event)).await;
    }

    async fn emit_raw(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\n", line).as_bytes())
            .await
            .unwrap();
    }

    async fn next_command(&mut self) -> (String, Value) {
        let line = tokio::time::timeout(Duration::from_secs(5), self.lines.next_line())
            .await
            .expect("timed out waiting for a command")
            .unwrap()
            .expect("manager closed its side");
        let (verb, payload) = line.split_once(':').expect("command has a verb");
        (verb.to_string(), serde_json::from_str(payload).unwrap())
    }

    /// True if no command arrives within `window`
    async fn stays_quiet(&mut self, window: Duration) -> bool {
        tokio::time::timeout(window, self.lines.next_line())
            .await
            .is_err()
    }
}

fn settings() -> BridgeSettings {
    BridgeSettings {
        script: PathBuf::from("/nonexistent/bridge.js"),
        node_binary: "node".to_string(),
        npm_binary: "npm".to_string(),
        dependencies: vec![],
        text_ack_timeout: TEXT_ACK_TIMEOUT,
        file_ack_timeout: FILE_ACK_TIMEOUT,
    }
}

fn manager(store: Arc<dyn IdentityStore>, mode: GateMode, code: &str) -> BridgeProcessManager {
    let gate = AuthorizationGate::with_code(ChannelKind::WhatsApp, store, mode, code).unwrap();
    BridgeProcessManager::new(settings(), gate)
}

fn owned_manager() -> BridgeProcessManager {
    let store = Arc::new(MemoryIdentityStore::with_identity(ChannelKind::WhatsApp, OWNER));
    manager(store, GateMode::Serve, "123456")
}

fn start(
    manager: &BridgeProcessManager,
    handler: Arc<RecordingHandler>,
) -> (FakeHelper, JoinHandle<anyhow::Result<ListenExit>>) {
    let (manager_side, helper_side) = tokio::io::duplex(1 << 20);
    let (manager_read, manager_write) = split(manager_side);
    let (helper_read, helper_write) = split(helper_side);

    let serving = manager.clone();
    let handler: Arc<dyn InboundHandler> = handler;
    let task = tokio::spawn(async move { serving.serve(manager_read, manager_write, handler).await });

    (
        FakeHelper {
            lines: BufReader::new(helper_read).lines(),
            writer: helper_write,
        },
        task,
    )
}

/// Owner says hi and we wait for it, so the link and reply target are live
async fn greet(helper: &mut FakeHelper, handler: &RecordingHandler) {
    let before = handler.len();
    helper
        .emit(json!({"type": "message", "from": OWNER, "text": "hi"}))
        .await;
    assert!(handler.wait_for(before + 1, Duration::from_secs(5)).await);
}

fn texts(handler: &RecordingHandler) -> Vec<String> {
    handler
        .received()
        .into_iter()
        .filter_map(|c| match c {
            InboundContent::Text(t) => Some(t),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Outbound delivery and acks
// =============================================================================

#[tokio::test]
async fn test_send_succeeds_on_msg_sent() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("hello owner").await });

    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "SEND");
    assert_eq!(payload, json!({"to": OWNER, "text": "hello owner"}));
    helper.emit(json!({"type": "msg_sent"})).await;

    assert!(send.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_send_times_out_without_ack() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let started = tokio::time::Instant::now();
    let send = tokio::spawn(async move { sender.deliver_text("anyone there?").await });
    helper.next_command().await;

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, DeliveryError::Timeout(d) if d == TEXT_ACK_TIMEOUT));
    assert!(started.elapsed() >= TEXT_ACK_TIMEOUT);
}

#[tokio::test]
async fn test_send_rejected_carries_helper_error() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("first").await });
    helper.next_command().await;
    helper.emit(json!({"type": "msg_error", "error": "x"})).await;
    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, DeliveryError::Rejected(ref m) if m == "x"));

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("second").await });
    helper.next_command().await;
    helper.emit(json!({"type": "msg_error"})).await;
    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, DeliveryError::Rejected(ref m) if m == "unknown error"));
}

#[tokio::test(start_paused = true)]
async fn test_long_reply_stops_after_missing_ack() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let text = "A".repeat(9000);
    let send = tokio::spawn(async move { sender.deliver_text(&text).await });

    let (verb, first) = helper.next_command().await;
    assert_eq!(verb, "SEND");
    assert_eq!(first["text"].as_str().unwrap().chars().count(), 4000);
    helper.emit(json!({"type": "msg_sent"})).await;

    let (_, second) = helper.next_command().await;
    assert_eq!(second["text"].as_str().unwrap().chars().count(), 4000);
    // Second ack never comes

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, DeliveryError::Timeout(_)));
    assert!(helper.stays_quiet(Duration::from_secs(300)).await, "no third chunk");
}

#[tokio::test]
async fn test_concurrent_send_is_rejected() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let first = tokio::spawn(async move { sender.deliver_text("one").await });
    helper.next_command().await;

    let err = mgr.deliver_text("two").await.unwrap_err();
    assert!(matches!(err, DeliveryError::SendInFlight));

    helper.emit(json!({"type": "msg_sent"})).await;
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_helper_exit_fails_pending_send() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("bye").await });
    helper.next_command().await;
    drop(helper);

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, DeliveryError::HelperExited));
    assert_eq!(serve.await.unwrap().unwrap(), ListenExit::Closed);
    assert!(!mgr.is_connected());
}

#[tokio::test]
async fn test_send_without_recipient_or_helper() {
    let unbound = manager(Arc::new(MemoryIdentityStore::new()), GateMode::Serve, "123456");
    let handler = Arc::new(RecordingHandler::new());
    let (_helper, _serve) = start(&unbound, handler);
    tokio::task::yield_now().await;
    assert!(matches!(
        unbound.deliver_text("hello").await.unwrap_err(),
        DeliveryError::NoRecipient
    ));

    // Bound, but no helper running
    let idle = owned_manager();
    assert!(matches!(
        idle.deliver_text("hello").await.unwrap_err(),
        DeliveryError::NotConnected
    ));
}

#[tokio::test]
async fn test_send_file_waits_for_file_ack() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report.pdf");
    std::fs::write(&file, b"%PDF").unwrap();

    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let path = file.to_string_lossy().to_string();
    let send = tokio::spawn(async move { sender.send_file(&path).await });

    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "SEND_FILE");
    assert_eq!(payload["to"], OWNER);
    assert_eq!(payload["path"], file.to_string_lossy().as_ref());
    helper.emit(json!({"type": "file_sent"})).await;
    send.await.unwrap();
}

#[tokio::test]
async fn test_send_file_missing_tells_the_owner() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.send_file("/nonexistent/clawlink/out.txt").await });

    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "SEND");
    assert_eq!(payload["text"], "❌ File not found: /nonexistent/clawlink/out.txt");
    helper.emit(json!({"type": "msg_sent"})).await;
    send.await.unwrap();
}

// =============================================================================
// Inbound gating and echo suppression
// =============================================================================

#[tokio::test]
async fn test_echo_of_last_sent_chunk_is_discarded() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("pong").await });
    helper.next_command().await;
    helper.emit(json!({"type": "msg_sent"})).await;
    send.await.unwrap().unwrap();

    helper
        .emit(json!({"type": "message", "from": OWNER, "text": "pong", "fromMe": true}))
        .await;
    helper
        .emit(json!({"type": "message", "from": OWNER, "text": "ping", "fromMe": true}))
        .await;

    assert!(handler.wait_for(2, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(texts(&handler), vec!["hi".to_string(), "ping".to_string()]);
}

#[tokio::test]
async fn test_same_text_from_owner_device_is_not_an_echo() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    let sender = mgr.clone();
    let send = tokio::spawn(async move { sender.deliver_text("ok").await });
    helper.next_command().await;
    helper.emit(json!({"type": "msg_sent"})).await;
    send.await.unwrap().unwrap();

    // Not fromMe: the owner really typed "ok"
    helper
        .emit(json!({"type": "message", "from": OWNER, "text": "ok"}))
        .await;
    assert!(handler.wait_for(2, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn test_stranger_content_never_reaches_handler() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());

    let png = base64::engine::general_purpose::STANDARD.encode([0x89, b'P', b'N', b'G']);
    helper
        .emit(json!({"type": "message", "from": STRANGER, "text": "123456"}))
        .await;
    helper
        .emit(json!({"type": "image", "from": STRANGER, "base64": png}))
        .await;
    helper
        .emit(json!({"type": "file", "from": STRANGER, "base64": "aGk=", "filename": "x.txt"}))
        .await;
    greet(&mut helper, &handler).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.received(), vec![InboundContent::Text("hi".to_string())]);
}

#[tokio::test]
async fn test_owner_image_dispatched_with_default_prompt() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());

    let png = base64::engine::general_purpose::STANDARD.encode([0x89, b'P', b'N', b'G', 1, 2]);
    helper
        .emit(json!({"type": "image", "from": OWNER, "base64": png, "caption": "  "}))
        .await;
    assert!(handler.wait_for(1, Duration::from_secs(5)).await);

    match &handler.received()[0] {
        InboundContent::Image(image) => {
            assert_eq!(image.mime_type, "image/png");
            assert_eq!(image.prompt, "What is in this image?");
            assert_eq!(image.data_base64, png);
        }
        other => panic!("expected image, got {:?}", other),
    }
}

#[tokio::test]
async fn test_owner_file_saved_under_sanitized_name() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());

    let data = base64::engine::general_purpose::STANDARD.encode(b"quarterly numbers");
    helper
        .emit(json!({
            "type": "file",
            "from": OWNER,
            "base64": data,
            "filename": "../../etc/report.txt",
            "caption": "summarize"
        }))
        .await;
    assert!(handler.wait_for(1, Duration::from_secs(5)).await);

    match &handler.received()[0] {
        InboundContent::File(upload) => {
            assert_eq!(upload.path.file_name().unwrap(), "report.txt");
            let dir = upload.path.parent().unwrap();
            assert!(dir.file_name().unwrap().to_string_lossy().starts_with("clawlink_"));
            assert_eq!(std::fs::read(&upload.path).unwrap(), b"quarterly numbers");
            assert_eq!(upload.caption.as_deref(), Some("summarize"));
            std::fs::remove_dir_all(dir).unwrap();
        }
        other => panic!("expected file, got {:?}", other),
    }
}

#[tokio::test]
async fn test_diagnostics_and_malformed_events_do_not_stop_the_loop() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());

    helper.emit_raw("Scan this QR code to link your device").await;
    helper.emit_raw("JSON_EVENT:{broken").await;
    helper.emit_raw(r#"JSON_EVENT:{"type":"presence_update"}"#).await;
    helper.emit(json!({"type": "connected"})).await;
    greet(&mut helper, &handler).await;
}

// =============================================================================
// Verification
// =============================================================================

#[tokio::test]
async fn test_verification_binds_owner_and_confirms() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteIdentityStore::new(dir.path()).unwrap());
    let mgr = manager(store.clone(), GateMode::Serve, "482913");
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());

    helper.emit(json!({"type": "connected"})).await;
    helper
        .emit(json!({"type": "message", "from": "A", "text": "wrong"}))
        .await;
    helper
        .emit(json!({"type": "message", "from": "A", "text": " 482913 "}))
        .await;

    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "SEND");
    assert_eq!(payload, json!({"to": "A", "text": VERIFICATION_CONFIRMATION}));
    helper.emit(json!({"type": "msg_sent"})).await;

    assert_eq!(store.load(ChannelKind::WhatsApp).unwrap().as_deref(), Some("A"));
    assert_eq!(mgr.gate().identity().as_deref(), Some("A"));

    helper
        .emit(json!({"type": "message", "from": "B", "text": "hello from b"}))
        .await;
    helper
        .emit(json!({"type": "message", "from": "A", "text": "hello"}))
        .await;
    assert!(handler.wait_for(1, Duration::from_secs(5)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(texts(&handler), vec!["hello".to_string()]);
}

#[tokio::test]
async fn test_verify_only_confirms_and_stops() {
    let store = Arc::new(MemoryIdentityStore::new());
    let mgr = manager(store.clone(), GateMode::VerifyOnly, "482913");
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, serve) = start(&mgr, handler.clone());

    helper
        .emit(json!({"type": "message", "from": "A", "text": "482913"}))
        .await;

    let exit = tokio::time::timeout(Duration::from_secs(5), serve)
        .await
        .expect("serve should stop promptly")
        .unwrap()
        .unwrap();
    assert_eq!(exit, ListenExit::Verified);

    // Fire-and-forget confirmation, no ack required
    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "SEND");
    assert_eq!(payload["text"], VERIFICATION_CONFIRMATION);
    assert_eq!(store.load(ChannelKind::WhatsApp).unwrap().as_deref(), Some("A"));
    assert!(handler.is_empty());
}

#[tokio::test]
async fn test_verify_only_with_bound_identity_returns_immediately() {
    let store = Arc::new(MemoryIdentityStore::with_identity(ChannelKind::WhatsApp, OWNER));
    let mgr = manager(store, GateMode::VerifyOnly, "482913");
    let handler: Arc<dyn InboundHandler> = Arc::new(RecordingHandler::new());

    // Returns before touching node or the helper script
    let exit = mgr.listen(handler).await.unwrap();
    assert_eq!(exit, ListenExit::AlreadyVerified);
}

// =============================================================================
// Presence
// =============================================================================

#[tokio::test]
async fn test_typing_commands_go_to_owner() {
    let mgr = owned_manager();
    let handler = Arc::new(RecordingHandler::new());
    let (mut helper, _serve) = start(&mgr, handler.clone());
    greet(&mut helper, &handler).await;

    mgr.start_typing().await;
    mgr.start_typing().await;
    let (verb, payload) = helper.next_command().await;
    assert_eq!(verb, "TYPING");
    assert_eq!(payload, json!({"to": OWNER, "action": "composing"}));

    mgr.stop_typing().await;
    let mut composing = 1;
    loop {
        let (verb, payload) = helper.next_command().await;
        assert_eq!(verb, "TYPING");
        if payload["action"] == "paused" {
            break;
        }
        composing += 1;
    }
    // Well under a second elapsed: a single loop ticks once
    assert_eq!(composing, 1);
}
