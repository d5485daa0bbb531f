// ABOUTME: Connector backed by an external helper process speaking the bridge line protocol
// ABOUTME: Gates inbound events, correlates acks for outbound sends, and drives the typing loop

use crate::ack::PendingAck;
use crate::error::BridgeError;
use crate::preflight;
use crate::process;
use crate::protocol::{parse_line, BridgeCommand, BridgeEvent, HelperLine};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clawlink_core::config::WhatsAppConfig;
use clawlink_core::presence::{PresenceSink, BRIDGE_INTERVAL};
use clawlink_core::{
    deliver_chunks, media, metrics, operator, AuthorizationGate, ChannelConnector, ChannelKind,
    DeliveryError, GateDecision, InboundContent, InboundHandler, ListenExit, PresenceAnnouncer,
    PresenceState, ReplyTarget, ShutdownRequest, VERIFICATION_CONFIRMATION,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::OnceCell;

pub const TEXT_ACK_TIMEOUT: Duration = Duration::from_secs(60);
pub const FILE_ACK_TIMEOUT: Duration = Duration::from_secs(120);

const CHANNEL: ChannelKind = ChannelKind::WhatsApp;

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub script: PathBuf,
    pub node_binary: String,
    pub npm_binary: String,
    pub dependencies: Vec<String>,
    pub text_ack_timeout: Duration,
    pub file_ack_timeout: Duration,
}

impl From<&WhatsAppConfig> for BridgeSettings {
    fn from(config: &WhatsAppConfig) -> Self {
        Self {
            script: process::resolve_script(Path::new(&config.bridge_script)),
            node_binary: config.node_binary.clone(),
            npm_binary: config.npm_binary.clone(),
            dependencies: config.dependencies.clone(),
            text_ack_timeout: TEXT_ACK_TIMEOUT,
            file_ack_timeout: FILE_ACK_TIMEOUT,
        }
    }
}

// =============================================================================
// Helper link
// =============================================================================

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The write side of a live helper plus its ack slot
struct BridgeLink {
    writer: tokio::sync::Mutex<BoxedWriter>,
    ack: PendingAck,
}

impl BridgeLink {
    fn new(writer: BoxedWriter) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            ack: PendingAck::new(),
        }
    }

    async fn write_command(&self, command: &BridgeCommand) -> std::io::Result<()> {
        let line = command.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await
    }
}

type LinkSlot = RwLock<Option<Arc<BridgeLink>>>;

fn current_link(slot: &LinkSlot) -> Option<Arc<BridgeLink>> {
    slot.read().ok().and_then(|link| link.clone())
}

/// Typing indicator rendered as TYPING commands to the current recipient
struct BridgePresence {
    link: Arc<LinkSlot>,
    gate: Arc<AuthorizationGate>,
    reply_target: Arc<ReplyTarget>,
}

#[async_trait]
impl PresenceSink for BridgePresence {
    async fn announce(&self, state: PresenceState) {
        let (Some(to), Some(link)) = (self.reply_target.resolve(&self.gate), current_link(&self.link))
        else {
            return;
        };
        if let Err(e) = link.write_command(&BridgeCommand::Typing { to, action: state }).await {
            tracing::debug!(error = %e, "Failed to write typing command");
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

struct Inner {
    settings: BridgeSettings,
    gate: Arc<AuthorizationGate>,
    link: Arc<LinkSlot>,
    reply_target: Arc<ReplyTarget>,
    last_sent: Mutex<Option<String>>,
    presence: PresenceAnnouncer,
    preflight: OnceCell<()>,
    send_guard: tokio::sync::Mutex<()>,
    shutdown: ShutdownRequest,
    exit_reason: Mutex<Option<ListenExit>>,
}

/// Presents a helper process as a normal [`ChannelConnector`].
///
/// Cheap to clone; clones share the helper link, gate and ack slot.
#[derive(Clone)]
pub struct BridgeProcessManager {
    inner: Arc<Inner>,
}

impl BridgeProcessManager {
    pub fn new(settings: BridgeSettings, gate: AuthorizationGate) -> Self {
        let gate = Arc::new(gate);
        let link: Arc<LinkSlot> = Arc::new(RwLock::new(None));
        let reply_target = Arc::new(ReplyTarget::new());
        let presence = PresenceAnnouncer::new(
            Arc::new(BridgePresence {
                link: link.clone(),
                gate: gate.clone(),
                reply_target: reply_target.clone(),
            }),
            BRIDGE_INTERVAL,
        );

        Self {
            inner: Arc::new(Inner {
                settings,
                gate,
                link,
                reply_target,
                last_sent: Mutex::new(None),
                presence,
                preflight: OnceCell::new(),
                send_guard: tokio::sync::Mutex::new(()),
                shutdown: ShutdownRequest::new(),
                exit_reason: Mutex::new(None),
            }),
        }
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.inner.gate
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.inner.settings
    }

    pub fn shutdown_handle(&self) -> ShutdownRequest {
        self.inner.shutdown.clone()
    }

    pub fn is_connected(&self) -> bool {
        current_link(&self.inner.link).is_some()
    }

    fn set_link(&self, link: Option<Arc<BridgeLink>>) {
        if let Ok(mut slot) = self.inner.link.write() {
            *slot = link;
        }
    }

    fn finish_with(&self, reason: ListenExit) {
        if let Ok(mut exit) = self.inner.exit_reason.lock() {
            exit.get_or_insert(reason);
        }
        self.inner.shutdown.request();
    }

    /// Run the protocol over arbitrary byte streams until EOF or shutdown.
    ///
    /// `listen` calls this with the child's pipes; anything else that speaks
    /// the line protocol works too.
    pub async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        handler: Arc<dyn InboundHandler>,
    ) -> Result<ListenExit>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let link = Arc::new(BridgeLink::new(Box::new(writer)));
        self.set_link(Some(link.clone()));

        let this = self.clone();
        let reader_link = link.clone();
        let mut reader_task = tokio::spawn(async move {
            this.read_loop(reader, reader_link, handler).await;
        });

        let exit = tokio::select! {
            result = &mut reader_task => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "Helper reader task failed");
                }
                operator::notice(CHANNEL, "Helper process closed its output");
                ListenExit::Closed
            }
            _ = self.inner.shutdown.requested() => {
                reader_task.abort();
                self.inner
                    .exit_reason
                    .lock()
                    .ok()
                    .and_then(|reason| *reason)
                    .unwrap_or(ListenExit::Stopped)
            }
        };

        self.set_link(None);
        link.ack.abandon();
        Ok(exit)
    }

    async fn read_loop<R>(&self, reader: R, link: Arc<BridgeLink>, handler: Arc<dyn InboundHandler>)
    where
        R: AsyncRead + Send + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    HelperLine::Diagnostic(text) => operator::helper_diagnostic(text),
                    HelperLine::Event(Ok(event)) => self.handle_event(&link, event, &handler).await,
                    HelperLine::Event(Err(e)) => {
                        tracing::warn!(error = %e, "Skipping malformed helper event");
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read helper output");
                    break;
                }
            }
        }
        tracing::debug!("Helper output closed");
    }

    async fn handle_event(
        &self,
        link: &Arc<BridgeLink>,
        event: BridgeEvent,
        handler: &Arc<dyn InboundHandler>,
    ) {
        let gate = &self.inner.gate;

        match event {
            BridgeEvent::Message { from, text, from_me } => {
                let text = text.trim().to_string();
                let decision = match gate.check_text(&from, &text) {
                    Ok(decision) => decision,
                    Err(e) => {
                        operator::failure(CHANNEL, &format!("Failed to persist owner identity: {}", e));
                        return;
                    }
                };

                match decision {
                    GateDecision::Verified => self.confirm_verification(link, from).await,
                    GateDecision::Dispatch => {
                        if from_me && self.is_echo(&text) {
                            tracing::debug!("Discarding echo of our own message");
                            metrics::record_discarded(CHANNEL, "echo");
                            return;
                        }
                        operator::notice(CHANNEL, &format!("📩 {}", text));
                        self.inner.reply_target.set(from);
                        self.dispatch(handler, InboundContent::Text(text));
                    }
                    GateDecision::Discard(_) => {}
                }
            }
            BridgeEvent::Image { from, base64, caption } => {
                if gate.check_sender(&from) != GateDecision::Dispatch {
                    return;
                }
                match media::decode_base64(&base64) {
                    Ok(bytes) => {
                        operator::notice(CHANNEL, &format!("📩 [Photo] {}", caption.trim()));
                        self.inner.reply_target.set(from);
                        let image = media::image_from_bytes(&bytes, Some(&caption));
                        self.dispatch(handler, InboundContent::Image(image));
                    }
                    Err(e) => operator::failure(CHANNEL, &format!("Image decode error: {}", e)),
                }
            }
            BridgeEvent::File {
                from,
                base64,
                filename,
                caption,
            } => {
                if gate.check_sender(&from) != GateDecision::Dispatch {
                    return;
                }
                let saved = media::decode_base64(&base64)
                    .map_err(|e| e.to_string())
                    .and_then(|bytes| {
                        media::save_upload(&filename, &bytes, Some(&caption)).map_err(|e| e.to_string())
                    });
                match saved {
                    Ok(upload) => {
                        operator::notice(CHANNEL, &format!("📩 [Document] {}", filename));
                        self.inner.reply_target.set(from);
                        self.dispatch(handler, InboundContent::File(upload));
                    }
                    Err(e) => operator::failure(CHANNEL, &format!("Document error: {}", e)),
                }
            }
            BridgeEvent::Connected => {
                operator::notice(CHANNEL, "✅ Bridge connected");
                if gate.is_bound() && gate.is_verify_only() {
                    self.finish_with(ListenExit::AlreadyVerified);
                } else {
                    gate.announce();
                }
            }
            BridgeEvent::MsgSent | BridgeEvent::FileSent => {
                link.ack.resolve(Ok(()));
            }
            BridgeEvent::MsgError { error } | BridgeEvent::FileError { error } => {
                link.ack.resolve(Err(error));
            }
            BridgeEvent::Unknown => {
                tracing::debug!("Ignoring unknown helper event");
            }
        }
    }

    async fn confirm_verification(&self, link: &Arc<BridgeLink>, owner: String) {
        if self.inner.gate.is_verify_only() {
            // Exiting right away: no ack wait
            let command = BridgeCommand::Send {
                to: owner,
                text: VERIFICATION_CONFIRMATION.to_string(),
            };
            if let Err(e) = link.write_command(&command).await {
                tracing::warn!(error = %e, "Failed to write verification confirmation");
            }
            self.finish_with(ListenExit::Verified);
            return;
        }

        self.inner.reply_target.set(owner);
        // The reader must keep running to see the ack, so send from another task
        let this = self.clone();
        tokio::spawn(async move {
            this.send(VERIFICATION_CONFIRMATION).await;
        });
    }

    fn dispatch(&self, handler: &Arc<dyn InboundHandler>, content: InboundContent) {
        let handler = handler.clone();
        tokio::spawn(async move {
            handler.handle(content).await;
        });
    }

    fn is_echo(&self, text: &str) -> bool {
        self.inner
            .last_sent
            .lock()
            .map(|last| last.as_deref().map(str::trim) == Some(text))
            .unwrap_or(false)
    }

    fn remember_sent(&self, chunk: &str) {
        if let Ok(mut last) = self.inner.last_sent.lock() {
            *last = Some(chunk.to_string());
        }
    }

    fn outbound_route(&self) -> Result<(String, Arc<BridgeLink>), DeliveryError> {
        let to = self
            .inner
            .reply_target
            .resolve(&self.inner.gate)
            .ok_or(DeliveryError::NoRecipient)?;
        let link = current_link(&self.inner.link).ok_or(DeliveryError::NotConnected)?;
        Ok((to, link))
    }

    /// Send `text` in chunks, waiting for each ack. Stops at the first failure.
    pub async fn deliver_text(&self, text: &str) -> Result<(), DeliveryError> {
        let _guard = self
            .inner
            .send_guard
            .try_lock()
            .map_err(|_| DeliveryError::SendInFlight)?;
        let (to, link) = self.outbound_route()?;
        let timeout = self.inner.settings.text_ack_timeout;

        deliver_chunks(CHANNEL, text, |chunk| {
            let to = to.clone();
            let link = link.clone();
            async move {
                self.remember_sent(&chunk);
                let ack = link.ack.arm();
                link.write_command(&BridgeCommand::Send { to, text: chunk }).await?;
                link.ack.wait(ack, timeout).await
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| e.source)
    }

    /// Send an existing local file, waiting for the helper's ack
    pub async fn deliver_file(&self, path: &Path) -> Result<(), DeliveryError> {
        let _guard = self
            .inner
            .send_guard
            .try_lock()
            .map_err(|_| DeliveryError::SendInFlight)?;
        let (to, link) = self.outbound_route()?;

        let ack = link.ack.arm();
        link.write_command(&BridgeCommand::SendFile {
            to,
            path: path.to_string_lossy().to_string(),
        })
        .await?;
        let result = link.ack.wait(ack, self.inner.settings.file_ack_timeout).await;
        if result.is_err() {
            metrics::record_delivery_failure(CHANNEL);
        }
        result
    }

    async fn ensure_preflight(&self) -> Result<(), BridgeError> {
        let settings = &self.inner.settings;
        self.inner
            .preflight
            .get_or_try_init(|| async {
                preflight::ensure_dependencies(
                    &settings.node_binary,
                    &settings.npm_binary,
                    &settings.dependencies,
                    process::script_dir(&settings.script),
                )
                .await
            })
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ChannelConnector for BridgeProcessManager {
    fn channel(&self) -> ChannelKind {
        CHANNEL
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) -> Result<ListenExit> {
        let gate = &self.inner.gate;
        if gate.is_verify_only() {
            if let Some(owner) = gate.identity() {
                operator::notice(CHANNEL, &format!("✅ Identity already verified: {}", owner));
                return Ok(ListenExit::AlreadyVerified);
            }
        }

        let settings = &self.inner.settings;
        preflight::check_runtime(&settings.node_binary).await?;
        self.ensure_preflight().await?;

        let node_path = preflight::node_path(&settings.npm_binary).await;
        let mut child = process::spawn_helper(&settings.node_binary, &settings.script, node_path.as_deref())?;
        let stdin = child.stdin.take().context("Helper stdin was not piped")?;
        let stdout = child.stdout.take().context("Helper stdout was not piped")?;

        let exit = self.serve(stdout, stdin, handler).await;
        self.inner.presence.stop().await;
        process::stop_helper(&mut child).await;
        exit
    }

    async fn send(&self, text: &str) {
        match self.deliver_text(text).await {
            Ok(()) => {}
            Err(DeliveryError::NoRecipient) | Err(DeliveryError::NotConnected) => {
                tracing::warn!(channel = %CHANNEL, "No recipient or helper yet, skipping send");
            }
            Err(e) => operator::failure(CHANNEL, &format!("Send error: {}", e)),
        }
    }

    async fn send_file(&self, path: &str) {
        let resolved = match media::resolve_outbound_path(path) {
            Ok(resolved) => resolved,
            Err(DeliveryError::FileNotFound(missing)) => {
                operator::failure(CHANNEL, &format!("File not found: {}", missing.display()));
                self.send(&media::file_not_found_reply(&missing)).await;
                return;
            }
            Err(e) => {
                operator::failure(CHANNEL, &format!("Send file error: {}", e));
                return;
            }
        };

        match self.deliver_file(&resolved).await {
            Ok(()) => {}
            Err(DeliveryError::NoRecipient) | Err(DeliveryError::NotConnected) => {
                tracing::warn!(channel = %CHANNEL, "No recipient or helper yet, skipping file");
            }
            Err(e) => operator::failure(CHANNEL, &format!("Send file error: {}", e)),
        }
    }

    async fn start_typing(&self) {
        self.inner.presence.start().await;
    }

    async fn stop_typing(&self) {
        self.inner.presence.stop().await;
    }
}
