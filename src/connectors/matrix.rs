// ABOUTME: Matrix connector built on matrix-sdk event handler callbacks and the sync loop
// ABOUTME: Each authorized event is dispatched on its own task; replies go to the owner's last room

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawlink_core::config::MatrixConfig;
use clawlink_core::presence::{PresenceAnnouncer, PresenceSink, PresenceState, MATRIX_INTERVAL};
use clawlink_core::{
    deliver_chunks, media, operator, AuthorizationGate, ChannelConnector, ChannelKind,
    DeliveryError, GateDecision, InboundContent, InboundHandler, ListenExit, ReplyTarget,
    ShutdownRequest, VERIFICATION_CONFIRMATION,
};
use matrix_sdk::{
    config::SyncSettings,
    media::{MediaFormat, MediaRequestParameters},
    room::Room,
    ruma::{
        events::room::{
            member::StrippedRoomMemberEvent,
            message::{
                FileMessageEventContent, MessageType, OriginalSyncRoomMessageEvent,
                RoomMessageEventContent,
            },
            MediaSource,
        },
        OwnedRoomId, OwnedUserId,
    },
    Client, RoomState,
};
use std::future::IntoFuture;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

const CHANNEL: ChannelKind = ChannelKind::Matrix;

/// Upper bound for one room send to complete
pub const SEND_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Client setup
// =============================================================================

pub async fn create_client(home_server: &str, store_dir: &Path) -> Result<Client> {
    std::fs::create_dir_all(store_dir)
        .with_context(|| format!("Failed to create {}", store_dir.display()))?;

    let client = Client::builder()
        .homeserver_url(home_server)
        .sqlite_store(store_dir, None)
        .build()
        .await
        .context("Failed to create Matrix client")?;

    tracing::info!(channel = %CHANNEL, "Matrix client created");
    Ok(client)
}

/// Log in with the access token when present, else the password
pub async fn login(client: &Client, config: &MatrixConfig) -> Result<()> {
    if let Some(token) = config.access_token.as_deref() {
        tracing::info!(channel = %CHANNEL, "Logging in with access token");
        let user_id: OwnedUserId = config.user_id.parse().context("Invalid Matrix user id")?;
        let session = matrix_sdk::AuthSession::Matrix(matrix_sdk::authentication::matrix::MatrixSession {
            meta: matrix_sdk::SessionMeta {
                user_id,
                device_id: config.device_name.clone().into(),
            },
            tokens: matrix_sdk::SessionTokens {
                access_token: token.to_string(),
                refresh_token: None,
            },
        });
        client
            .restore_session(session)
            .await
            .context("Failed to restore Matrix session")?;
    } else if let Some(password) = config.password.as_deref() {
        tracing::info!(channel = %CHANNEL, "Logging in with password");
        client
            .matrix_auth()
            .login_username(&config.user_id, password)
            .device_id(&config.device_name)
            .send()
            .await
            .context("Failed to log in")?;
    } else {
        anyhow::bail!("Either MATRIX_PASSWORD or MATRIX_ACCESS_TOKEN is required");
    }

    let user_id = client.user_id().context("Login did not yield a user id")?;
    tracing::info!(channel = %CHANNEL, user_id = %user_id, "Logged in successfully");
    Ok(())
}

// =============================================================================
// Shared state reachable from SDK callbacks
// =============================================================================

struct Shared {
    gate: AuthorizationGate,
    target: ReplyTarget,
    client: RwLock<Option<Client>>,
    shutdown: ShutdownRequest,
}

impl Shared {
    fn client(&self) -> Option<Client> {
        self.client.read().ok().and_then(|c| c.clone())
    }

    fn reply_room(&self) -> Result<Room, DeliveryError> {
        let client = self.client().ok_or(DeliveryError::NotConnected)?;
        let room_id: OwnedRoomId = self
            .target
            .get()
            .ok_or(DeliveryError::NoRecipient)?
            .parse()
            .map_err(DeliveryError::transport)?;
        client.get_room(&room_id).ok_or(DeliveryError::NotConnected)
    }

    async fn on_invite(&self, event: StrippedRoomMemberEvent, client: Client, room: Room) {
        let for_us = client
            .user_id()
            .map(|own| event.state_key == own)
            .unwrap_or(false);
        if !for_us || room.state() != RoomState::Invited {
            return;
        }

        // Unbound: accept anyone so they can send the code. Bound: only the owner.
        if let Some(owner) = self.gate.identity() {
            if event.sender.as_str() != owner {
                tracing::warn!(
                    channel = %CHANNEL,
                    room_id = %room.room_id(),
                    inviter = %event.sender,
                    "Ignoring room invite from non-owner"
                );
                return;
            }
        }

        match room.join().await {
            Ok(_) => tracing::info!(channel = %CHANNEL, room_id = %room.room_id(), "Joined room"),
            Err(e) => tracing::error!(
                channel = %CHANNEL,
                error = %e,
                room_id = %room.room_id(),
                "Failed to join room"
            ),
        }
    }

    async fn on_message(
        &self,
        event: OriginalSyncRoomMessageEvent,
        room: Room,
        client: Client,
        handler: Arc<dyn InboundHandler>,
    ) {
        if room.state() != RoomState::Joined {
            return;
        }
        if client.user_id().map(|own| event.sender == own).unwrap_or(false) {
            return;
        }
        let sender = event.sender.to_string();

        match event.content.msgtype {
            MessageType::Text(text) => match self.gate.check_text(&sender, &text.body) {
                Ok(GateDecision::Dispatch) => {
                    self.target.set(room.room_id().to_string());
                    tokio::spawn(async move {
                        handler.handle(InboundContent::Text(text.body)).await;
                    });
                }
                Ok(GateDecision::Verified) => {
                    self.target.set(room.room_id().to_string());
                    let confirmation = RoomMessageEventContent::text_plain(VERIFICATION_CONFIRMATION);
                    if let Err(e) = room.send(confirmation).await {
                        tracing::warn!(channel = %CHANNEL, error = %e, "Failed to send confirmation");
                    }
                    if self.gate.is_verify_only() {
                        self.shutdown.request();
                    }
                }
                Ok(GateDecision::Discard(_)) => {}
                Err(e) => operator::failure(
                    CHANNEL,
                    &format!("Failed to persist authorized identity: {}", e),
                ),
            },
            MessageType::Image(image) => {
                if self.gate.check_sender(&sender) != GateDecision::Dispatch {
                    return;
                }
                self.target.set(room.room_id().to_string());
                let caption = media_caption(image.filename.as_deref(), &image.body);
                tokio::spawn(async move {
                    match download(&client, image.source).await {
                        Ok(bytes) => {
                            let image = media::image_from_bytes(&bytes, caption.as_deref());
                            handler.handle(InboundContent::Image(image)).await;
                        }
                        Err(e) => report_inbound_error(&room, "image", e).await,
                    }
                });
            }
            MessageType::File(file) => {
                if self.gate.check_sender(&sender) != GateDecision::Dispatch {
                    return;
                }
                self.target.set(room.room_id().to_string());
                let caption = media_caption(file.filename.as_deref(), &file.body);
                let name = file.filename.clone().unwrap_or_else(|| file.body.clone());
                tokio::spawn(async move {
                    let saved = match download(&client, file.source).await {
                        Ok(bytes) => media::save_upload(&name, &bytes, caption.as_deref())
                            .context("Failed to save upload"),
                        Err(e) => Err(e),
                    };
                    match saved {
                        Ok(upload) => handler.handle(InboundContent::File(upload)).await,
                        Err(e) => report_inbound_error(&room, "file", e).await,
                    }
                });
            }
            _ => {
                tracing::debug!(channel = %CHANNEL, "Ignoring unsupported message type");
            }
        }
    }
}

/// Matrix carries a caption in `body` only when a separate `filename` is set
fn media_caption(filename: Option<&str>, body: &str) -> Option<String> {
    match filename {
        Some(name) if name != body => Some(body.to_string()),
        _ => None,
    }
}

async fn download(client: &Client, source: MediaSource) -> Result<Vec<u8>> {
    let request = MediaRequestParameters {
        source,
        format: MediaFormat::File,
    };
    client
        .media()
        .get_media_content(&request, true)
        .await
        .context("Failed to download attachment")
}

async fn report_inbound_error(room: &Room, what: &str, error: anyhow::Error) {
    operator::failure(CHANNEL, &format!("Inbound {} error: {:#}", what, error));
    let reply = RoomMessageEventContent::text_plain(format!("Error processing {}: {}", what, error));
    if let Err(e) = room.send(reply).await {
        tracing::warn!(channel = %CHANNEL, error = %e, "Failed to report inbound error");
    }
}

struct TypingNotices {
    shared: Arc<Shared>,
}

#[async_trait]
impl PresenceSink for TypingNotices {
    async fn announce(&self, state: PresenceState) {
        let Ok(room) = self.shared.reply_room() else {
            return;
        };
        let typing = state == PresenceState::Composing;
        if let Err(e) = room.typing_notice(typing).await {
            tracing::debug!(channel = %CHANNEL, error = %e, "Failed to set typing notice");
        }
    }
}

// =============================================================================
// MatrixConnector
// =============================================================================

pub struct MatrixConnector {
    config: MatrixConfig,
    store_dir: PathBuf,
    shared: Arc<Shared>,
    presence: PresenceAnnouncer,
}

impl MatrixConnector {
    /// `store_dir` holds the SDK's sqlite state (sync token, crypto store)
    pub fn new(config: MatrixConfig, store_dir: PathBuf, gate: AuthorizationGate) -> Self {
        let shared = Arc::new(Shared {
            gate,
            target: ReplyTarget::new(),
            client: RwLock::new(None),
            shutdown: ShutdownRequest::new(),
        });
        let presence = PresenceAnnouncer::new(
            Arc::new(TypingNotices {
                shared: shared.clone(),
            }),
            MATRIX_INTERVAL,
        );

        Self {
            config,
            store_dir,
            shared,
            presence,
        }
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.shared.gate
    }

    pub fn shutdown_handle(&self) -> ShutdownRequest {
        self.shared.shutdown.clone()
    }

    pub async fn deliver_text(&self, text: &str) -> Result<(), DeliveryError> {
        let room = self.shared.reply_room()?;

        deliver_chunks(CHANNEL, text, |chunk| {
            let room = room.clone();
            async move {
                let send = room.send(RoomMessageEventContent::text_plain(chunk));
                match tokio::time::timeout(SEND_TIMEOUT, send.into_future()).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(DeliveryError::transport(e)),
                    Err(_) => Err(DeliveryError::Timeout(SEND_TIMEOUT)),
                }
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| e.source)
    }

    pub async fn deliver_file(&self, path: &Path) -> Result<(), DeliveryError> {
        let room = self.shared.reply_room()?;
        let client = self.shared.client().ok_or(DeliveryError::NotConnected)?;

        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let content_type: mime_guess::mime::Mime = media::mime_for_path(path)
            .parse()
            .unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM);

        let response = client
            .media()
            .upload(&content_type, data, None)
            .await
            .map_err(DeliveryError::transport)?;

        let file_content = FileMessageEventContent::new(filename, MediaSource::Plain(response.content_uri));
        let send = room.send(RoomMessageEventContent::new(MessageType::File(file_content)));
        match tokio::time::timeout(SEND_TIMEOUT, send.into_future()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(DeliveryError::transport(e)),
            Err(_) => Err(DeliveryError::Timeout(SEND_TIMEOUT)),
        }
    }
}

#[async_trait]
impl ChannelConnector for MatrixConnector {
    fn channel(&self) -> ChannelKind {
        CHANNEL
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) -> Result<ListenExit> {
        let gate = &self.shared.gate;
        if gate.is_verify_only() {
            if let Some(owner) = gate.identity() {
                operator::notice(CHANNEL, &format!("✅ Identity already verified: {}", owner));
                return Ok(ListenExit::AlreadyVerified);
            }
        }

        let client = create_client(&self.config.home_server, &self.store_dir).await?;
        login(&client, &self.config).await?;
        if let Ok(mut slot) = self.shared.client.write() {
            *slot = Some(client.clone());
        }

        let shared = self.shared.clone();
        client.add_event_handler(
            move |event: StrippedRoomMemberEvent, client: Client, room: Room| {
                let shared = shared.clone();
                async move { shared.on_invite(event, client, room).await }
            },
        );

        // Catch up before registering the message handler so history is not replayed
        tracing::info!(channel = %CHANNEL, "Performing initial sync...");
        let response = tokio::select! {
            _ = self.shared.shutdown.requested() => return Ok(ListenExit::Stopped),
            response = client.sync_once(SyncSettings::default()) => {
                response.context("Initial sync failed")?
            }
        };

        let shared = self.shared.clone();
        client.add_event_handler(
            move |event: OriginalSyncRoomMessageEvent, room: Room, client: Client| {
                let shared = shared.clone();
                let handler = handler.clone();
                async move { shared.on_message(event, room, client, handler).await }
            },
        );
        gate.announce();

        let settings = SyncSettings::default().token(response.next_batch);
        let exit = tokio::select! {
            _ = self.shared.shutdown.requested() => {
                if gate.is_verify_only() && gate.is_bound() {
                    ListenExit::Verified
                } else {
                    ListenExit::Stopped
                }
            }
            result = client.sync(settings) => {
                result.context("Matrix sync loop failed")?;
                ListenExit::Closed
            }
        };

        self.presence.stop().await;
        Ok(exit)
    }

    async fn send(&self, text: &str) {
        match self.deliver_text(text).await {
            Ok(()) => {}
            Err(DeliveryError::NoRecipient) | Err(DeliveryError::NotConnected) => {
                tracing::warn!(channel = %CHANNEL, "No room to reply to yet, skipping send");
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
                tracing::warn!(channel = %CHANNEL, "No room to reply to yet, skipping file");
            }
            Err(e) => {
                operator::failure(CHANNEL, &format!("Send file error: {}", e));
                self.send(&format!("Error sending file: {}", e)).await;
            }
        }
    }

    async fn start_typing(&self) {
        self.presence.start().await;
    }

    async fn stop_typing(&self) {
        self.presence.stop().await;
    }
}
