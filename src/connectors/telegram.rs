// ABOUTME: Telegram connector using teloxide long polling (getUpdates, 30s timeout)
// ABOUTME: Gates text, photo and document messages, replies to the owner's chat, typing via chat actions

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawlink_core::config::TelegramConfig;
use clawlink_core::presence::{PresenceAnnouncer, PresenceSink, PresenceState, TELEGRAM_INTERVAL};
use clawlink_core::{
    deliver_chunks, media, operator, AuthorizationGate, ChannelConnector, ChannelKind,
    DeliveryError, GateDecision, InboundContent, InboundHandler, ListenExit, ReplyTarget,
    ShutdownRequest, VERIFICATION_CONFIRMATION,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, FileId, InputFile, MediaKind, MessageKind, UpdateKind};

const CHANNEL: ChannelKind = ChannelKind::Telegram;
const POLL_TIMEOUT_SECS: u32 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Chat to reply to: the owner's last chat, else the owner's private chat
fn reply_chat(target: &ReplyTarget, gate: &AuthorizationGate) -> Option<ChatId> {
    target.resolve(gate)?.parse::<i64>().ok().map(ChatId)
}

struct ChatActionSink {
    bot: Bot,
    gate: Arc<AuthorizationGate>,
    target: Arc<ReplyTarget>,
}

#[async_trait]
impl PresenceSink for ChatActionSink {
    async fn announce(&self, state: PresenceState) {
        // Chat actions expire on their own; there is nothing to send for Paused
        if state != PresenceState::Composing {
            return;
        }
        let Some(chat) = reply_chat(&self.target, &self.gate) else {
            return;
        };
        if let Err(e) = self.bot.send_chat_action(chat, ChatAction::Typing).await {
            tracing::debug!(channel = %CHANNEL, error = %e, "Failed to send typing action");
        }
    }
}

// =============================================================================
// TelegramConnector
// =============================================================================

pub struct TelegramConnector {
    bot: Bot,
    gate: Arc<AuthorizationGate>,
    target: Arc<ReplyTarget>,
    presence: PresenceAnnouncer,
    shutdown: ShutdownRequest,
}

impl TelegramConnector {
    /// Build the connector; a configured `authorized_user_id` binds the gate up front
    pub fn new(config: &TelegramConfig, gate: AuthorizationGate) -> Result<Self> {
        if let Some(user_id) = config.authorized_user_id {
            gate.bind_preconfigured(user_id.to_string());
        }

        let mut bot = Bot::new(&config.bot_token);
        if let Some(api_url) = config.api_url.as_deref() {
            let url = url::Url::parse(api_url)
                .with_context(|| format!("Invalid telegram.api_url: {}", api_url))?;
            bot = bot.set_api_url(url);
        }
        let gate = Arc::new(gate);
        let target = Arc::new(ReplyTarget::new());
        let presence = PresenceAnnouncer::new(
            Arc::new(ChatActionSink {
                bot: bot.clone(),
                gate: gate.clone(),
                target: target.clone(),
            }),
            TELEGRAM_INTERVAL,
        );

        Ok(Self {
            bot,
            gate,
            target,
            presence,
            shutdown: ShutdownRequest::new(),
        })
    }

    pub fn gate(&self) -> &AuthorizationGate {
        &self.gate
    }

    pub fn shutdown_handle(&self) -> ShutdownRequest {
        self.shutdown.clone()
    }

    async fn download(&self, file_id: &FileId) -> Result<Vec<u8>> {
        let file = self
            .bot
            .get_file(file_id.clone())
            .await
            .context("Failed to get file info from Telegram")?;

        let mut data = Vec::new();
        self.bot
            .download_file(&file.path, &mut data)
            .await
            .context("Failed to download file from Telegram")?;
        Ok(data)
    }

    /// Confirm every update below `offset` so Telegram stops redelivering them
    async fn confirm_updates(&self, offset: i32) {
        let confirmed = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(1)
            .timeout(0)
            .send()
            .await;
        if let Err(e) = confirmed {
            tracing::warn!(channel = %CHANNEL, error = %e, offset, "Failed to confirm handled updates");
        }
    }

    /// Handle one incoming message. Returns an exit when verify-only mode is done.
    async fn process_message(
        &self,
        message: &Message,
        handler: &Arc<dyn InboundHandler>,
    ) -> Option<ListenExit> {
        let from = message.from.as_ref()?;
        if from.is_bot {
            return None;
        }
        let sender = from.id.0.to_string();
        let chat = message.chat.id;

        let MessageKind::Common(common) = &message.kind else {
            return None;
        };

        match &common.media_kind {
            MediaKind::Text(text) => match self.gate.check_text(&sender, &text.text) {
                Ok(GateDecision::Dispatch) => {
                    self.target.set(chat.0.to_string());
                    handler.handle(InboundContent::text(text.text.clone())).await;
                }
                Ok(GateDecision::Verified) => {
                    self.target.set(chat.0.to_string());
                    self.send(VERIFICATION_CONFIRMATION).await;
                    if self.gate.is_verify_only() {
                        self.shutdown.request();
                        return Some(ListenExit::Verified);
                    }
                }
                Ok(GateDecision::Discard(_)) => {}
                Err(e) => operator::failure(
                    CHANNEL,
                    &format!("Failed to persist authorized identity: {}", e),
                ),
            },
            MediaKind::Photo(photo) => {
                if self.gate.check_sender(&sender) != GateDecision::Dispatch {
                    return None;
                }
                self.target.set(chat.0.to_string());
                // Sizes are ordered smallest to largest
                let largest = photo.photo.last()?;
                match self.download(&largest.file.id).await {
                    Ok(bytes) => {
                        let image = media::image_from_bytes(&bytes, photo.caption.as_deref());
                        handler.handle(InboundContent::Image(image)).await;
                    }
                    Err(e) => {
                        operator::failure(CHANNEL, &format!("Photo error: {:#}", e));
                        self.send(&format!("Error processing image: {}", e)).await;
                    }
                }
            }
            MediaKind::Document(doc) => {
                if self.gate.check_sender(&sender) != GateDecision::Dispatch {
                    return None;
                }
                self.target.set(chat.0.to_string());
                let file_name = doc.document.file_name.as_deref().unwrap_or("file");
                let saved = match self.download(&doc.document.file.id).await {
                    Ok(bytes) => media::save_upload(file_name, &bytes, doc.caption.as_deref())
                        .context("Failed to save upload"),
                    Err(e) => Err(e),
                };
                match saved {
                    Ok(upload) => handler.handle(InboundContent::File(upload)).await,
                    Err(e) => {
                        operator::failure(CHANNEL, &format!("Document error: {:#}", e));
                        self.send(&format!("Error processing file: {}", e)).await;
                    }
                }
            }
            _ => {
                tracing::debug!(channel = %CHANNEL, "Ignoring unsupported message kind");
            }
        }
        None
    }

    pub async fn deliver_text(&self, text: &str) -> Result<(), DeliveryError> {
        let chat = reply_chat(&self.target, &self.gate).ok_or(DeliveryError::NoRecipient)?;

        deliver_chunks(CHANNEL, text, |chunk| {
            let bot = self.bot.clone();
            async move {
                bot.send_message(chat, chunk)
                    .await
                    .map(|_| ())
                    .map_err(DeliveryError::transport)
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| e.source)
    }

    pub async fn deliver_file(&self, path: &Path) -> Result<(), DeliveryError> {
        let chat = reply_chat(&self.target, &self.gate).ok_or(DeliveryError::NoRecipient)?;
        self.bot
            .send_document(chat, InputFile::file(path.to_path_buf()))
            .await
            .map(|_| ())
            .map_err(DeliveryError::transport)
    }
}

#[async_trait]
impl ChannelConnector for TelegramConnector {
    fn channel(&self) -> ChannelKind {
        CHANNEL
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) -> Result<ListenExit> {
        if self.gate.is_verify_only() {
            if let Some(owner) = self.gate.identity() {
                operator::notice(CHANNEL, &format!("✅ Identity already verified: {}", owner));
                return Ok(ListenExit::AlreadyVerified);
            }
        }

        let me = self
            .bot
            .get_me()
            .await
            .context("Failed to call Telegram getMe, check bot_token")?;
        tracing::info!(
            channel = %CHANNEL,
            bot_username = %me.username(),
            bot_id = me.id.0,
            "Telegram bot authenticated"
        );
        self.gate.announce();

        let mut offset: i32 = 0;
        loop {
            let updates = tokio::select! {
                _ = self.shutdown.requested() => return Ok(ListenExit::Stopped),
                updates = self.bot.get_updates().offset(offset).timeout(POLL_TIMEOUT_SECS).send() => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    tracing::warn!(
                        channel = %CHANNEL,
                        error = %e,
                        "Long polling error, retrying in 5s"
                    );
                    tokio::select! {
                        _ = self.shutdown.requested() => return Ok(ListenExit::Stopped),
                        _ = tokio::time::sleep(POLL_RETRY_DELAY) => continue,
                    }
                }
            };

            for update in updates {
                offset = update.id.as_offset();
                let UpdateKind::Message(message) = update.kind else {
                    continue;
                };
                if let Some(exit) = self.process_message(&message, &handler).await {
                    // Leaving mid-batch: the next poll would otherwise replay the code
                    self.confirm_updates(offset).await;
                    return Ok(exit);
                }
            }
        }
    }

    async fn send(&self, text: &str) {
        match self.deliver_text(text).await {
            Ok(()) => {}
            Err(DeliveryError::NoRecipient) => {
                tracing::warn!(channel = %CHANNEL, "No chat to reply to yet, skipping send");
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
            Err(DeliveryError::NoRecipient) => {
                tracing::warn!(channel = %CHANNEL, "No chat to reply to yet, skipping file");
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

#[cfg(test)]
mod tests {
    use super::*;
    use clawlink_core::{GateMode, IdentityStore, MemoryIdentityStore};

    fn config(authorized_user_id: Option<i64>) -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:fake_token".to_string(),
            authorized_user_id,
            api_url: None,
        }
    }

    fn gate(store: MemoryIdentityStore, mode: GateMode) -> AuthorizationGate {
        AuthorizationGate::new(CHANNEL, Arc::new(store), mode).unwrap()
    }

    #[test]
    fn test_telegram_connector_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<TelegramConnector>();
    }

    #[test]
    fn test_configured_user_binds_gate() {
        let connector = TelegramConnector::new(
            &config(Some(424242)),
            gate(MemoryIdentityStore::new(), GateMode::Serve),
        )
        .unwrap();
        assert_eq!(connector.gate().identity().as_deref(), Some("424242"));
    }

    #[test]
    fn test_reply_chat_falls_back_to_owner_private_chat() {
        let connector = TelegramConnector::new(
            &config(None),
            gate(
                MemoryIdentityStore::with_identity(CHANNEL, "777"),
                GateMode::Serve,
            ),
        )
        .unwrap();
        assert_eq!(
            reply_chat(&connector.target, &connector.gate),
            Some(ChatId(777))
        );

        connector.target.set("-100123456789");
        assert_eq!(
            reply_chat(&connector.target, &connector.gate),
            Some(ChatId(-100123456789))
        );
    }

    #[tokio::test]
    async fn test_verify_only_with_bound_owner_returns_immediately() {
        let connector = TelegramConnector::new(
            &config(Some(1)),
            gate(MemoryIdentityStore::new(), GateMode::VerifyOnly),
        )
        .unwrap();
        let handler = Arc::new(clawlink_core::testing::RecordingHandler::new());
        let exit = connector.listen(handler).await.unwrap();
        assert_eq!(exit, ListenExit::AlreadyVerified);
    }

    #[tokio::test]
    async fn test_send_without_chat_is_skipped() {
        let connector = TelegramConnector::new(
            &config(None),
            gate(MemoryIdentityStore::new(), GateMode::Serve),
        )
        .unwrap();
        assert!(matches!(
            connector.deliver_text("hello").await,
            Err(DeliveryError::NoRecipient)
        ));
    }

    #[test]
    fn test_invalid_api_url_is_rejected() {
        let mut config = config(None);
        config.api_url = Some("not a url".to_string());
        let result = TelegramConnector::new(&config, gate(MemoryIdentityStore::new(), GateMode::Serve));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_verification_confirms_offset_before_exiting() {
        use mockito::Matcher;
        use serde_json::json;

        let mut server = mockito::Server::new_async().await;
        let _me = server
            .mock("POST", Matcher::Regex("(?i)/getMe$".to_string()))
            .with_header("content-type", "application/json")
            .with_body(
                json!({"ok": true, "result": {
                    "id": 9000, "is_bot": true, "first_name": "clawlink", "username": "clawlink_bot",
                    "can_join_groups": false, "can_read_all_group_messages": false,
                    "supports_inline_queries": false, "can_connect_to_business": false,
                    "has_main_web_app": false
                }})
                .to_string(),
            )
            .create_async()
            .await;
        let _first_poll = server
            .mock("POST", Matcher::Regex("(?i)/getUpdates$".to_string()))
            .match_body(Matcher::PartialJson(json!({"offset": 0})))
            .with_header("content-type", "application/json")
            .with_body(
                json!({"ok": true, "result": [{
                    "update_id": 100,
                    "message": {
                        "message_id": 1, "date": 1700000000,
                        "chat": {"id": 42, "type": "private", "first_name": "Owner"},
                        "from": {"id": 42, "is_bot": false, "first_name": "Owner"},
                        "text": "482913"
                    }
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        let confirm = server
            .mock("POST", Matcher::Regex("(?i)/getUpdates$".to_string()))
            .match_body(Matcher::PartialJson(json!({"offset": 101})))
            .with_header("content-type", "application/json")
            .with_body(json!({"ok": true, "result": []}).to_string())
            .expect(1)
            .create_async()
            .await;
        // Confirmation reply; its content does not matter here
        let _send = server
            .mock("POST", Matcher::Regex("(?i)/sendMessage$".to_string()))
            .with_header("content-type", "application/json")
            .with_body(json!({"ok": false, "error_code": 400, "description": "test"}).to_string())
            .create_async()
            .await;

        let mut config = config(None);
        config.api_url = Some(server.url());
        let store = Arc::new(MemoryIdentityStore::new());
        let gate =
            AuthorizationGate::with_code(CHANNEL, store.clone(), GateMode::VerifyOnly, "482913")
                .unwrap();
        let connector = TelegramConnector::new(&config, gate).unwrap();
        let handler = Arc::new(clawlink_core::testing::RecordingHandler::new());

        let exit = tokio::time::timeout(Duration::from_secs(10), connector.listen(handler.clone()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, ListenExit::Verified);
        assert_eq!(store.load(CHANNEL).unwrap().as_deref(), Some("42"));
        assert!(handler.is_empty());
        confirm.assert_async().await;
    }
}
