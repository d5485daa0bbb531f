// ABOUTME: Slack connector over Socket Mode (push events) with Web API replies
// ABOUTME: Message events flow through a channel into listen, which gates and dispatches inline

use anyhow::{Context, Result};
use async_trait::async_trait;
use clawlink_core::config::SlackConfig;
use clawlink_core::{
    deliver_chunks, media, operator, AuthorizationGate, ChannelConnector, ChannelKind,
    DeliveryError, GateDecision, InboundContent, InboundHandler, ListenExit, ReplyTarget,
    ShutdownRequest, VERIFICATION_CONFIRMATION,
};
use slack_morphism::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

const CHANNEL: ChannelKind = ChannelKind::Slack;

/// A user message lifted out of a Socket Mode push event
#[derive(Debug, Clone, PartialEq, Eq)]
struct SlackInbound {
    sender: String,
    channel: String,
    text: String,
}

// =============================================================================
// Socket Mode callbacks (fn pointers; state travels via SlackClientEventsUserState)
// =============================================================================

#[derive(Clone)]
struct ListenerState {
    tx: mpsc::Sender<SlackInbound>,
    bot_user_id: String,
}

fn inbound_from_event(msg_event: &SlackMessageEvent, bot_user_id: &str) -> Option<SlackInbound> {
    // Edits, joins and other subtypes are not owner messages
    if msg_event.subtype.is_some() || msg_event.sender.bot_id.is_some() {
        return None;
    }
    let sender = msg_event.sender.user.as_ref()?.to_string();
    if sender == bot_user_id {
        return None;
    }
    let channel = msg_event.origin.channel.as_ref()?.to_string();
    let text = msg_event
        .content
        .as_ref()
        .and_then(|c| c.text.as_ref())
        .map(|t| t.to_string())
        .filter(|t| !t.trim().is_empty())?;

    Some(SlackInbound {
        sender,
        channel,
        text,
    })
}

async fn handle_push_event(
    event: SlackPushEventCallback,
    _client: Arc<SlackHyperClient>,
    states: SlackClientEventsUserState,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = {
        let guard = states.read().await;
        guard
            .get_user_state::<ListenerState>()
            .cloned()
            .ok_or("ListenerState not found in user state")?
    };

    if let SlackEventCallbackBody::Message(msg_event) = event.event {
        if let Some(inbound) = inbound_from_event(&msg_event, &state.bot_user_id) {
            if state.tx.send(inbound).await.is_err() {
                tracing::warn!(channel = %CHANNEL, "Listener dropped, discarding Slack message");
            }
        }
    }
    Ok(())
}

fn socket_mode_error_handler(
    err: Box<dyn std::error::Error + Send + Sync>,
    _client: Arc<SlackHyperClient>,
    _states: SlackClientEventsUserState,
) -> HttpStatusCode {
    tracing::error!(channel = %CHANNEL, error = %err, "Socket Mode error");
    HttpStatusCode::OK
}

// =============================================================================
// SlackConnector
// =============================================================================

pub struct SlackConnector {
    client: Arc<SlackHyperClient>,
    /// Bot OAuth token (xoxb-...) for Web API calls
    bot_token: SlackApiToken,
    /// App-level token (xapp-...) for Socket Mode
    app_token: SlackApiToken,
    gate: Arc<AuthorizationGate>,
    target: ReplyTarget,
    shutdown: ShutdownRequest,
}

impl SlackConnector {
    pub fn new(config: &SlackConfig, gate: AuthorizationGate) -> Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("Failed to create Slack HTTP connector")?,
        ));

        Ok(Self {
            client,
            bot_token: SlackApiToken::new(SlackApiTokenValue(config.bot_token.clone())),
            app_token: SlackApiToken::new(SlackApiTokenValue(config.app_token.clone())),
            gate: Arc::new(gate),
            target: ReplyTarget::new(),
            shutdown: ShutdownRequest::new(),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownRequest {
        self.shutdown.clone()
    }

    /// Channel the owner last wrote in; a bare user id opens the owner's DM
    fn reply_channel(&self) -> Result<SlackChannelId, DeliveryError> {
        self.target
            .resolve(&self.gate)
            .map(SlackChannelId::from)
            .ok_or(DeliveryError::NoRecipient)
    }

    /// Returns an exit when verify-only mode is done
    async fn process(
        &self,
        inbound: SlackInbound,
        handler: &Arc<dyn InboundHandler>,
    ) -> Option<ListenExit> {
        match self.gate.check_text(&inbound.sender, &inbound.text) {
            Ok(GateDecision::Dispatch) => {
                self.target.set(inbound.channel);
                handler.handle(InboundContent::Text(inbound.text)).await;
            }
            Ok(GateDecision::Verified) => {
                self.target.set(inbound.channel);
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
        }
        None
    }

    pub async fn deliver_text(&self, text: &str) -> Result<(), DeliveryError> {
        let channel = self.reply_channel()?;

        deliver_chunks(CHANNEL, text, |chunk| {
            let req = SlackApiChatPostMessageRequest::new(
                channel.clone(),
                SlackMessageContent::new().with_text(chunk),
            );
            async move {
                let session = self.client.open_session(&self.bot_token);
                session
                    .chat_post_message(&req)
                    .await
                    .map(|_| ())
                    .map_err(DeliveryError::transport)
            }
        })
        .await
        .map(|_| ())
        .map_err(|e| e.source)
    }

    /// Upload through files.getUploadURLExternal, then share into the reply channel
    pub async fn deliver_file(&self, path: &Path) -> Result<(), DeliveryError> {
        let channel = self.reply_channel()?;
        let data = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());

        let session = self.client.open_session(&self.bot_token);
        let upload = session
            .get_upload_url_external(&SlackApiFilesGetUploadUrlExternalRequest::new(
                filename.clone(),
                data.len(),
            ))
            .await
            .map_err(DeliveryError::transport)?;

        session
            .files_upload_via_url(&SlackApiFilesUploadViaUrlRequest::new(
                upload.upload_url,
                data,
                media::mime_for_path(path),
            ))
            .await
            .map_err(DeliveryError::transport)?;

        session
            .files_complete_upload_external(
                &SlackApiFilesCompleteUploadExternalRequest::new(vec![
                    SlackApiFilesComplete::new(upload.file_id).with_title(filename),
                ])
                .with_channel_id(channel),
            )
            .await
            .map_err(DeliveryError::transport)?;

        Ok(())
    }
}

#[async_trait]
impl ChannelConnector for SlackConnector {
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

        let auth = self
            .client
            .open_session(&self.bot_token)
            .auth_test()
            .await
            .context("Failed to call Slack auth.test, check bot_token")?;
        tracing::info!(
            channel = %CHANNEL,
            bot_user = %auth.user_id,
            team = %auth.team,
            "Slack bot authenticated"
        );

        let (tx, mut rx) = mpsc::channel(256);
        let listener_environment = Arc::new(
            SlackClientEventsListenerEnvironment::new(self.client.clone())
                .with_error_handler(socket_mode_error_handler)
                .with_user_state(ListenerState {
                    tx,
                    bot_user_id: auth.user_id.to_string(),
                }),
        );
        let callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);
        let listener = SlackClientSocketModeListener::new(
            &SlackClientSocketModeConfig::new(),
            listener_environment,
            callbacks,
        );

        listener
            .listen_for(&self.app_token)
            .await
            .context("Failed to start Socket Mode listener")?;
        tracing::info!(channel = %CHANNEL, "Socket Mode connected");
        self.gate.announce();

        let exit = loop {
            let inbound = tokio::select! {
                _ = self.shutdown.requested() => break ListenExit::Stopped,
                inbound = rx.recv() => match inbound {
                    Some(inbound) => inbound,
                    None => break ListenExit::Closed,
                },
            };
            if let Some(exit) = self.process(inbound, &handler).await {
                break exit;
            }
        };

        listener.shutdown().await;
        Ok(exit)
    }

    async fn send(&self, text: &str) {
        match self.deliver_text(text).await {
            Ok(()) => {}
            Err(DeliveryError::NoRecipient) => {
                tracing::warn!(channel = %CHANNEL, "No channel to reply to yet, skipping send");
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
                tracing::warn!(channel = %CHANNEL, "No channel to reply to yet, skipping file");
            }
            Err(e) => {
                operator::failure(CHANNEL, &format!("Send file error: {}", e));
                self.send(&format!("Error sending file: {}", e)).await;
            }
        }
    }

    // Slack has no typing indicator API for bots
    async fn start_typing(&self) {}

    async fn stop_typing(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_connector_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SlackConnector>();
    }

    #[test]
    fn test_listener_state_is_clone_and_send() {
        fn assert_clone_send<T: Clone + Send + Sync + 'static>() {}
        assert_clone_send::<ListenerState>();
    }
}
