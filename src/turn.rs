// ABOUTME: Orchestration boundary: turns one inbound message into one outbound reply
// ABOUTME: Wraps the agent call in the connector's typing indicator and handles control replies

use async_trait::async_trait;
use clawlink_core::{ChannelConnector, ControlSignal, InboundContent, InboundHandler, Reply};
use std::sync::Arc;

/// Notice sent after the agent asked for a fresh session
pub const NEW_SESSION_NOTICE: &str = "🆕 Started a new session.";

/// The collaborator that decides what to say
#[async_trait]
pub trait Agent: Send + Sync {
    async fn respond(&self, content: InboundContent) -> Reply;

    /// Drop conversational state
    async fn reset_session(&self);
}

/// Placeholder agent that echoes text back.
///
/// `/new` stands in for the new-session tool a real agent would expose.
#[derive(Debug, Default)]
pub struct EchoAgent;

#[async_trait]
impl Agent for EchoAgent {
    async fn respond(&self, content: InboundContent) -> Reply {
        match &content {
            InboundContent::Text(text) if text.trim() == "/new" => {
                Reply::Control(ControlSignal::NewSession)
            }
            InboundContent::Text(text) => Reply::Text(format!("You said: {}", text)),
            InboundContent::Image(image) => Reply::Text(format!(
                "Received a {} image. Prompt: {}",
                image.mime_type, image.prompt
            )),
            InboundContent::File(_) => Reply::Text(format!("Received {}", content.as_prompt())),
        }
    }

    async fn reset_session(&self) {
        tracing::debug!("Echo agent has no session state to reset");
    }
}

/// Runs one agent turn per inbound message against a connector
pub struct TurnRunner {
    connector: Arc<dyn ChannelConnector>,
    agent: Arc<dyn Agent>,
}

impl TurnRunner {
    pub fn new(connector: Arc<dyn ChannelConnector>, agent: Arc<dyn Agent>) -> Self {
        Self { connector, agent }
    }

    pub async fn run_turn(&self, content: InboundContent) {
        let channel = self.connector.channel();
        tracing::debug!(channel = %channel, "Starting turn");

        self.connector.start_typing().await;
        let reply = self.agent.respond(content).await;
        self.connector.stop_typing().await;

        match reply {
            Reply::Text(text) if text.trim().is_empty() => {
                tracing::debug!(channel = %channel, "Agent produced an empty reply");
            }
            Reply::Text(text) => self.connector.send(&text).await,
            Reply::Control(ControlSignal::NewSession) => {
                tracing::info!(channel = %channel, "Agent requested a new session");
                self.agent.reset_session().await;
                self.connector.send(NEW_SESSION_NOTICE).await;
            }
        }
    }
}

#[async_trait]
impl InboundHandler for TurnRunner {
    async fn handle(&self, content: InboundContent) {
        self.run_turn(content).await;
    }
}
