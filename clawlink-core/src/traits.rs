// ABOUTME: Connector contract shared by every chat channel (terminal, bots, bridge helper)
// ABOUTME: Defines inbound payloads, the inbound handler seam, and the orchestrator reply type

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// =============================================================================
// Channel Identity
// =============================================================================

/// Which chat transport a connector speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Local terminal (stdin/stdout)
    Terminal,
    /// Poll-based bot API
    Telegram,
    /// Push/websocket bot API
    Slack,
    /// Async-callback bot API
    Matrix,
    /// Network reachable only through the external helper process
    WhatsApp,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 5] = [
        ChannelKind::Terminal,
        ChannelKind::Telegram,
        ChannelKind::Slack,
        ChannelKind::Matrix,
        ChannelKind::WhatsApp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Telegram => "telegram",
            Self::Slack => "slack",
            Self::Matrix => "matrix",
            Self::WhatsApp => "whatsapp",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "terminal" => Ok(Self::Terminal),
            "telegram" => Ok(Self::Telegram),
            "slack" => Ok(Self::Slack),
            "matrix" => Ok(Self::Matrix),
            "whatsapp" => Ok(Self::WhatsApp),
            other => anyhow::bail!("Unknown channel: {}", other),
        }
    }
}

// =============================================================================
// Inbound Content
// =============================================================================

/// Default prompt attached to images that arrive without a caption
pub const DEFAULT_IMAGE_PROMPT: &str = "What is in this image?";

/// An image ready to hand to a multimodal model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageContent {
    pub mime_type: String,
    pub data_base64: String,
    pub prompt: String,
}

impl ImageContent {
    /// Render as chat-completion content parts (text + data URL image)
    pub fn to_content_parts(&self) -> Value {
        json!([
            { "type": "text", "text": self.prompt },
            {
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", self.mime_type, self.data_base64)
                }
            }
        ])
    }
}

/// A file the owner uploaded, already written to local disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub caption: Option<String>,
}

/// Content delivered to the orchestrator callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundContent {
    /// Plain text from the owner
    Text(String),
    /// Multimodal image unit
    Image(ImageContent),
    /// Reference to an uploaded file plus optional caption
    File(FileUpload),
}

impl InboundContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Text form of the content as the orchestrator would quote it in a prompt
    pub fn as_prompt(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Image(image) => image.prompt.clone(),
            Self::File(upload) => {
                let mut prompt = format!("[Uploaded file: {}]", upload.path.display());
                if let Some(caption) = upload.caption.as_deref().filter(|c| !c.is_empty()) {
                    prompt.push('\n');
                    prompt.push_str(caption);
                }
                prompt
            }
        }
    }
}

/// Receives authorized inbound content from a connector.
///
/// Connectors may call this from a different task than the one running
/// `listen`, and the bridge and Matrix connectors call it concurrently.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(&self, content: InboundContent);
}

// =============================================================================
// Orchestrator Replies
// =============================================================================

/// Control signals an orchestrator tool can raise instead of reply text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Discard conversational state and start a fresh session
    NewSession,
}

/// What the orchestrator produced for one turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Control(ControlSignal),
}

// =============================================================================
// Connector Contract
// =============================================================================

/// Why `listen` returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// Transport ended (EOF, stop keyword, helper exit)
    Closed,
    /// Verify-only mode bound an identity; the owning process should exit
    Verified,
    /// Verify-only mode found an identity already bound; nothing was started
    AlreadyVerified,
    /// A shutdown request ended the session
    Stopped,
}

/// Capability set every chat connector implements.
///
/// `send` and `send_file` are best effort: delivery failures are reported on
/// the operator side-channel and never returned to the caller. Callers must
/// finish one outbound turn before starting the next; connectors keep no
/// internal outbound queue.
#[async_trait]
pub trait ChannelConnector: Send + Sync {
    /// Which channel this connector serves
    fn channel(&self) -> ChannelKind;

    /// Block until the transport terminates, dispatching authorized content
    async fn listen(&self, handler: std::sync::Arc<dyn InboundHandler>) -> Result<ListenExit>;

    /// Deliver text to the owner, chunked as needed
    async fn send(&self, text: &str);

    /// Deliver a local file to the owner
    async fn send_file(&self, path: &str);

    /// Begin the "composing" indicator loop (idempotent)
    async fn start_typing(&self);

    /// Stop the indicator loop and clear it on the remote side
    async fn stop_typing(&self);
}
