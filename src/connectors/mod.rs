// ABOUTME: Concrete chat connectors and the variant enum the binary drives
// ABOUTME: Connector dispatches the ChannelConnector contract by matching on the compiled variant

pub mod factory;
#[cfg(feature = "matrix")]
pub mod matrix;
#[cfg(feature = "slack")]
pub mod slack;
#[cfg(feature = "telegram")]
pub mod telegram;
pub mod terminal;

pub use factory::build_connector;
#[cfg(feature = "matrix")]
pub use matrix::MatrixConnector;
#[cfg(feature = "slack")]
pub use slack::SlackConnector;
#[cfg(feature = "telegram")]
pub use telegram::TelegramConnector;
pub use terminal::TerminalConnector;

use anyhow::Result;
use async_trait::async_trait;
use clawlink_bridge::BridgeProcessManager;
use clawlink_core::{ChannelConnector, ChannelKind, InboundHandler, ListenExit, ShutdownRequest};
use std::sync::Arc;

/// One connector of any compiled kind
pub enum Connector {
    Terminal(TerminalConnector),
    #[cfg(feature = "telegram")]
    Telegram(TelegramConnector),
    #[cfg(feature = "slack")]
    Slack(SlackConnector),
    #[cfg(feature = "matrix")]
    Matrix(MatrixConnector),
    WhatsApp(BridgeProcessManager),
}

impl Connector {
    fn inner(&self) -> &dyn ChannelConnector {
        match self {
            Self::Terminal(c) => c,
            #[cfg(feature = "telegram")]
            Self::Telegram(c) => c,
            #[cfg(feature = "slack")]
            Self::Slack(c) => c,
            #[cfg(feature = "matrix")]
            Self::Matrix(c) => c,
            Self::WhatsApp(c) => c,
        }
    }

    /// Handle that ends this connector's `listen` when requested
    pub fn shutdown_handle(&self) -> ShutdownRequest {
        match self {
            Self::Terminal(c) => c.shutdown_handle(),
            #[cfg(feature = "telegram")]
            Self::Telegram(c) => c.shutdown_handle(),
            #[cfg(feature = "slack")]
            Self::Slack(c) => c.shutdown_handle(),
            #[cfg(feature = "matrix")]
            Self::Matrix(c) => c.shutdown_handle(),
            Self::WhatsApp(c) => c.shutdown_handle(),
        }
    }
}

#[async_trait]
impl ChannelConnector for Connector {
    fn channel(&self) -> ChannelKind {
        self.inner().channel()
    }

    async fn listen(&self, handler: Arc<dyn InboundHandler>) -> Result<ListenExit> {
        self.inner().listen(handler).await
    }

    async fn send(&self, text: &str) {
        self.inner().send(text).await
    }

    async fn send_file(&self, path: &str) {
        self.inner().send_file(path).await
    }

    async fn start_typing(&self) {
        self.inner().start_typing().await
    }

    async fn stop_typing(&self) {
        self.inner().stop_typing().await
    }
}
