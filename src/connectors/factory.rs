// ABOUTME: Connector factory: builds the configured channel's connector and its authorization gate
// ABOUTME: Platforms not compiled into this binary fail with a hint about the cargo feature

use anyhow::{Context, Result};
use clawlink_bridge::{BridgeProcessManager, BridgeSettings};
use clawlink_core::config::Config;
use clawlink_core::{AuthorizationGate, ChannelKind, GateMode, IdentityStore};
use std::sync::Arc;

use super::{Connector, TerminalConnector};

/// Create the connector for `channel` from config.
///
/// Validates the channel's config section first. The terminal connector
/// reads the process's stdin and has no authorization gate.
pub fn build_connector(
    config: &Config,
    channel: ChannelKind,
    mode: GateMode,
    store: Arc<dyn IdentityStore>,
) -> Result<Connector> {
    config.validate_for(channel)?;

    let gate = || -> Result<AuthorizationGate> {
        AuthorizationGate::new(channel, store.clone(), mode)
            .with_context(|| format!("Failed to load authorized identity for {}", channel))
    };

    match channel {
        ChannelKind::Terminal => {
            if mode == GateMode::VerifyOnly {
                anyhow::bail!("The terminal connector has no verification step");
            }
            Ok(Connector::Terminal(TerminalConnector::stdio()))
        }
        #[cfg(feature = "telegram")]
        ChannelKind::Telegram => {
            let telegram = config
                .telegram
                .as_ref()
                .context("Telegram not configured")?;
            Ok(Connector::Telegram(super::TelegramConnector::new(telegram, gate()?)?))
        }
        #[cfg(not(feature = "telegram"))]
        ChannelKind::Telegram => {
            anyhow::bail!("Telegram support not compiled. Build with --features telegram")
        }
        #[cfg(feature = "slack")]
        ChannelKind::Slack => {
            let slack = config.slack.as_ref().context("Slack not configured")?;
            Ok(Connector::Slack(super::SlackConnector::new(slack, gate()?)?))
        }
        #[cfg(not(feature = "slack"))]
        ChannelKind::Slack => {
            anyhow::bail!("Slack support not compiled. Build with --features slack")
        }
        #[cfg(feature = "matrix")]
        ChannelKind::Matrix => {
            let matrix = config.matrix.as_ref().context("Matrix not configured")?;
            let store_dir = config.matrix_store_dir();
            Ok(Connector::Matrix(super::MatrixConnector::new(
                matrix.clone(),
                store_dir,
                gate()?,
            )))
        }
        #[cfg(not(feature = "matrix"))]
        ChannelKind::Matrix => {
            anyhow::bail!("Matrix support not compiled. Build with --features matrix")
        }
        ChannelKind::WhatsApp => {
            let whatsapp = config.whatsapp.as_ref().context("WhatsApp not configured")?;
            Ok(Connector::WhatsApp(BridgeProcessManager::new(
                BridgeSettings::from(whatsapp),
                gate()?,
            )))
        }
    }
}
