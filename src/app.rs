// ABOUTME: Application entry points behind the CLI: serve a channel, verify an owner, reset identities
// ABOUTME: Wires config, the SQLite identity store, the connector factory and the turn runner together

use anyhow::{Context, Result};
use clawlink_core::config::Config;
use clawlink_core::{
    operator, ChannelConnector, ChannelKind, GateMode, IdentityStore, ListenExit,
    SqliteIdentityStore,
};
use std::sync::Arc;

use crate::connectors::build_connector;
use crate::turn::{Agent, TurnRunner};

pub fn open_identity_store(config: &Config) -> Result<Arc<SqliteIdentityStore>> {
    let data_dir = config.data_dir();
    let store = SqliteIdentityStore::new(&data_dir)
        .with_context(|| format!("Failed to open identity store in {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

/// Build the connector for `channel` and listen until it exits.
///
/// Ctrl-C raises the connector's shutdown request so `listen` can unwind.
pub async fn run_channel(
    config: &Config,
    channel: ChannelKind,
    mode: GateMode,
    agent: Arc<dyn Agent>,
) -> Result<ListenExit> {
    let store = open_identity_store(config)?;
    let connector = Arc::new(build_connector(config, channel, mode, store)?);

    let shutdown = connector.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            shutdown.request();
        }
    });

    let runner = Arc::new(TurnRunner::new(connector.clone(), agent));
    tracing::info!(channel = %channel, mode = ?mode, "Connector starting");

    let exit = connector.listen(runner).await?;
    tracing::info!(channel = %channel, exit = ?exit, "Connector stopped");
    Ok(exit)
}

/// Forget the bound owner of `channel`; the next start asks for a new code
pub fn reset_identity(store: &dyn IdentityStore, channel: ChannelKind) -> Result<()> {
    let previous = store
        .load(channel)
        .with_context(|| format!("Failed to read identity for {}", channel))?;
    store
        .clear(channel)
        .with_context(|| format!("Failed to reset identity for {}", channel))?;

    match previous {
        Some(owner) => operator::notice(channel, &format!("Authorized identity {} removed", owner)),
        None => operator::notice(channel, "No authorized identity was bound"),
    }
    Ok(())
}
