// ABOUTME: Typed errors for outbound delivery and identity persistence
// ABOUTME: Contained inside connectors; the orchestrator only ever sees "reply not delivered"

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why an outbound message or file did not reach the owner
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("delivery timed out after {0:?} waiting for acknowledgement")]
    Timeout(Duration),

    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("another send is already waiting for its acknowledgement")]
    SendInFlight,

    #[error("no recipient known yet")]
    NoRecipient,

    #[error("channel is not connected")]
    NotConnected,

    #[error("helper exited before acknowledging")]
    HelperExited,

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    /// Wrap any displayable transport failure (HTTP client, SDK, ...)
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Identity store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("identity database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("identity store lock poisoned")]
    Poisoned,

    #[error("failed to prepare identity store: {0}")]
    Io(#[from] std::io::Error),
}
