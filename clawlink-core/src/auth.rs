// ABOUTME: Per-channel owner authorization: one-time verification code, then a single bound identity
// ABOUTME: Binding is persisted before the gate reports success so confirmations never outrun the store

use crate::error::StoreError;
use crate::identity::IdentityStore;
use crate::metrics;
use crate::operator;
use crate::traits::ChannelKind;
use rand::Rng;
use std::sync::{Arc, Mutex};

/// Reply sent once to the owner right after a successful verification
pub const VERIFICATION_CONFIRMATION: &str =
    "⚡ Verification Successful! I am now your personal agent.";

/// Generate a fresh six-digit verification code
pub fn generate_code() -> String {
    rand::thread_rng().gen_range(100_000..=999_999).to_string()
}

/// How the owning process treats a successful verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateMode {
    /// Keep serving after verification
    #[default]
    Serve,
    /// Confirm, then request shutdown ("stop after auth")
    VerifyOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Unbound channel, text did not match the code
    CodeMismatch,
    /// Bound channel, sender is not the owner
    ForeignSender,
    /// Unbound channel, non-text event
    Unverified,
}

impl DiscardReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            Self::CodeMismatch => "code_mismatch",
            Self::ForeignSender => "foreign_sender",
            Self::Unverified => "unverified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Sender is the owner; hand the content to the orchestrator
    Dispatch,
    /// This message bound the sender; send the confirmation, dispatch nothing
    Verified,
    /// Drop silently
    Discard(DiscardReason),
}

/// State machine `UNAUTHORIZED(code) -> AUTHORIZED(identity)` for one channel.
///
/// The identity lock is held across the store write so two concurrent
/// correct guesses cannot both bind.
pub struct AuthorizationGate {
    channel: ChannelKind,
    mode: GateMode,
    code: String,
    identity: Mutex<Option<String>>,
    store: Arc<dyn IdentityStore>,
}

impl AuthorizationGate {
    /// Load the persisted binding for `channel` and generate a fresh code
    pub fn new(
        channel: ChannelKind,
        store: Arc<dyn IdentityStore>,
        mode: GateMode,
    ) -> Result<Self, StoreError> {
        Self::with_code(channel, store, mode, generate_code())
    }

    /// Same as [`AuthorizationGate::new`] with a caller-chosen code
    pub fn with_code(
        channel: ChannelKind,
        store: Arc<dyn IdentityStore>,
        mode: GateMode,
        code: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let identity = store.load(channel)?;
        if identity.is_some() {
            tracing::debug!(channel = %channel, "Loaded authorized identity");
        }
        Ok(Self {
            channel,
            mode,
            code: code.into(),
            identity: Mutex::new(identity),
            store,
        })
    }

    /// Bind an identity from configuration without persisting it
    pub fn bind_preconfigured(&self, identity: impl Into<String>) {
        if let Ok(mut bound) = self.identity.lock() {
            *bound = Some(identity.into());
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.channel
    }

    pub fn mode(&self) -> GateMode {
        self.mode
    }

    pub fn is_verify_only(&self) -> bool {
        self.mode == GateMode::VerifyOnly
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn identity(&self) -> Option<String> {
        self.identity.lock().ok().and_then(|bound| bound.clone())
    }

    pub fn is_bound(&self) -> bool {
        self.identity().is_some()
    }

    /// Print the code to the operator when the channel still needs verifying
    pub fn announce(&self) {
        if self.is_bound() {
            operator::notice(self.channel, "✅ Authorized owner loaded, listening for messages");
        } else {
            operator::verification_code(self.channel, &self.code);
        }
    }

    /// Gate an inbound text event.
    ///
    /// Errors only when a matching code could not be persisted; the gate
    /// stays unbound in that case.
    pub fn check_text(&self, sender: &str, text: &str) -> Result<GateDecision, StoreError> {
        let mut bound = self.identity.lock().map_err(|_| StoreError::Poisoned)?;

        let decision = match bound.as_deref() {
            Some(owner) if owner == sender => GateDecision::Dispatch,
            Some(_) => GateDecision::Discard(DiscardReason::ForeignSender),
            None if text.trim() == self.code => {
                self.store.save(self.channel, sender)?;
                *bound = Some(sender.to_string());
                operator::notice(self.channel, "✅ Verification successful, owner bound");
                GateDecision::Verified
            }
            None => GateDecision::Discard(DiscardReason::CodeMismatch),
        };

        self.record(decision);
        Ok(decision)
    }

    /// Gate a non-text event (image, file): only the bound owner passes
    pub fn check_sender(&self, sender: &str) -> GateDecision {
        let decision = match self.identity() {
            Some(owner) if owner == sender => GateDecision::Dispatch,
            Some(_) => GateDecision::Discard(DiscardReason::ForeignSender),
            None => GateDecision::Discard(DiscardReason::Unverified),
        };
        self.record(decision);
        decision
    }

    fn record(&self, decision: GateDecision) {
        match decision {
            GateDecision::Dispatch => metrics::record_dispatched(self.channel),
            GateDecision::Verified => {}
            GateDecision::Discard(reason) => {
                tracing::debug!(
                    channel = %self.channel,
                    reason = reason.as_label(),
                    "Discarding inbound event"
                );
                metrics::record_discarded(self.channel, reason.as_label());
            }
        }
    }
}
