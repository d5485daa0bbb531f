// ABOUTME: Runtime reply routing for a connector: who the next outbound message goes to
// ABOUTME: The last authorized sender wins, falling back to the bound identity

use crate::auth::AuthorizationGate;
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct ReplyTarget {
    active: RwLock<Option<String>>,
}

impl ReplyTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember where the owner last wrote from
    pub fn set(&self, target: impl Into<String>) {
        if let Ok(mut active) = self.active.write() {
            *active = Some(target.into());
        }
    }

    pub fn get(&self) -> Option<String> {
        self.active.read().ok().and_then(|a| a.clone())
    }

    /// Active target, else the gate's bound identity
    pub fn resolve(&self, gate: &AuthorizationGate) -> Option<String> {
        self.get().or_else(|| gate.identity())
    }
}
