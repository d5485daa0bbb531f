// ABOUTME: Test doubles shared by the workspace: a recording inbound handler and presence sink
// ABOUTME: Compiled into the library so integration tests in other crates can reuse them

use crate::presence::{PresenceSink, PresenceState};
use crate::traits::{InboundContent, InboundHandler};
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

/// Collects everything a connector dispatches
#[derive(Default)]
pub struct RecordingHandler {
    received: Mutex<Vec<InboundContent>>,
    notify: Notify,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<InboundContent> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.received.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` items arrived; false on timeout
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if self.len() >= count {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

#[async_trait]
impl InboundHandler for RecordingHandler {
    async fn handle(&self, content: InboundContent) {
        if let Ok(mut received) = self.received.lock() {
            received.push(content);
        }
        self.notify.notify_waiters();
    }
}

/// Records every presence announcement in order
#[derive(Default)]
pub struct RecordingPresenceSink {
    states: Mutex<Vec<PresenceState>>,
}

impl RecordingPresenceSink {
    pub fn states(&self) -> Vec<PresenceState> {
        self.states.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn count(&self, state: PresenceState) -> usize {
        self.states().into_iter().filter(|s| *s == state).count()
    }
}

#[async_trait]
impl PresenceSink for RecordingPresenceSink {
    async fn announce(&self, state: PresenceState) {
        if let Ok(mut states) = self.states.lock() {
            states.push(state);
        }
    }
}
