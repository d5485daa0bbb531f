// ABOUTME: Cooperative shutdown request shared between a connector and its owning process
// ABOUTME: Replaces hard process exits: whoever holds a clone can ask listen() to return

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ShutdownRequest {
    token: CancellationToken,
}

impl ShutdownRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        if !self.token.is_cancelled() {
            tracing::debug!("Shutdown requested");
        }
        self.token.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once [`ShutdownRequest::request`] has been called on any clone
    pub async fn requested(&self) {
        self.token.cancelled().await
    }
}
