// ABOUTME: Background "composing" indicator loop with a single-instance guard
// ABOUTME: Stop cancels the loop, waits a bounded grace period, then announces Paused once

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long `stop` waits for the loop to wind down before aborting it
pub const STOP_GRACE: Duration = Duration::from_millis(200);

pub const TERMINAL_INTERVAL: Duration = Duration::from_millis(150);
pub const TELEGRAM_INTERVAL: Duration = Duration::from_secs(1);
pub const BRIDGE_INTERVAL: Duration = Duration::from_secs(1);
pub const MATRIX_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Composing,
    Paused,
}

impl PresenceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Composing => "composing",
            Self::Paused => "paused",
        }
    }
}

/// Where a connector renders its typing indicator
#[async_trait]
pub trait PresenceSink: Send + Sync {
    async fn announce(&self, state: PresenceState);
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct PresenceAnnouncer {
    sink: Arc<dyn PresenceSink>,
    interval: Duration,
    running: Mutex<Option<RunningLoop>>,
}

impl PresenceAnnouncer {
    pub fn new(sink: Arc<dyn PresenceSink>, interval: Duration) -> Self {
        Self {
            sink,
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the loop unless one is already alive
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(active) = running.as_ref() {
            if !active.handle.is_finished() {
                return;
            }
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sink = self.sink.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            while !token.is_cancelled() {
                sink.announce(PresenceState::Composing).await;
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        *running = Some(RunningLoop { cancel, handle });
    }

    pub async fn is_active(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Cancel the loop, wait for it, then announce `Paused` exactly once
    pub async fn stop(&self) {
        let active = self.running.lock().await.take();

        if let Some(RunningLoop { cancel, mut handle }) = active {
            cancel.cancel();
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::debug!("Presence loop did not finish within grace period, aborting");
                handle.abort();
            }
        }

        self.sink.announce(PresenceState::Paused).await;
    }
}

impl Drop for PresenceAnnouncer {
    fn drop(&mut self) {
        if let Ok(mut running) = self.running.try_lock() {
            if let Some(active) = running.take() {
                active.cancel.cancel();
                active.handle.abort();
            }
        }
    }
}
