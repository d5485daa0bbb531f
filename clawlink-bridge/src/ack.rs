// ABOUTME: Single-slot acknowledgement correlation for commands sent to the helper
// ABOUTME: The helper acks in order with no ids, so at most one send may be waiting at a time

use clawlink_core::DeliveryError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;

/// Helper's verdict: `Err` carries its error text
pub type AckResult = Result<(), String>;

#[derive(Debug, Default)]
pub struct PendingAck {
    slot: Mutex<Option<oneshot::Sender<AckResult>>>,
}

impl PendingAck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the slot before writing the command so a fast ack cannot be missed
    pub fn arm(&self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slot) = self.slot.lock() {
            if slot.replace(tx).is_some() {
                tracing::debug!("Replacing stale pending ack");
            }
        }
        rx
    }

    /// Deliver an ack; false when nothing was waiting
    pub fn resolve(&self, result: AckResult) -> bool {
        let pending = self.slot.lock().ok().and_then(|mut slot| slot.take());
        match pending {
            Some(tx) => tx.send(result).is_ok(),
            None => {
                tracing::debug!("Ack received with no pending send, ignoring");
                false
            }
        }
    }

    /// Drop any waiter; it observes [`DeliveryError::HelperExited`]
    pub fn abandon(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.take();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Wait for the armed ack up to `timeout`.
    ///
    /// On timeout the slot is cleared so a late ack is ignored rather than
    /// credited to the next send.
    pub async fn wait(
        &self,
        rx: oneshot::Receiver<AckResult>,
        timeout: Duration,
    ) -> Result<(), DeliveryError> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(DeliveryError::Rejected(message)),
            Ok(Err(_)) => Err(DeliveryError::HelperExited),
            Err(_) => {
                self.abandon();
                Err(DeliveryError::Timeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_positive_ack() {
        let ack = PendingAck::new();
        let rx = ack.arm();
        assert!(ack.resolve(Ok(())));
        assert!(ack.wait(rx, Duration::from_secs(60)).await.is_ok());
    }

    #[tokio::test]
    async fn test_negative_ack_carries_text() {
        let ack = PendingAck::new();
        let rx = ack.arm();
        ack.resolve(Err("x".to_string()));
        let err = ack.wait(rx, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Rejected(ref m) if m == "x"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_times_out_and_clears_slot() {
        let ack = PendingAck::new();
        let rx = ack.arm();
        let err = ack.wait(rx, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::Timeout(d) if d == Duration::from_secs(60)));
        assert!(!ack.is_armed());
        // A late ack finds nobody waiting
        assert!(!ack.resolve(Ok(())));
    }

    #[tokio::test]
    async fn test_abandon_reports_helper_exit() {
        let ack = PendingAck::new();
        let rx = ack.arm();
        ack.abandon();
        let err = ack.wait(rx, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, DeliveryError::HelperExited));
    }

    #[test]
    fn test_unsolicited_ack_is_ignored() {
        let ack = PendingAck::new();
        assert!(!ack.resolve(Ok(())));
    }
}
