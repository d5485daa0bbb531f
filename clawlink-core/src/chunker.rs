// ABOUTME: Splits outbound text into ordered fragments and delivers them sequentially
// ABOUTME: Stops at the first failed fragment; already-sent fragments are never retried

use crate::error::DeliveryError;
use crate::metrics;
use crate::traits::ChannelKind;
use std::future::Future;
use thiserror::Error;

/// Largest fragment any connector sends, in characters
pub const MAX_CHUNK_CHARS: usize = 4000;

/// Split `text` into contiguous pieces of at most `max_chars` characters.
///
/// Splits on character boundaries, never inside a code point. Empty text
/// yields no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<&str> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(max_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(rest.len());
        let (head, tail) = rest.split_at(split);
        chunks.push(head);
        rest = tail;
    }

    chunks
}

#[derive(Debug, Error)]
#[error("delivered {delivered} of {total} chunks: {source}")]
pub struct ChunkDeliveryError {
    pub delivered: usize,
    pub total: usize,
    #[source]
    pub source: DeliveryError,
}

/// Send `text` in [`MAX_CHUNK_CHARS`] pieces through `send_one`, in order.
///
/// Returns how many chunks were delivered.
pub async fn deliver_chunks<F, Fut>(
    channel: ChannelKind,
    text: &str,
    mut send_one: F,
) -> Result<usize, ChunkDeliveryError>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<(), DeliveryError>>,
{
    let chunks = chunk_text(text, MAX_CHUNK_CHARS);
    let total = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        if let Err(source) = send_one(chunk.to_string()).await {
            metrics::record_delivery_failure(channel);
            tracing::warn!(
                channel = %channel,
                chunk = index + 1,
                total,
                error = %source,
                "Chunk delivery failed, aborting remaining chunks"
            );
            return Err(ChunkDeliveryError {
                delivered: index,
                total,
                source,
            });
        }
        metrics::record_chunk_sent(channel);
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", MAX_CHUNK_CHARS).is_empty());
    }

    #[test]
    fn test_chunk_count_is_ceiling() {
        for len in [1usize, 3999, 4000, 4001, 8000, 9000, 12001] {
            let text = "a".repeat(len);
            let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
            assert_eq!(chunks.len(), (len + MAX_CHUNK_CHARS - 1) / MAX_CHUNK_CHARS, "len {}", len);
            assert!(chunks.iter().all(|c| c.chars().count() <= MAX_CHUNK_CHARS));
            assert_eq!(chunks.concat(), text);
        }
    }

    #[test]
    fn test_chunks_count_characters_not_bytes() {
        let text = "é".repeat(4001);
        let chunks = chunk_text(&text, MAX_CHUNK_CHARS);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 4000);
        assert_eq!(chunks[1], "é");
    }

    #[test]
    fn test_mixed_width_text_reassembles() {
        let text = "héllo 🌍 wörld ".repeat(700);
        let chunks = chunk_text(&text, 333);
        assert_eq!(chunks.concat(), text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 333));
    }

    #[tokio::test]
    async fn test_deliver_chunks_in_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let text = format!("{}{}", "a".repeat(4000), "b".repeat(10));
        let log = sent.clone();
        let delivered = deliver_chunks(ChannelKind::Terminal, &text, move |chunk| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(chunk);
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(delivered, 2);
        let sent = sent.lock().unwrap();
        assert_eq!(sent[0], "a".repeat(4000));
        assert_eq!(sent[1], "b".repeat(10));
    }

    #[tokio::test]
    async fn test_deliver_chunks_aborts_on_first_failure() {
        let attempts = Arc::new(Mutex::new(0usize));
        let counter = attempts.clone();
        let text = "x".repeat(12_000);
        let err = deliver_chunks(ChannelKind::WhatsApp, &text, move |_chunk| {
            let counter = counter.clone();
            async move {
                let mut n = counter.lock().unwrap();
                *n += 1;
                if *n == 2 {
                    Err(DeliveryError::Rejected("x".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(*attempts.lock().unwrap(), 2);
        assert_eq!(err.delivered, 1);
        assert_eq!(err.total, 3);
        assert!(matches!(err.source, DeliveryError::Rejected(ref m) if m == "x"));
    }

    #[tokio::test]
    async fn test_deliver_empty_text_sends_nothing() {
        let attempts = Arc::new(Mutex::new(0usize));
        let counter = attempts.clone();
        let delivered = deliver_chunks(ChannelKind::Slack, "", move |_chunk| {
            let counter = counter.clone();
            async move {
                *counter.lock().unwrap() += 1;
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(*attempts.lock().unwrap(), 0);
    }
}
