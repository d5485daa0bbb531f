// ABOUTME: Counter names and recording helpers for inbound gating and outbound delivery
// ABOUTME: Uses the metrics facade; nothing is exported unless the binary installs a recorder

use crate::traits::ChannelKind;

pub const INBOUND_DISPATCHED: &str = "clawlink_inbound_dispatched_total";
pub const INBOUND_DISCARDED: &str = "clawlink_inbound_discarded_total";
pub const CHUNKS_SENT: &str = "clawlink_chunks_sent_total";
pub const DELIVERY_FAILURES: &str = "clawlink_delivery_failures_total";

pub fn record_dispatched(channel: ChannelKind) {
    metrics::counter!(INBOUND_DISPATCHED, "channel" => channel.as_str()).increment(1);
}

/// `reason` is a short static label such as "code_mismatch" or "echo"
pub fn record_discarded(channel: ChannelKind, reason: &'static str) {
    metrics::counter!(INBOUND_DISCARDED, "channel" => channel.as_str(), "reason" => reason)
        .increment(1);
}

pub fn record_chunk_sent(channel: ChannelKind) {
    metrics::counter!(CHUNKS_SENT, "channel" => channel.as_str()).increment(1);
}

pub fn record_delivery_failure(channel: ChannelKind) {
    metrics::counter!(DELIVERY_FAILURES, "channel" => channel.as_str()).increment(1);
}
