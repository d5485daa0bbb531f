// ABOUTME: Operator side-channel: notices meant for the person running the process
// ABOUTME: Printed to stdout and mirrored to tracing so log files keep the same record

use crate::traits::ChannelKind;

/// Print a notice to the operator console and the log
pub fn notice(channel: ChannelKind, message: &str) {
    println!("[{}] {}", channel, message);
    tracing::info!(channel = %channel, "{}", message);
}

/// Print a delivery or transport failure
pub fn failure(channel: ChannelKind, message: &str) {
    println!("[{}] ❌ {}", channel, message);
    tracing::error!(channel = %channel, "{}", message);
}

/// Announce the one-time verification code for an unbound channel
pub fn verification_code(channel: ChannelKind, code: &str) {
    println!();
    println!("[{}] 🔐 Verification required", channel);
    println!("[{}] Send this code to the bot from the account you want to authorize: {}", channel, code);
    println!();
    tracing::info!(channel = %channel, "Waiting for verification code from owner");
}

/// A line the bridge helper wrote that is not a protocol event
pub fn helper_diagnostic(line: &str) {
    println!("{}", line);
    tracing::debug!(channel = %ChannelKind::WhatsApp, line = %line, "Helper output");
}
