// ABOUTME: Bridge process manager: a chat connector whose network lives in a spawned helper
// ABOUTME: Line-framed events on the helper's stdout, VERB:json commands on its stdin

pub mod ack;
pub mod error;
pub mod manager;
pub mod preflight;
pub mod process;
pub mod protocol;

pub use ack::PendingAck;
pub use error::BridgeError;
pub use manager::{BridgeProcessManager, BridgeSettings, FILE_ACK_TIMEOUT, TEXT_ACK_TIMEOUT};
pub use protocol::{parse_line, BridgeCommand, BridgeEvent, HelperLine, ProtocolError, EVENT_MARKER};
