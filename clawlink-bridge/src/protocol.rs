// ABOUTME: Line protocol spoken with the helper: JSON_EVENT-prefixed events in, VERB:json commands out
// ABOUTME: Anything the helper prints without the event marker is a diagnostic for the operator

use clawlink_core::presence::PresenceState;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// Prefix marking a protocol event on the helper's stdout
pub const EVENT_MARKER: &str = "JSON_EVENT:";

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed helper event: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn default_filename() -> String {
    "file".to_string()
}

fn default_ack_error() -> String {
    "unknown error".to_string()
}

/// Events the helper reports, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Message {
        from: String,
        #[serde(default)]
        text: String,
        /// Sent from the linked account itself (owner chatting with themselves, or our own echo)
        #[serde(default, rename = "fromMe")]
        from_me: bool,
    },
    Image {
        from: String,
        base64: String,
        #[serde(default)]
        caption: String,
    },
    File {
        from: String,
        base64: String,
        #[serde(default = "default_filename")]
        filename: String,
        #[serde(default)]
        caption: String,
    },
    Connected,
    MsgSent,
    FileSent,
    MsgError {
        #[serde(default = "default_ack_error")]
        error: String,
    },
    FileError {
        #[serde(default = "default_ack_error")]
        error: String,
    },
    /// Event types this manager does not act on
    #[serde(other)]
    Unknown,
}

/// One line of helper output, classified
#[derive(Debug)]
pub enum HelperLine<'a> {
    Diagnostic(&'a str),
    Event(Result<BridgeEvent, ProtocolError>),
}

pub fn parse_line(line: &str) -> HelperLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.strip_prefix(EVENT_MARKER) {
        Some(payload) => HelperLine::Event(serde_json::from_str(payload).map_err(Into::into)),
        None => HelperLine::Diagnostic(line),
    }
}

/// Commands written to the helper's stdin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Send { to: String, text: String },
    SendFile { to: String, path: String },
    Typing { to: String, action: PresenceState },
}

impl BridgeCommand {
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Send { .. } => "SEND",
            Self::SendFile { .. } => "SEND_FILE",
            Self::Typing { .. } => "TYPING",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::Send { to, text } => json!({ "to": to, "text": text }),
            Self::SendFile { to, path } => json!({ "to": to, "path": path }),
            Self::Typing { to, action } => json!({ "to": to, "action": action.as_str() }),
        }
    }

    /// `VERB:{json}\n`; serde_json escapes embedded newlines so one command is one line
    pub fn encode(&self) -> String {
        format!("{}:{}\n", self.verb(), self.payload())
    }
}
