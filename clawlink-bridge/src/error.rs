// ABOUTME: Fatal bridge setup errors: missing helper runtime or helper dependencies
// ABOUTME: Either one ends the channel's listen() with an error the binary reports

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("helper runtime unavailable: {0}")]
    HelperUnavailable(String),

    #[error("helper dependencies missing ({}): {reason}", .missing.join(", "))]
    DependencyMissing { missing: Vec<String>, reason: String },

    #[error("helper process I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
