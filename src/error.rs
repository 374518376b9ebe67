//! Error taxonomy for the conversation engine
//!
//! Cancellation is modelled as an error variant so that transport and engine
//! code can distinguish a user-initiated abort from a genuine failure on the
//! same propagation path. The engine swallows `Cancelled`; everything else
//! surfaces to the caller exactly once.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Transport failed to open or dropped unexpectedly.
    #[error("network error: {0}")]
    Network(String),

    /// User-initiated abort. Expected control flow, never a user-visible failure.
    #[error("stream cancelled")]
    Cancelled,

    /// Backend answered with a non-2xx status.
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },

    /// Malformed frame or response body. Frame-level parse errors are
    /// tolerated by skipping the frame; this variant surfaces only when a
    /// whole response cannot be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}

impl ChatError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ChatError::Cancelled)
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}
