// ── Core error types ──
//
// Errors surfaced by buson-core. None of them escape the link loop:
// the loop turns them into connection-state transitions and log lines.
// They are returned from the few synchronous entry points (`start`,
// config validation) and carried in `LinkStatus::last_error`.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to dispatch server: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Device link lost: {reason}")]
    LinkLost { reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Terminal is already running")]
    AlreadyRunning,

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Configuration problems park the link instead of backing off.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<buson_api::Error> for CoreError {
    fn from(err: buson_api::Error) -> Self {
        match err {
            buson_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            e @ (buson_api::Error::WebSocketConnect(_) | buson_api::Error::Timeout { .. }) => {
                CoreError::ConnectionFailed {
                    reason: e.to_string(),
                }
            }
            e @ (buson_api::Error::WebSocketClosed { .. }
            | buson_api::Error::Send(_)
            | buson_api::Error::Receive(_)) => CoreError::LinkLost {
                reason: e.to_string(),
            },
            buson_api::Error::Serialization(e) => {
                CoreError::Internal(format!("Serialization error: {e}"))
            }
        }
    }
}
