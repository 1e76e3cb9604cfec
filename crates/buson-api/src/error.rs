use thiserror::Error;

/// Top-level error type for the `buson-api` crate.
///
/// Covers every failure mode of the device link: URL construction,
/// WebSocket handshake, framing and serialization. `buson-core` maps
/// these into link-level diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Addressing ──────────────────────────────────────────────────
    /// URL parsing error (bad host or port in the device config).
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection or upgrade failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// Handshake did not complete within the connect timeout.
    #[error("WebSocket connect timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Server closed the connection, or the stream ended.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Writing a frame failed.
    #[error("WebSocket send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("WebSocket receive failed: {0}")]
    Receive(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON serialization of an outbound message failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if reconnecting could plausibly resolve this error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_)
                | Self::Timeout { .. }
                | Self::WebSocketClosed { .. }
                | Self::Send(_)
                | Self::Receive(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::Timeout { timeout_ms: 3000 }.is_transient());
        assert!(
            Error::WebSocketClosed {
                code: 1006,
                reason: "stream ended".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn bad_url_is_not_transient() {
        let err = Error::from(url::Url::parse("ws://[bad").unwrap_err());
        assert!(!err.is_transient());
    }
}
