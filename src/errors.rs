use thiserror::Error;

/// Errors surfaced by the realtime client.
///
/// The socket and dispatch paths never return these to their callers; they are logged
/// where they occur. REST calls, configuration and session start-up do return them.
#[derive(Debug, Error)]
pub enum RealtimeError {
    // ── Configuration ────────────────────────────────────────────────────────
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("No access token available")]
    MissingToken,

    #[error("Failed to read access token: {0}")]
    TokenStore(#[source] std::io::Error),

    // ── WebSocket ────────────────────────────────────────────────────────────
    #[error("WebSocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Frame decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("WebSocket is not connected")]
    NotConnected,

    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    // ── REST ─────────────────────────────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },

}

impl RealtimeError {
    pub fn invalid_url(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RealtimeError::InvalidUrl { url: url.into(), reason: reason.to_string() }
    }

    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            RealtimeError::Transport(_)
                | RealtimeError::NotConnected
                | RealtimeError::ReconnectExhausted { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RealtimeError::Api { status: 404, .. })
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RealtimeError::Api { status: 401 | 403, .. } | RealtimeError::MissingToken)
    }
}

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_api_statuses() {
        let not_found = RealtimeError::Api { status: 404, body: String::new() };
        assert!(not_found.is_not_found());
        assert!(!not_found.is_unauthorized());

        let forbidden = RealtimeError::Api { status: 403, body: "nope".into() };
        assert!(forbidden.is_unauthorized());
        assert_eq!(forbidden.to_string(), "API returned 403: nope");
    }

    #[test]
    fn transport_predicate() {
        assert!(RealtimeError::NotConnected.is_transport());
        assert!(RealtimeError::ReconnectExhausted { attempts: 3 }.is_transport());
        assert!(!RealtimeError::MissingToken.is_transport());

        let dropped = RealtimeError::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed);
        assert!(dropped.is_transport());
        assert_eq!(dropped.to_string(), "WebSocket transport error: Connection closed normally");
    }
}
