//! Connection State Types
//!
//! The connection-state machine's vocabulary: the set of states a feed
//! connection can be in and the classified failures that move it to
//! `Failed`. Both are plain values; consumers only ever see snapshots.

// =============================================================================
// Error Kind
// =============================================================================

/// Classified failure of the streaming connection.
///
/// Equality is by variant and detail text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// URL is malformed or does not use the `ws`/`wss` scheme.
    #[error("invalid WebSocket URL")]
    InvalidUrl,

    /// Connection could not be established or was lost.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The inbound side errored or the remote dropped the connection.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// An outbound message could not be encoded or failed validation.
    #[error("encoding failed: {0}")]
    EncodingFailed(String),

    /// An inbound frame could not be decoded or failed validation.
    #[error("decoding failed: {0}")]
    DecodingFailed(String),

    /// The connection attempt did not complete in time.
    #[error("connection timed out")]
    Timeout,

    /// The network path is currently unusable.
    #[error("network unavailable")]
    NetworkUnavailable,
}

impl ErrorKind {
    /// Short label for metrics and structured logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::SendFailed(_) => "send_failed",
            Self::ReceiveFailed(_) => "receive_failed",
            Self::EncodingFailed(_) => "encoding_failed",
            Self::DecodingFailed(_) => "decoding_failed",
            Self::Timeout => "timeout",
            Self::NetworkUnavailable => "network_unavailable",
        }
    }

    /// Free-text diagnostic detail, if the variant carries one.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::ConnectionFailed(detail)
            | Self::SendFailed(detail)
            | Self::ReceiveFailed(detail)
            | Self::EncodingFailed(detail)
            | Self::DecodingFailed(detail) => Some(detail),
            Self::InvalidUrl | Self::Timeout | Self::NetworkUnavailable => None,
        }
    }
}

// =============================================================================
// URL Validation
// =============================================================================

/// Parse and validate a feed endpoint.
///
/// Only `ws` and `wss` URLs with a host are accepted.
///
/// # Errors
///
/// Returns `ErrorKind::InvalidUrl` for anything else.
pub fn validate_url(raw: &str) -> Result<url::Url, ErrorKind> {
    let parsed = url::Url::parse(raw).map_err(|_| ErrorKind::InvalidUrl)?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some_and(|host| !host.is_empty()) => Ok(parsed),
        _ => Err(ErrorKind::InvalidUrl),
    }
}

// =============================================================================
// Connection State
// =============================================================================

/// State of the single upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection and nothing scheduled.
    #[default]
    Disconnected,
    /// An open attempt is in flight.
    Connecting,
    /// The transport is open and writable.
    Connected,
    /// A scheduled reconnection is about to start a new attempt.
    Reconnecting,
    /// The last attempt or connection failed.
    Failed(ErrorKind),
}

impl ConnectionState {
    /// Check if the connection is usable.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if this is a failure state.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// The failure reason, if failed.
    #[must_use]
    pub const fn error(&self) -> Option<&ErrorKind> {
        match self {
            Self::Failed(kind) => Some(kind),
            _ => None,
        }
    }

    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed ({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_equality_includes_detail() {
        assert_eq!(
            ErrorKind::SendFailed("a".to_string()),
            ErrorKind::SendFailed("a".to_string())
        );
        assert_ne!(
            ErrorKind::SendFailed("a".to_string()),
            ErrorKind::SendFailed("b".to_string())
        );
        assert_ne!(
            ErrorKind::SendFailed("a".to_string()),
            ErrorKind::ReceiveFailed("a".to_string())
        );
        assert_eq!(ErrorKind::Timeout, ErrorKind::Timeout);
    }

    #[test]
    fn error_detail() {
        assert_eq!(
            ErrorKind::DecodingFailed("bad json".to_string()).detail(),
            Some("bad json")
        );
        assert_eq!(ErrorKind::InvalidUrl.detail(), None);
        assert_eq!(ErrorKind::NetworkUnavailable.detail(), None);
    }

    #[test]
    fn error_display() {
        assert_eq!(ErrorKind::Timeout.to_string(), "connection timed out");
        assert_eq!(
            ErrorKind::ConnectionFailed("refused".to_string()).to_string(),
            "connection failed: refused"
        );
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("wss://ws.postman-echo.com/raw").is_ok());
        assert!(validate_url("ws://127.0.0.1:9001").is_ok());
        assert_eq!(validate_url("https://example.com"), Err(ErrorKind::InvalidUrl));
        assert_eq!(validate_url("not a url"), Err(ErrorKind::InvalidUrl));
        assert_eq!(validate_url(""), Err(ErrorKind::InvalidUrl));
        assert_eq!(validate_url("ftp://example.com"), Err(ErrorKind::InvalidUrl));
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn failed_state_carries_error() {
        let state = ConnectionState::Failed(ErrorKind::Timeout);
        assert!(state.is_failed());
        assert!(!state.is_connected());
        assert_eq!(state.error(), Some(&ErrorKind::Timeout));
        assert_eq!(state.to_string(), "failed (connection timed out)");
    }

    #[test]
    fn state_names() {
        assert_eq!(ConnectionState::Connecting.as_str(), "connecting");
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
        assert!(ConnectionState::Connected.is_connected());
        assert_eq!(ConnectionState::Connected.error(), None);
    }
}
