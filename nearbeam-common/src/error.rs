//! Machine-readable error taxonomy for transfer operations
//!
//! Every failure surfaced by a transport or the coordinator carries one of
//! these kinds, allowing consumers to decide whether a retry is meaningful
//! (e.g. a lost connection is retryable, a denied permission is not).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error kinds for discovery, connection, and transfer operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferErrorKind {
    /// The capability gate denied access to the medium
    PermissionDenied,
    /// The requested peer is not in the discovered set
    PeerNotFound,
    /// The medium reported a connection failure
    ConnectionFailed,
    /// An established connection closed before the operation finished
    ConnectionLost,
    /// Local filesystem read or write failed
    FileIo,
    /// A bounded wait elapsed without progress
    Timeout,
    /// The operation is not supported by any usable medium
    Unsupported,
    /// Anything that does not fit the categories above
    Unknown,
}

impl TransferErrorKind {
    /// Convert to the string representation used in serialized state
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PermissionDenied => "permission_denied",
            Self::PeerNotFound => "peer_not_found",
            Self::ConnectionFailed => "connection_failed",
            Self::ConnectionLost => "connection_lost",
            Self::FileIo => "file_io",
            Self::Timeout => "timeout",
            Self::Unsupported => "unsupported",
            Self::Unknown => "unknown",
        }
    }

    /// Parse from the string representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "permission_denied" => Some(Self::PermissionDenied),
            "peer_not_found" => Some(Self::PeerNotFound),
            "connection_failed" => Some(Self::ConnectionFailed),
            "connection_lost" => Some(Self::ConnectionLost),
            "file_io" => Some(Self::FileIo),
            "timeout" => Some(Self::Timeout),
            "unsupported" => Some(Self::Unsupported),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Whether retrying the failed operation can succeed without external
    /// remediation (toggling a setting, granting a permission)
    #[must_use]
    pub fn can_retry(&self) -> bool {
        !matches!(self, Self::PermissionDenied | Self::Unsupported)
    }
}

impl fmt::Display for TransferErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transfer error: a kind from the closed taxonomy, a human-readable
/// message, and an optional underlying cause
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferError {
    kind: TransferErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cause: Option<String>,
}

impl TransferError {
    /// Create an error with the given kind and message
    pub fn new(kind: TransferErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause
    #[must_use]
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::PermissionDenied, message)
    }

    pub fn peer_not_found(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::PeerNotFound, message)
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ConnectionFailed, message)
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::ConnectionLost, message)
    }

    pub fn file_io(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::FileIo, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Timeout, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Unsupported, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransferErrorKind::Unknown, message)
    }

    /// The taxonomy kind
    #[must_use]
    pub fn kind(&self) -> TransferErrorKind {
        self.kind
    }

    /// The human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying cause, when one was recorded
    #[must_use]
    pub fn cause(&self) -> Option<&str> {
        self.cause.as_deref()
    }

    /// Whether retrying can succeed without external remediation
    #[must_use]
    pub fn can_retry(&self) -> bool {
        self.kind.can_retry()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {} ({})", self.kind, self.message, cause),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for TransferError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_str() {
        assert_eq!(
            TransferErrorKind::PermissionDenied.as_str(),
            "permission_denied"
        );
        assert_eq!(TransferErrorKind::ConnectionLost.as_str(), "connection_lost");
        assert_eq!(TransferErrorKind::FileIo.as_str(), "file_io");
        assert_eq!(TransferErrorKind::Unknown.as_str(), "unknown");
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            TransferErrorKind::parse("timeout"),
            Some(TransferErrorKind::Timeout)
        );
        assert_eq!(
            TransferErrorKind::parse("peer_not_found"),
            Some(TransferErrorKind::PeerNotFound)
        );
        assert_eq!(TransferErrorKind::parse("nonsense"), None);
        assert_eq!(TransferErrorKind::parse(""), None);
    }

    #[test]
    fn test_parse_roundtrip() {
        for kind in [
            TransferErrorKind::PermissionDenied,
            TransferErrorKind::PeerNotFound,
            TransferErrorKind::ConnectionFailed,
            TransferErrorKind::ConnectionLost,
            TransferErrorKind::FileIo,
            TransferErrorKind::Timeout,
            TransferErrorKind::Unsupported,
            TransferErrorKind::Unknown,
        ] {
            assert_eq!(TransferErrorKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_can_retry() {
        assert!(!TransferErrorKind::PermissionDenied.can_retry());
        assert!(!TransferErrorKind::Unsupported.can_retry());

        assert!(TransferErrorKind::PeerNotFound.can_retry());
        assert!(TransferErrorKind::ConnectionFailed.can_retry());
        assert!(TransferErrorKind::ConnectionLost.can_retry());
        assert!(TransferErrorKind::FileIo.can_retry());
        assert!(TransferErrorKind::Timeout.can_retry());
        assert!(TransferErrorKind::Unknown.can_retry());
    }

    #[test]
    fn test_display_without_cause() {
        let err = TransferError::connection_failed("peer unreachable");
        assert_eq!(err.to_string(), "connection_failed: peer unreachable");
    }

    #[test]
    fn test_display_with_cause() {
        let err = TransferError::file_io("cannot open destination")
            .with_cause("permission denied (os error 13)");
        assert_eq!(
            err.to_string(),
            "file_io: cannot open destination (permission denied (os error 13))"
        );
    }

    #[test]
    fn test_error_accessors() {
        let err = TransferError::timeout("no inbound connection").with_cause("deadline elapsed");
        assert_eq!(err.kind(), TransferErrorKind::Timeout);
        assert_eq!(err.message(), "no inbound connection");
        assert_eq!(err.cause(), Some("deadline elapsed"));
        assert!(err.can_retry());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let err = TransferError::connection_lost("stream closed mid transfer")
            .with_cause("connection reset by peer");
        let json = serde_json::to_string(&err).expect("serialize");
        let back: TransferError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err, back);
    }

    #[test]
    fn test_serialization_omits_empty_cause() {
        let err = TransferError::unknown("mystery");
        let json = serde_json::to_string(&err).expect("serialize");
        assert!(!json.contains("cause"));
    }
}
