//! Discovery announcement datagrams
//!
//! A beacon is the small JSON document a device broadcasts while it is
//! willing to accept a connection: who it is, what to call it, and where its
//! transfer listener lives. Undecodable datagrams are dropped by listeners,
//! never surfaced as errors.

use serde::{Deserialize, Serialize};

/// One discovery announcement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beacon {
    /// Stable transport-scoped identity of the announcing device
    pub identity: String,
    /// Human-readable device name
    pub display_name: String,
    /// TCP port the device accepts transfer connections on
    pub tcp_port: u16,
}

impl Beacon {
    /// Create a beacon
    pub fn new(identity: impl Into<String>, display_name: impl Into<String>, tcp_port: u16) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            tcp_port,
        }
    }

    /// Encode to the datagram body
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("beacon serialization cannot fail")
    }

    /// Decode a datagram body; `None` for anything malformed
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let beacon = Beacon::new("aa11bb22cc33", "Living room TV", 40123);
        let decoded = Beacon::decode(&beacon.encode()).expect("decode");
        assert_eq!(decoded, beacon);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Beacon::decode(b"").is_none());
        assert!(Beacon::decode(b"not json").is_none());
        assert!(Beacon::decode(&[0xFF, 0x00, 0x12]).is_none());
    }

    #[test]
    fn test_decode_rejects_missing_fields() {
        assert!(Beacon::decode(br#"{"identity":"aa"}"#).is_none());
        assert!(Beacon::decode(br#"{"display_name":"x","tcp_port":1}"#).is_none());
    }

    #[test]
    fn test_decode_tolerates_unknown_fields() {
        let decoded = Beacon::decode(
            br#"{"identity":"aa","display_name":"x","tcp_port":9,"future":"field"}"#,
        )
        .expect("decode");
        assert_eq!(decoded.tcp_port, 9);
    }
}
