//! Shared data model for discovery and transfer
//!
//! These types cross every layer boundary: transports produce `Peer`s, the
//! coordinator hands `TransferableFile`s to the transfer engine, and the
//! presentation layer reads both out of the published state.

use std::path::PathBuf;

use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::sanitize::sanitize_file_name;

// =============================================================================
// Transport Kind
// =============================================================================

/// The physical medium a transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Short-range paired radio link (low throughput)
    ShortRangeRadio,
    /// Local wireless group network (high throughput)
    LocalWirelessGroup,
}

impl TransportKind {
    /// Stable string label for serialized state and diagnostics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ShortRangeRadio => "short_range_radio",
            Self::LocalWirelessGroup => "local_wireless_group",
        }
    }

    /// Media in the order the auto strategy tries them: the
    /// higher-throughput medium first
    #[must_use]
    pub fn auto_preference() -> [TransportKind; 2] {
        [Self::LocalWirelessGroup, Self::ShortRangeRadio]
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Transport Selection
// =============================================================================

/// How the coordinator picks a transport at discovery start
///
/// `Auto` is a selection policy, not a medium; keeping it out of
/// [`TransportKind`] means a resolved [`Peer`] can never carry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportSelection {
    /// Prefer the best medium that is available, enabled, and permitted
    Auto,
    /// Use exactly this medium, with no fallback
    Only(TransportKind),
}

// =============================================================================
// Peer
// =============================================================================

/// A discovered device willing to exchange files
///
/// `identity` is a transport-scoped stable key (hardware-address shaped);
/// de-duplication in the discovered set is by identity alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Transport-scoped unique key, stable for the discovery session
    pub identity: String,
    /// Human-readable device name
    pub display_name: String,
    /// The medium this peer was discovered on
    pub medium: TransportKind,
    /// Whether a connection to this peer is currently established
    pub connected: bool,
}

impl Peer {
    /// Create a freshly discovered (not yet connected) peer
    pub fn new(
        identity: impl Into<String>,
        display_name: impl Into<String>,
        medium: TransportKind,
    ) -> Self {
        Self {
            identity: identity.into(),
            display_name: display_name.into(),
            medium,
            connected: false,
        }
    }

    /// The same peer marked as connected
    #[must_use]
    pub fn connected(mut self) -> Self {
        self.connected = true;
        self
    }

    /// Generate a stable hardware-address-shaped identity for a local
    /// transport instance
    #[must_use]
    pub fn random_identity() -> String {
        let mut bytes = [0u8; 6];
        rand::rng().fill(&mut bytes[..]);
        hex::encode(bytes)
    }
}

// =============================================================================
// Transferable File
// =============================================================================

/// A local file resolved for sending, or a file that arrived from a peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferableFile {
    /// Opaque resource handle (local filesystem path)
    pub path: PathBuf,
    /// Display name as chosen by the user or reported by the sender
    pub name: String,
    /// Exact payload size in bytes
    pub size_bytes: u64,
    /// MIME type, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl TransferableFile {
    /// The sanitized form of `name`, safe for use as a filesystem name
    ///
    /// Derived on demand so it can never diverge from `name`.
    #[must_use]
    pub fn safe_name(&self) -> String {
        sanitize_file_name(&self.name)
    }
}
