//! Session state machine
//!
//! The coordinator is the sole writer of [`TransferState`]; consumers
//! observe it through a watch channel with latest-state-wins semantics.
//! Transition legality is encoded here so every publish site goes through
//! one exhaustively matched table.

use serde::{Deserialize, Serialize};

use nearbeam_common::{Peer, TransferError};

/// The authoritative state of one discovery-through-transfer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransferState {
    /// No session; initial state and the result of a full teardown
    Idle,
    /// Peer discovery is running on the selected transport
    Discovering,
    /// The aggregated device list, re-emitted on every change
    DevicesFound { peers: Vec<Peer> },
    /// Connection to the selected peer is being established
    Connecting { peer: Peer },
    /// A connection is established and idle
    Connected { peer: Peer },
    /// Bytes are moving; counters are cumulative across a send batch
    Transferring {
        percent: u8,
        bytes_done: u64,
        bytes_total: u64,
        bytes_per_second: u64,
        eta_millis: u64,
        current_file: String,
    },
    /// The batch finished; the session has been cleaned up
    Completed {
        file_count: u64,
        bytes_total: u64,
        duration_millis: u64,
    },
    /// A session-breaking error; `can_retry` is false when external
    /// remediation is required first
    Failed {
        error: TransferError,
        can_retry: bool,
    },
    /// The consumer cancelled; never retried automatically
    Cancelled,
    /// Transfer suspended at a chunk boundary, resumable
    Paused { percent: u8 },
}

impl TransferState {
    /// Short name for diagnostics
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Discovering => "discovering",
            Self::DevicesFound { .. } => "devices_found",
            Self::Connecting { .. } => "connecting",
            Self::Connected { .. } => "connected",
            Self::Transferring { .. } => "transferring",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::Paused { .. } => "paused",
        }
    }

    /// Terminal states are left only by starting a new discovery
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal transition
    ///
    /// `Idle -> Connecting` covers inbound sessions, where a peer arrives
    /// through the bounded accept wait instead of discovery.
    #[must_use]
    pub fn can_transition_to(&self, next: &TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Idle, Discovering | Connecting { .. } | Failed { .. } | Cancelled | Idle) => true,
            (
                Discovering,
                Discovering | DevicesFound { .. } | Failed { .. } | Cancelled | Idle,
            ) => true,
            (
                DevicesFound { .. },
                DevicesFound { .. }
                | Connecting { .. }
                | Discovering
                | Failed { .. }
                | Cancelled
                | Idle,
            ) => true,
            (Connecting { .. }, Connected { .. } | Failed { .. } | Cancelled) => true,
            (
                Connected { .. },
                Transferring { .. } | Discovering | Failed { .. } | Cancelled | Idle,
            ) => true,
            (
                Transferring { .. },
                Transferring { .. } | Paused { .. } | Completed { .. } | Failed { .. } | Cancelled,
            ) => true,
            (Paused { .. }, Transferring { .. } | Failed { .. } | Cancelled) => true,
            (Completed { .. } | Failed { .. } | Cancelled, Discovering) => true,
            (Cancelled, Cancelled) => true,
            _ => false,
        }
    }
}
