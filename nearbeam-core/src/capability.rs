//! Permission gate consulted before any hardware-facing call
//!
//! Permission acquisition itself (runtime prompts, settings screens) lives
//! outside this crate; transports and the coordinator only ask whether the
//! required permissions are currently held.

use nearbeam_common::TransportKind;

/// Answers whether the process holds the permissions a medium requires
pub trait CapabilityGate: Send + Sync {
    /// True when discovery and connection on `medium` may be attempted
    fn has_required_permissions(&self, medium: TransportKind) -> bool;
}

/// A fixed allow/deny table, one flag per medium
#[derive(Debug, Clone, Copy)]
pub struct StaticGate {
    radio: bool,
    group: bool,
}

impl StaticGate {
    /// Gate with explicit per-medium decisions
    #[must_use]
    pub fn new(radio: bool, group: bool) -> Self {
        Self { radio, group }
    }

    /// Gate that permits every medium
    #[must_use]
    pub fn allow_all() -> Self {
        Self::new(true, true)
    }

    /// Gate that denies every medium
    #[must_use]
    pub fn deny_all() -> Self {
        Self::new(false, false)
    }
}

impl CapabilityGate for StaticGate {
    fn has_required_permissions(&self, medium: TransportKind) -> bool {
        match medium {
            TransportKind::ShortRangeRadio => self.radio,
            TransportKind::LocalWirelessGroup => self.group,
        }
    }
}
