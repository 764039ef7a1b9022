//! Nearbeam Core
//!
//! Transport abstraction, peer discovery aggregation, the shared chunked
//! transfer engine, and the coordinator that ties them into a single
//! session state machine with one published state stream.

pub mod capability;
pub mod coordinator;
pub mod discovery;
pub mod resolve;
pub mod state;
pub mod transfer;
pub mod transport;

pub use capability::{CapabilityGate, StaticGate};
pub use coordinator::{CoordinatorConfig, TransferCoordinator};
pub use discovery::DiscoveryAggregator;
pub use resolve::resolve_file;
pub use state::TransferState;
pub use transfer::{TransferAbort, TransferControl, TransferTuning};
pub use transport::{DiscoveryStream, Transport};
pub use transport::group::{GroupConfig, GroupTransport};
pub use transport::radio::{RadioConfig, RadioTransport};
