//! Nearbeam Common Library
//!
//! Shared wire protocol, data model, and utilities for the nearbeam
//! peer-to-peer file transfer system.

pub mod error;
pub mod framing;
pub mod model;
pub mod progress;
pub mod sanitize;

pub use error::{TransferError, TransferErrorKind};
pub use model::{Peer, TransferableFile, TransportKind, TransportSelection};
pub use progress::{Progress, ProgressMeter};
pub use sanitize::sanitize_file_name;

/// Placeholder file name used when sanitization leaves nothing usable
pub const FALLBACK_FILE_NAME: &str = "unnamed_file";

/// MIME type substituted by the receiver when the sender reports none
pub const FALLBACK_MIME: &str = "application/octet-stream";

/// Maximum length for file names in bytes
pub const MAX_FILE_NAME_BYTES: usize = 255;
