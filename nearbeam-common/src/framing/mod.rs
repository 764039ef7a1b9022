//! Metadata framing for the file transfer wire protocol
//!
//! Every file crosses the wire as one frame:
//!
//! ```text
//! u16 name_len | name bytes (UTF-8) | i64 size | u16 mime_len | mime bytes | payload
//! ```
//!
//! All integers are big-endian. An empty MIME string means "unknown"; the
//! receiver substitutes `application/octet-stream`. The payload is exactly
//! `size` bytes; how the sender chunks it is not part of the wire format.
//!
//! This layout is the only contract requiring byte-level compatibility
//! between sender and receiver.

mod reader;
mod writer;

use std::fmt;
use std::io;

pub use reader::FrameReader;
pub use writer::FrameWriter;

/// Wire-level errors raised while encoding or decoding a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Underlying I/O failure
    Io(String),
    /// The stream closed in the middle of a frame
    ConnectionClosed,
    /// Name or MIME bytes are not valid UTF-8
    InvalidUtf8,
    /// The size field on the wire is negative
    NegativeSize(i64),
    /// The size does not fit the signed 64-bit wire field
    SizeOutOfRange(u64),
    /// The name does not fit the unsigned 16-bit length field
    NameTooLong(usize),
    /// The MIME string does not fit the unsigned 16-bit length field
    MimeTooLong(usize),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "i/o error: {msg}"),
            Self::ConnectionClosed => write!(f, "connection closed mid frame"),
            Self::InvalidUtf8 => write!(f, "frame field is not valid UTF-8"),
            Self::NegativeSize(size) => write!(f, "negative file size on wire: {size}"),
            Self::SizeOutOfRange(size) => write!(f, "file size exceeds wire range: {size}"),
            Self::NameTooLong(len) => write!(f, "file name too long for frame: {len} bytes"),
            Self::MimeTooLong(len) => write!(f, "mime type too long for frame: {len} bytes"),
        }
    }
}

impl std::error::Error for FrameError {}

impl From<io::Error> for FrameError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::ConnectionClosed
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Decoded frame metadata, read before the payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    /// Sanitized file name as sent by the peer
    pub name: String,
    /// Exact payload length in bytes
    pub size: u64,
    /// MIME type; `None` when the sender reported it as unknown
    pub mime: Option<String>,
}

impl FileHeader {
    /// Encode the header to its wire representation
    ///
    /// # Errors
    ///
    /// Returns an error if the name or MIME string exceeds the 16-bit length
    /// field, or the size exceeds the signed 64-bit wire field.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let name = self.name.as_bytes();
        if name.len() > u16::MAX as usize {
            return Err(FrameError::NameTooLong(name.len()));
        }
        if self.size > i64::MAX as u64 {
            return Err(FrameError::SizeOutOfRange(self.size));
        }
        let mime = self.mime.as_deref().unwrap_or("");
        if mime.len() > u16::MAX as usize {
            return Err(FrameError::MimeTooLong(mime.len()));
        }

        let mut buf = Vec::with_capacity(2 + name.len() + 8 + 2 + mime.len());
        buf.extend_from_slice(&(name.len() as u16).to_be_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&(self.size as i64).to_be_bytes());
        buf.extend_from_slice(&(mime.len() as u16).to_be_bytes());
        buf.extend_from_slice(mime.as_bytes());
        Ok(buf)
    }
}
