//! Frame reader for parsing file metadata and payload bytes from a stream

use std::io;

use tokio::io::AsyncReadExt;

use super::{FileHeader, FrameError};

/// Reads transfer frames from an async reader
pub struct FrameReader<R> {
    reader: R,
}

impl<R> FrameReader<R> {
    /// Create a new frame reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Get a mutable reference to the underlying reader
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    /// Consume the frame reader and return the underlying reader
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncReadExt + Unpin> FrameReader<R> {
    /// Read the next file header from the stream
    ///
    /// Returns `Ok(None)` if the stream is cleanly closed before the first
    /// header byte — the peer has finished its batch. EOF anywhere inside
    /// the header is `ConnectionClosed`.
    ///
    /// # Note
    ///
    /// This method has no timeout - wrap it with `tokio::time::timeout`.
    pub async fn read_header(&mut self) -> Result<Option<FileHeader>, FrameError> {
        // The first byte decides between clean end-of-batch and a new frame
        let first = match self.read_byte_allow_eof().await? {
            Some(b) => b,
            None => return Ok(None),
        };
        let second = self.read_byte().await?;
        let name_len = u16::from_be_bytes([first, second]) as usize;

        let mut name_bytes = vec![0u8; name_len];
        self.reader.read_exact(&mut name_bytes).await?;
        let name = String::from_utf8(name_bytes).map_err(|_| FrameError::InvalidUtf8)?;

        let mut size_bytes = [0u8; 8];
        self.reader.read_exact(&mut size_bytes).await?;
        let size = i64::from_be_bytes(size_bytes);
        if size < 0 {
            return Err(FrameError::NegativeSize(size));
        }

        let mut mime_len_bytes = [0u8; 2];
        self.reader.read_exact(&mut mime_len_bytes).await?;
        let mime_len = u16::from_be_bytes(mime_len_bytes) as usize;

        let mut mime_bytes = vec![0u8; mime_len];
        self.reader.read_exact(&mut mime_bytes).await?;
        let mime = String::from_utf8(mime_bytes).map_err(|_| FrameError::InvalidUtf8)?;

        Ok(Some(FileHeader {
            name,
            size: size as u64,
            // Empty string on the wire means the sender does not know
            mime: if mime.is_empty() { None } else { Some(mime) },
        }))
    }

    /// Read the next chunk of payload bytes into `buf`
    ///
    /// The caller bounds `buf` to the bytes still owed by the current frame.
    /// Returns the number of bytes read; a closed stream before the payload
    /// is complete is `ConnectionClosed`.
    pub async fn read_payload_chunk(&mut self, buf: &mut [u8]) -> Result<usize, FrameError> {
        match self.reader.read(buf).await {
            Ok(0) => Err(FrameError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a single byte, returning None on clean EOF
    async fn read_byte_allow_eof(&mut self) -> Result<Option<u8>, FrameError> {
        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => Ok(Some(buf[0])),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Read a single byte
    async fn read_byte(&mut self) -> Result<u8, FrameError> {
        let mut buf = [0u8; 1];
        self.reader.read_exact(&mut buf).await?;
        Ok(buf[0])
    }
}
