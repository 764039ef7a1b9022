//! Frame writer for sending file metadata and payload bytes to a stream

use tokio::io::AsyncWriteExt;

use super::{FileHeader, FrameError};

/// Writes transfer frames to an async writer
pub struct FrameWriter<W> {
    writer: W,
}

impl<W> FrameWriter<W> {
    /// Create a new frame writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Get a mutable reference to the underlying writer
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    /// Consume the frame writer and return the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWriteExt + Unpin> FrameWriter<W> {
    /// Write a file header to the stream
    ///
    /// # Errors
    ///
    /// Returns an error if the header fields exceed their wire ranges or an
    /// I/O error occurs.
    pub async fn write_header(&mut self, header: &FileHeader) -> Result<(), FrameError> {
        let bytes = header.to_bytes()?;
        self.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Write one chunk of payload bytes
    ///
    /// The caller is responsible for writing exactly `header.size` bytes in
    /// total; chunking is a sender-side choice invisible on the wire.
    pub async fn write_payload_chunk(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        self.writer.write_all(chunk).await?;
        Ok(())
    }

    /// Flush buffered bytes to the underlying stream
    pub async fn flush(&mut self) -> Result<(), FrameError> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::FrameReader;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_write_header_matches_layout() {
        let header = FileHeader {
            name: "a.txt".to_string(),
            size: 5,
            mime: Some("text/plain".to_string()),
        };

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
            writer.write_header(&header).await.unwrap();
            writer.flush().await.unwrap();
        }
        assert_eq!(buffer, header.to_bytes().unwrap());
    }

    #[tokio::test]
    async fn test_write_then_read_roundtrip() {
        let header = FileHeader {
            name: "a.txt".to_string(),
            size: 5,
            mime: Some("text/plain".to_string()),
        };

        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
            writer.write_header(&header).await.unwrap();
            writer.write_payload_chunk(b"he").await.unwrap();
            writer.write_payload_chunk(b"llo").await.unwrap();
            writer.flush().await.unwrap();
        }

        let mut reader = FrameReader::new(Cursor::new(buffer));
        let decoded = reader.read_header().await.unwrap().unwrap();
        assert_eq!(decoded, header);

        let mut payload = [0u8; 5];
        let mut read = 0;
        while read < payload.len() {
            read += reader.read_payload_chunk(&mut payload[read..]).await.unwrap();
        }
        assert_eq!(&payload, b"hello");
    }

    #[tokio::test]
    async fn test_chunking_is_invisible_on_wire() {
        let header = FileHeader {
            name: "data.bin".to_string(),
            size: 6,
            mime: None,
        };

        let mut one_write = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut one_write));
            writer.write_header(&header).await.unwrap();
            writer.write_payload_chunk(b"abcdef").await.unwrap();
            writer.flush().await.unwrap();
        }

        let mut many_writes = Vec::new();
        {
            let mut writer = FrameWriter::new(Cursor::new(&mut many_writes));
            writer.write_header(&header).await.unwrap();
            for b in b"abcdef" {
                writer.write_payload_chunk(&[*b]).await.unwrap();
            }
            writer.flush().await.unwrap();
        }

        assert_eq!(one_write, many_writes);
    }

    #[tokio::test]
    async fn test_write_header_rejects_oversized_name() {
        let header = FileHeader {
            name: "n".repeat(u16::MAX as usize + 1),
            size: 0,
            mime: None,
        };
        let mut buffer = Vec::new();
        let mut writer = FrameWriter::new(Cursor::new(&mut buffer));
        let result = writer.write_header(&header).await;
        assert!(matches!(result, Err(FrameError::NameTooLong(_))));
    }
}
