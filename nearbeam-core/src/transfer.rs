//! Shared chunked transfer engine
//!
//! Both transports execute the same protocol over their byte stream; the
//! chunk size is the only medium-specific tunable and never appears on the
//! wire. Pause and cancel are cooperative checkpoints polled between chunk
//! operations, so no chunk write is ever split.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::timeout;

use nearbeam_common::framing::{FileHeader, FrameError, FrameReader, FrameWriter};
use nearbeam_common::progress::DEFAULT_PROGRESS_INTERVAL;
use nearbeam_common::{
    FALLBACK_MIME, Progress, ProgressMeter, TransferError, TransferableFile, sanitize_file_name,
};

/// Default idle timeout while waiting for the next file header
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default progress timeout: some bytes must move within this window
pub const DEFAULT_PROGRESS_TIMEOUT: Duration = Duration::from_secs(60);

/// Cooperative control signal polled by the engine between chunk operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferControl {
    /// Keep streaming
    Running,
    /// Hold at the next chunk boundary until the signal changes
    Paused,
    /// Stop immediately; the session is being torn down
    Cancelled,
}

/// How a transfer operation ended short of success
///
/// Cancellation is a distinct outcome, never folded into the error taxonomy,
/// so the coordinator can publish `Cancelled` instead of `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferAbort {
    /// The control channel requested cancellation
    Cancelled,
    /// A session-breaking error
    Error(TransferError),
}

impl From<TransferError> for TransferAbort {
    fn from(err: TransferError) -> Self {
        Self::Error(err)
    }
}

impl fmt::Display for TransferAbort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "transfer cancelled"),
            Self::Error(err) => write!(f, "{err}"),
        }
    }
}

/// Per-transport streaming parameters
#[derive(Debug, Clone)]
pub struct TransferTuning {
    /// Bytes moved per chunk operation
    pub chunk_size: usize,
    /// Wait for the next file header before giving up
    pub idle_timeout: Duration,
    /// Wait for byte movement inside a payload before giving up
    pub progress_timeout: Duration,
    /// Minimum interval between progress callbacks
    pub progress_interval: Duration,
}

impl TransferTuning {
    /// Tuning for a medium moving `chunk_size` bytes per operation
    #[must_use]
    pub fn for_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            progress_timeout: DEFAULT_PROGRESS_TIMEOUT,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// Wait until the control channel allows streaming to continue
///
/// Returns at a `Running` signal, suspends across `Paused`, and aborts on
/// `Cancelled` or a dropped control sender.
pub async fn checkpoint(
    control: &mut watch::Receiver<TransferControl>,
) -> Result<(), TransferAbort> {
    loop {
        let current = *control.borrow();
        match current {
            TransferControl::Running => return Ok(()),
            TransferControl::Cancelled => return Err(TransferAbort::Cancelled),
            TransferControl::Paused => {
                if control.changed().await.is_err() {
                    return Err(TransferAbort::Cancelled);
                }
            }
        }
    }
}

/// Send one file over an established byte stream
///
/// Frames the metadata, then streams exactly `size_bytes` of payload in
/// `tuning.chunk_size` chunks. The progress callback receives the sanitized
/// file name and a rate-limited snapshot, plus the terminal 100% update.
pub async fn send_file<S>(
    stream: &mut S,
    file: &TransferableFile,
    tuning: &TransferTuning,
    control: &mut watch::Receiver<TransferControl>,
    on_progress: &mut (dyn FnMut(&str, Progress) + Send),
) -> Result<(), TransferAbort>
where
    S: AsyncWrite + Unpin + Send,
{
    let safe_name = file.safe_name();
    let header = FileHeader {
        name: safe_name.clone(),
        size: file.size_bytes,
        mime: file.mime.clone(),
    };

    let mut source = fs::File::open(&file.path).await.map_err(|e| {
        TransferError::file_io(format!("cannot open {}", file.path.display())).with_cause(e)
    })?;

    let mut writer = FrameWriter::new(&mut *stream);
    writer.write_header(&header).await.map_err(wire_error)?;

    let mut meter = ProgressMeter::with_interval(file.size_bytes, tuning.progress_interval);
    let mut remaining = file.size_bytes;
    let mut buf = vec![0u8; tuning.chunk_size];

    while remaining > 0 {
        checkpoint(control).await?;

        let want = (remaining as usize).min(buf.len());
        let read = source.read(&mut buf[..want]).await.map_err(|e| {
            TransferError::file_io(format!("read failed for {}", file.path.display())).with_cause(e)
        })?;
        if read == 0 {
            return Err(TransferError::file_io(format!(
                "{} ended {} bytes short of its recorded size",
                file.path.display(),
                remaining
            ))
            .into());
        }

        match timeout(tuning.progress_timeout, writer.write_payload_chunk(&buf[..read])).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(wire_error(e).into()),
            Err(_) => {
                return Err(TransferError::timeout("peer stopped accepting bytes").into());
            }
        }

        remaining -= read as u64;
        if let Some(progress) = meter.record(read as u64) {
            on_progress(&safe_name, progress);
        }
    }

    writer.flush().await.map_err(wire_error)?;
    on_progress(&safe_name, meter.finish());
    Ok(())
}

/// Receive the next file from an established byte stream
///
/// Returns `Ok(None)` when the peer cleanly closes the stream before the
/// next header — the batch is over. The file lands in `dest_dir` under its
/// sanitized name, with a numeric ` (n)` suffix on collision.
pub async fn receive_file<S>(
    stream: &mut S,
    dest_dir: &Path,
    tuning: &TransferTuning,
    control: &mut watch::Receiver<TransferControl>,
    on_progress: &mut (dyn FnMut(&str, Progress) + Send),
) -> Result<Option<TransferableFile>, TransferAbort>
where
    S: AsyncRead + Unpin + Send,
{
    let mut reader = FrameReader::new(&mut *stream);

    let header = match timeout(tuning.idle_timeout, reader.read_header()).await {
        Ok(Ok(Some(header))) => header,
        Ok(Ok(None)) => return Ok(None),
        Ok(Err(e)) => return Err(wire_error(e).into()),
        Err(_) => {
            return Err(TransferError::timeout("no file header within the idle window").into());
        }
    };

    checkpoint(control).await?;

    // Sanitized again on receipt; the sender's claim is not trusted
    let safe_name = sanitize_file_name(&header.name);
    let dest_path = unique_destination(dest_dir, &safe_name).await?;

    let mut out = fs::File::create(&dest_path).await.map_err(|e| {
        TransferError::file_io(format!("cannot create {}", dest_path.display())).with_cause(e)
    })?;

    let mut meter = ProgressMeter::with_interval(header.size, tuning.progress_interval);
    let mut remaining = header.size;
    let mut buf = vec![0u8; tuning.chunk_size];

    while remaining > 0 {
        // Every early exit flushes and leaves the partial file on disk;
        // interrupted transfers are not rolled back
        if let Err(abort) = checkpoint(control).await {
            out.flush().await.ok();
            return Err(abort);
        }

        let want = (remaining as usize).min(buf.len());
        let read = match timeout(
            tuning.progress_timeout,
            reader.read_payload_chunk(&mut buf[..want]),
        )
        .await
        {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                out.flush().await.ok();
                return Err(wire_error(e).into());
            }
            Err(_) => {
                out.flush().await.ok();
                return Err(TransferError::timeout("peer stopped sending bytes").into());
            }
        };

        out.write_all(&buf[..read]).await.map_err(|e| {
            TransferError::file_io(format!("write failed for {}", dest_path.display()))
                .with_cause(e)
        })?;

        remaining -= read as u64;
        if let Some(progress) = meter.record(read as u64) {
            on_progress(&safe_name, progress);
        }
    }

    out.flush().await.map_err(|e| {
        TransferError::file_io(format!("flush failed for {}", dest_path.display())).with_cause(e)
    })?;
    on_progress(&safe_name, meter.finish());

    Ok(Some(TransferableFile {
        path: dest_path,
        name: safe_name,
        size_bytes: header.size,
        mime: Some(header.mime.unwrap_or_else(|| FALLBACK_MIME.to_string())),
    }))
}

/// Pick an unused destination path for `name` inside `dir`
///
/// Tries the plain name first, then `name (1).ext` through `name (999).ext`.
async fn unique_destination(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let base = dir.join(name);
    if fs::metadata(&base).await.is_err() {
        return Ok(base);
    }

    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    let extension = Path::new(name).extension().and_then(|s| s.to_str());

    for i in 1..1000 {
        let candidate = match extension {
            Some(ext) => format!("{} ({}).{}", stem, i, ext),
            None => format!("{} ({})", stem, i),
        };
        let path = dir.join(candidate);
        if fs::metadata(&path).await.is_err() {
            return Ok(path);
        }
    }

    Err(TransferError::file_io(format!(
        "no unused destination name for {name} after 999 attempts"
    )))
}

/// Map a wire-level error into the transfer taxonomy
fn wire_error(err: FrameError) -> TransferError {
    match err {
        FrameError::ConnectionClosed => {
            TransferError::connection_lost("stream closed before the transfer finished")
        }
        FrameError::Io(msg) => {
            TransferError::connection_lost("stream error during transfer").with_cause(msg)
        }
        other => TransferError::unknown("malformed transfer frame").with_cause(other),
    }
}
