//! File resolution
//!
//! Turns a user-chosen path into a [`TransferableFile`] with name, size,
//! and sniffed MIME type. Resolution failure means "file unavailable": the
//! coordinator drops the entry from the batch instead of failing the
//! session.

use std::path::Path;

use tokio::fs;
use tokio::io::AsyncReadExt;

use nearbeam_common::TransferableFile;

/// Bytes inspected for MIME sniffing
const SNIFF_BYTES: usize = 512;

/// Resolve a path into a transferable file, or `None` when it is unusable
pub async fn resolve_file(path: &Path) -> Option<TransferableFile> {
    let metadata = fs::metadata(path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }

    let name = path.file_name()?.to_str()?.to_string();
    let mime = sniff_mime(path).await;

    Some(TransferableFile {
        path: path.to_path_buf(),
        name,
        size_bytes: metadata.len(),
        mime,
    })
}

/// Sniff the MIME type from the file's leading bytes
async fn sniff_mime(path: &Path) -> Option<String> {
    let mut file = fs::File::open(path).await.ok()?;
    let mut head = [0u8; SNIFF_BYTES];
    let len = file.read(&mut head).await.ok()?;
    infer::get(&head[..len]).map(|kind| kind.mime_type().to_string())
}
