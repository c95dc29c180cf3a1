//! Per-request scratch files for uploaded images.

use std::io::Write;
use std::path::Path;

use civic_core::Result;
use tempfile::NamedTempFile;
use uuid::Uuid;

/// An uploaded body on disk, deleted when dropped.
///
/// The file name embeds the request id, so concurrent requests never share
/// a path.
pub struct ScopedUpload {
    file: NamedTempFile,
}

impl ScopedUpload {
    /// Write `bytes` to a fresh file in `dir`.
    pub fn write(dir: &Path, request_id: Uuid, bytes: &[u8]) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix(&format!("upload-{request_id}-"))
            .tempfile_in(dir)?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
