//! Directory relay: stores attachments on local disk.
//!
//! Each blob is written to a `NamedTempFile` inside the target directory and
//! then atomically renamed into place. If anything fails before the rename
//! the temp file is dropped, which removes it.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::error::RelayError;
use crate::relay::{AttachmentRelay, sanitize_filename};

/// Relay writing into a directory, optionally served under a public URL.
pub struct LocalDirRelay {
    dir: PathBuf,
    base_url: Option<String>,
}

impl LocalDirRelay {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base_url: None,
        }
    }

    /// Return `{base_url}/{name}` references instead of filesystem paths.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn reference_for(&self, stored_name: &str, path: &Path) -> String {
        match &self.base_url {
            Some(base) => format!("{base}/{stored_name}"),
            None => path.display().to_string(),
        }
    }
}

fn write_atomically(dir: &Path, stored_name: &str, blob: &[u8]) -> Result<PathBuf, RelayError> {
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(blob)?;
    tmp.as_file().sync_all()?;

    let target = dir.join(stored_name);
    tmp.persist(&target).map_err(|e| RelayError::Io(e.error))?;
    Ok(target)
}

#[async_trait]
impl AttachmentRelay for LocalDirRelay {
    async fn store(
        &self,
        blob: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<String, RelayError> {
        let stored_name = format!("{}-{}", Uuid::new_v4(), sanitize_filename(filename));
        let dir = self.dir.clone();
        let name = stored_name.clone();
        let bytes = blob.to_vec();

        let path = tokio::task::spawn_blocking(move || write_atomically(&dir, &name, &bytes))
            .await
            .map_err(|e| RelayError::UploadFailed {
                filename: filename.to_string(),
                reason: format!("writer task failed: {e}"),
            })??;

        info!(
            file = %stored_name,
            mime = mime_type,
            size = blob.len(),
            "Attachment stored locally"
        );
        Ok(self.reference_for(&stored_name, &path))
    }
}
