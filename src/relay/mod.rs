//! Attachment relay: durable off-band storage for submitted files.
//!
//! A relay turns a blob into a stable reference (usually a URL) that is
//! written into the roster row. Repeated calls store repeated copies.

pub mod drive;
pub mod local;

use async_trait::async_trait;

use crate::error::RelayError;

pub use drive::DriveRelay;
pub use local::LocalDirRelay;

/// Durable file storage returning a canonical reference.
#[async_trait]
pub trait AttachmentRelay: Send + Sync {
    async fn store(
        &self,
        blob: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<String, RelayError>;
}

/// Reduce a user-supplied filename to a safe single path component.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(sanitize_filename("shot-01_final.png"), "shot-01_final.png");
    }

    #[test]
    fn sanitize_strips_path_tricks() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_filename("..."), "attachment");
        assert_eq!(sanitize_filename(""), "attachment");
    }

    #[test]
    fn sanitize_replaces_spaces_and_unicode() {
        assert_eq!(sanitize_filename("mi foto ñ.jpg"), "mi_foto__.jpg");
    }
}
