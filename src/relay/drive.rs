//! Google Drive relay: multipart upload into a shared folder.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::RelayError;
use crate::relay::AttachmentRelay;

const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";

#[derive(Debug, Deserialize)]
struct CreatedFile {
    id: String,
}

/// Relay uploading to a Drive folder; references are Drive view links.
pub struct DriveRelay {
    client: reqwest::Client,
    folder_id: String,
    access_token: SecretString,
    upload_url: String,
}

impl DriveRelay {
    pub fn new(folder_id: String, access_token: SecretString) -> Self {
        Self {
            client: reqwest::Client::new(),
            folder_id,
            access_token,
            upload_url: DRIVE_UPLOAD_URL.to_string(),
        }
    }

    pub fn with_upload_url(mut self, upload_url: impl Into<String>) -> Self {
        self.upload_url = upload_url.into();
        self
    }

    /// Public view link for an uploaded file.
    pub fn view_link(file_id: &str) -> String {
        format!("https://drive.google.com/file/d/{file_id}/view")
    }
}

/// Build a `multipart/related` body: JSON metadata part, then the media part.
fn multipart_related(
    boundary: &str,
    metadata: &serde_json::Value,
    blob: &[u8],
    mime_type: &str,
) -> Vec<u8> {
    let mut body = Vec::with_capacity(blob.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n").as_bytes());
    body.extend_from_slice(blob);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

#[async_trait]
impl AttachmentRelay for DriveRelay {
    async fn store(
        &self,
        blob: &[u8],
        filename: &str,
        mime_type: &str,
    ) -> Result<String, RelayError> {
        let boundary = format!("roster-{}", Uuid::new_v4().simple());
        let metadata = serde_json::json!({
            "name": filename,
            "parents": [self.folder_id],
        });
        let body = multipart_related(&boundary, &metadata, blob, mime_type);

        let resp = self
            .client
            .post(&self.upload_url)
            .query(&[("uploadType", "multipart"), ("fields", "id")])
            .bearer_auth(self.access_token.expose_secret())
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::UploadFailed {
                filename: filename.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RelayError::Unauthorized(format!("{status}: {detail}"))
                }
                _ => RelayError::UploadFailed {
                    filename: filename.to_string(),
                    reason: format!("{status}: {detail}"),
                },
            });
        }

        let created: CreatedFile = resp.json().await.map_err(|e| RelayError::UploadFailed {
            filename: filename.to_string(),
            reason: format!("unreadable response: {e}"),
        })?;

        info!(file_id = %created.id, filename, size = blob.len(), "Attachment uploaded to Drive");
        Ok(Self::view_link(&created.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_link_format() {
        assert_eq!(
            DriveRelay::view_link("abc123"),
            "https://drive.google.com/file/d/abc123/view"
        );
    }

    #[test]
    fn multipart_body_layout() {
        let metadata = serde_json::json!({ "name": "shot.png", "parents": ["folder"] });
        let body = multipart_related("B", &metadata, b"\x89PNG", "image/png");
        let text = String::from_utf8_lossy(&body);

        assert!(text.starts_with("--B\r\nContent-Type: application/json"));
        assert!(text.contains(r#""parents":["folder"]"#));
        assert!(text.contains("--B\r\nContent-Type: image/png\r\n\r\n"));
        assert!(text.ends_with("\r\n--B--\r\n"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_upload_failure() {
        let relay = DriveRelay::new("folder".into(), SecretString::from("token"))
            .with_upload_url("http://127.0.0.1:9/upload");
        let err = relay.store(b"x", "x.png", "image/png").await.unwrap_err();
        assert!(matches!(err, RelayError::UploadFailed { .. }), "got {err:?}");
    }
}
