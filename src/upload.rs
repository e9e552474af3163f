//! Frame Uploader
//!
//! Posts one still JPEG to `<base>/v1/frames`. Fire-and-forget: the POST runs
//! on its own task, is never retried, and every failure ends as exactly one
//! debug log entry.

use crate::debug_log::DebugLog;
use crate::endpoints::frame_upload_url;
use crate::errors::LinkError;
use crate::signaling::SHARED_SECRET_HEADER;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Per-request unique id header.
pub const FRAME_ID_HEADER: &str = "X-Frame-Id";

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FrameUploader {
    client: reqwest::Client,
    log: DebugLog,
}

impl FrameUploader {
    pub fn new(log: DebugLog) -> Self {
        let client = reqwest::Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });
        Self { client, log }
    }

    /// Start uploading `jpeg` in the background.
    ///
    /// Returns `None` without touching the network when the secret is empty
    /// after trimming. The returned handle is only for callers that want to
    /// wait; dropping it does not cancel the upload.
    pub fn upload(
        &self,
        server_address: &str,
        shared_secret: &str,
        jpeg: Vec<u8>,
    ) -> Option<JoinHandle<()>> {
        let secret = shared_secret.trim();
        if secret.is_empty() {
            self.log.warn("Skipping frame upload: missing Ermete PSK");
            return None;
        }

        let url = frame_upload_url(server_address);
        let secret = secret.to_string();
        let uploader = self.clone();
        Some(tokio::spawn(async move {
            match uploader.post_frame(&url, &secret, jpeg).await {
                Ok(_) => {}
                Err(LinkError::UploadError(message)) => uploader.log.error(message),
                Err(other) => uploader.log.error(other.to_string()),
            }
        }))
    }

    /// POST one frame and return its id on a 2xx response.
    pub async fn post_frame(
        &self,
        url: &str,
        secret: &str,
        jpeg: Vec<u8>,
    ) -> Result<String, LinkError> {
        let frame_id = uuid::Uuid::new_v4().to_string();
        let size = jpeg.len();

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .header(SHARED_SECRET_HEADER, secret)
            .header(FRAME_ID_HEADER, frame_id.as_str())
            .body(jpeg)
            .send()
            .await
            .map_err(|e| LinkError::UploadError(format!("Frame upload error ({}): {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LinkError::UploadError(format!(
                "Frame upload failed: HTTP {}",
                status.as_u16()
            )));
        }

        self.log
            .debug(format!("Uploaded frame {} ({} bytes)", frame_id, size));
        Ok(frame_id)
    }
}
