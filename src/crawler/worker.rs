//! Image download worker
//!
//! Fetches one image per task, checks it against the configured size bounds
//! and format allow-list, and maps fetch errors onto task outcomes.

use crate::config::FetchConfig;
use crate::crawler::fetcher::{is_not_found, FetchError, Fetcher};
use crate::crawler::parser::extension_of;
use crate::crawler::scheduler::WorkerFunction;
use crate::crawler::task::{Artifact, FailureReason, Outcome, Task};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Payload of an image download task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    /// Absolute image URL
    pub url: String,

    /// Listing page the image was found on
    pub page: u32,

    /// Item id extracted from the URL, for id-range targets
    pub item_id: Option<String>,
}

/// A downloaded, validated image
#[derive(Debug, Clone)]
pub struct ImageArtifact {
    pub url: String,
    pub bytes: Vec<u8>,

    /// Normalized format, used as file extension ("jpg", "png", ...)
    pub format: String,
}

impl Artifact for ImageArtifact {
    fn content(&self) -> Option<&[u8]> {
        Some(&self.bytes)
    }

    fn extension(&self) -> &str {
        &self.format
    }
}

/// Downloads images through a [`Fetcher`]
pub struct ImageDownloadWorker {
    fetcher: Arc<dyn Fetcher>,
    min_bytes: usize,
    max_bytes: usize,
    allowed_formats: Vec<String>,
}

impl ImageDownloadWorker {
    pub fn new(fetcher: Arc<dyn Fetcher>, config: &FetchConfig) -> Self {
        Self {
            fetcher,
            min_bytes: config.min_bytes,
            max_bytes: config.max_bytes,
            allowed_formats: config
                .allowed_formats
                .iter()
                .map(|f| normalize_format(f).to_string())
                .collect(),
        }
    }

    fn is_allowed(&self, format: &str) -> bool {
        self.allowed_formats.iter().any(|f| f == format)
    }
}

#[async_trait]
impl WorkerFunction<ImageRequest, ImageArtifact> for ImageDownloadWorker {
    async fn process(&self, task: &Task<ImageRequest>) -> Outcome<ImageArtifact> {
        let url = &task.payload.url;

        let content = match self.fetcher.fetch(url).await {
            Ok(content) => content,
            Err(e) => return outcome_for_fetch_error(e),
        };

        let len = content.bytes.len();
        if len < self.min_bytes || len > self.max_bytes {
            debug!("Rejecting {}: {} bytes", url, len);
            return Outcome::PermanentFailure(FailureReason::SizeOutOfBounds {
                len,
                min: self.min_bytes,
                max: self.max_bytes,
            });
        }

        let format = detect_format(content.content_type.as_deref(), &content.bytes, url);
        let format = match format {
            Some(format) if self.is_allowed(&format) => format,
            Some(format) => {
                return Outcome::PermanentFailure(FailureReason::UnsupportedFormat(format))
            }
            None => {
                return Outcome::PermanentFailure(FailureReason::InvalidContent(
                    "not an image".to_string(),
                ))
            }
        };

        Outcome::Success(ImageArtifact {
            url: content.url,
            bytes: content.bytes,
            format,
        })
    }
}

/// Maps a fetch error to a retryable or terminal outcome
pub fn outcome_for_fetch_error<T>(error: FetchError) -> Outcome<T> {
    let transient = error.is_transient();
    let reason = match &error {
        FetchError::Status { status, .. } if is_not_found(*status) => FailureReason::NotFound,
        FetchError::Status { status, .. } => FailureReason::HttpStatus(*status),
        FetchError::TooLarge { len, max } => FailureReason::SizeOutOfBounds {
            len: usize::try_from(*len).unwrap_or(usize::MAX),
            min: 0,
            max: usize::try_from(*max).unwrap_or(usize::MAX),
        },
        FetchError::Request(msg) => FailureReason::Other(msg.clone()),
        FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Body(_) => {
            FailureReason::Network(error.to_string())
        }
    };

    if transient {
        Outcome::TransientFailure(reason)
    } else {
        Outcome::PermanentFailure(reason)
    }
}

/// Determines the image format from the content type, magic bytes, then the URL
pub fn detect_format(content_type: Option<&str>, bytes: &[u8], url: &str) -> Option<String> {
    if let Some(format) = content_type.and_then(format_from_content_type) {
        return Some(format.to_string());
    }

    if let Some(format) = sniff_format(bytes) {
        return Some(format.to_string());
    }

    let path = url::Url::parse(url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_else(|_| url.to_lowercase());
    extension_of(&path).map(|ext| normalize_format(ext).to_string())
}

fn format_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_lowercase();
    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

fn sniff_format(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("jpg")
    } else if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        Some("png")
    } else if bytes.starts_with(b"GIF8") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        None
    }
}

fn normalize_format(format: &str) -> &str {
    match format.trim().trim_start_matches('.') {
        "jpeg" | "JPEG" | "JPG" => "jpg",
        other => other,
    }
}
