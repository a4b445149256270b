//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests, including:
//! - Building HTTP clients with the configured user agent and timeouts
//! - GET requests returning raw bytes
//! - Error classification into transient and permanent failures

use crate::config::FetchConfig;
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Content returned by a successful fetch
#[derive(Debug, Clone)]
pub struct FetchedContent {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Content-Type header value
    pub content_type: Option<String>,

    pub bytes: Vec<u8>,
}

impl FetchedContent {
    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Errors that can occur while fetching a URL
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },

    #[error("Failed to read body: {0}")]
    Body(String),

    #[error("Response too large: {len} bytes (limit {max})")]
    TooLarge { len: u64, max: u64 },

    #[error("Request failed: {0}")]
    Request(String),
}

impl FetchError {
    /// Returns true if retrying the same request may succeed
    ///
    /// | Condition                 | Class     |
    /// |---------------------------|-----------|
    /// | Timeout, connect failure  | transient |
    /// | HTTP 408, 429, 5xx        | transient |
    /// | Interrupted body          | transient |
    /// | Other 4xx, oversize body  | permanent |
    /// | Malformed request         | permanent |
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout(_) | FetchError::Connect(_) | FetchError::Body(_) => true,
            FetchError::Status { status, .. } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::TooLarge { .. } | FetchError::Request(_) => false,
        }
    }

    fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchError::Connect(e.to_string())
        } else if e.is_body() || e.is_decode() {
            FetchError::Body(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

/// Source of raw bytes for a URL
///
/// Implementations are shared by all workers and must tolerate concurrent calls.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `config` - The fetch configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
pub fn build_http_client(config: &FetchConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed fetcher
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, reqwest::Error> {
        Ok(Self::from_client(
            build_http_client(config)?,
            config.max_bytes as u64,
        ))
    }

    /// Wraps an existing client; bodies above `max_bytes` are rejected
    pub fn from_client(client: Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedContent, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(FetchError::TooLarge {
                    len,
                    max: self.max_bytes,
                });
            }
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let bytes = response.bytes().await.map_err(FetchError::from_reqwest)?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(FetchError::TooLarge {
                len: bytes.len() as u64,
                max: self.max_bytes,
            });
        }

        Ok(FetchedContent {
            url: final_url,
            status: status.as_u16(),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

/// Returns true for statuses that mean the resource is gone for good
pub fn is_not_found(status: u16) -> bool {
    status == StatusCode::NOT_FOUND.as_u16() || status == StatusCode::GONE.as_u16()
}
