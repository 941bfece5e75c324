//! Document transfer service
//!
//! `TransferService` is the seam the queue's download operation calls; the
//! bundled `HttpTransfer` streams the document over reqwest into a `.part`
//! file and renames it into place once complete.

use super::errors::TransferError;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Completed transfer, keyed by a transfer id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transfer_id: String,
    pub destination: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait TransferService: Send + Sync {
    /// Fetch `source_location` into `destination`
    ///
    /// Implementations should return `TransferError::Cancelled` when they
    /// observe `cancel` before finishing.
    async fn download(
        &self,
        source_location: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransferError>;
}

fn network_error(e: reqwest::Error) -> TransferError {
    TransferError::Network(e.to_string())
}

/// reqwest-backed transfer service
pub struct HttpTransfer {
    client: reqwest::Client,
    base_url: Option<url::Url>,
    headers: HeaderMap,
}

impl HttpTransfer {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
    }

    pub fn with_user_agent(user_agent: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(300))
            .connect_timeout(std::time::Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            client,
            base_url: None,
            headers: HeaderMap::new(),
        })
    }

    /// Base for relative locators such as `/documents/get?orderId=...`
    pub fn with_base_url(mut self, base: &str) -> anyhow::Result<Self> {
        self.base_url = Some(url::Url::parse(base)?);
        Ok(self)
    }

    /// Extra request headers (session cookies, referer, ...)
    pub fn with_headers(mut self, headers: &HashMap<String, String>) -> anyhow::Result<Self> {
        for (key, value) in headers {
            let name: HeaderName = key.parse()?;
            self.headers.insert(name, HeaderValue::from_str(value)?);
        }
        Ok(self)
    }

    /// Turn an opaque locator into a fetchable absolute URL
    pub fn resolve_locator(&self, source_location: &str) -> Result<url::Url, TransferError> {
        let locator = source_location.trim();
        match url::Url::parse(locator) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self
                .base_url
                .as_ref()
                .ok_or_else(|| TransferError::Network(format!("Relative locator without base URL: {}", locator)))?
                .join(locator)
                .map_err(|e| TransferError::Network(format!("Invalid locator {}: {}", locator, e))),
            Err(e) => Err(TransferError::Network(format!("Invalid locator {}: {}", locator, e))),
        }
    }
}

#[async_trait]
impl TransferService for HttpTransfer {
    async fn download(
        &self,
        source_location: &str,
        destination: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferReceipt, TransferError> {
        let url = self.resolve_locator(source_location)?;
        let transfer_id = Uuid::new_v4().to_string();
        tracing::trace!(transfer_id = %transfer_id, "Starting transfer: url={}, path={:?}", url, destination);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TransferError::Cancelled),
            response = self.client.get(url.clone()).headers(self.headers.clone()).send() => {
                response.map_err(network_error)?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(TransferError::from_status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let expected = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let io_err = |e: std::io::Error| TransferError::Io {
            path: destination.to_path_buf(),
            message: e.to_string(),
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let part_path = destination.with_extension("part");
        let file = File::create(&part_path).await.map_err(io_err)?;
        let mut file = BufWriter::with_capacity(64 * 1024, file);

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&part_path).await;
                    tracing::debug!(transfer_id = %transfer_id, "Transfer cancelled after {} bytes", written);
                    return Err(TransferError::Cancelled);
                }
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk.map_err(network_error)?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io_err)?;
        drop(file);

        if let Some(expected) = expected {
            if expected != written {
                let _ = tokio::fs::remove_file(&part_path).await;
                return Err(TransferError::Network(format!(
                    "Truncated body: expected {} bytes, got {}",
                    expected, written
                )));
            }
        }

        tokio::fs::rename(&part_path, destination)
            .await
            .map_err(io_err)?;

        tracing::debug!(transfer_id = %transfer_id, bytes = written, "Transfer finished: {}", destination.display());

        Ok(TransferReceipt {
            transfer_id,
            destination: destination.to_path_buf(),
            bytes: written,
            content_type,
        })
    }
}
