use async_trait::async_trait;
use reqwest::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::ReadAt;
use anyhow::{Result, anyhow, bail};

/// HTTP Range reader for a remote ZIP archive.
///
/// Construction is free of network traffic: the archive size is probed on
/// the first call to [`ReadAt::size`] and remembered afterwards. Every
/// request carries the configured credential headers.
pub struct HttpRangeReader {
    client: Client,
    url: String,
    headers: HeaderMap,
    size: OnceCell<u64>,
    transferred_bytes: AtomicU64,
    max_retry: u32,
}

impl HttpRangeReader {
    pub fn new(client: Client, url: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            size: OnceCell::new(),
            transferred_bytes: AtomicU64::new(0),
            max_retry: 10,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Get total bytes transferred from network
    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    /// Discover the archive size.
    ///
    /// A HEAD answer with `Content-Length` and `Accept-Ranges: bytes` is used
    /// when available. Servers that do not advertise ranges on HEAD (or drop
    /// the length) are asked for the first byte instead, and the total is
    /// taken from `Content-Range`.
    async fn probe_size(&self) -> Result<u64> {
        let resp = self
            .client
            .head(&self.url)
            .headers(self.headers.clone())
            .send()
            .await?;

        if resp.status().is_success() {
            let accept_ranges = resp
                .headers()
                .get(ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("none");
            let length = resp
                .headers()
                .get(CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());

            if let (true, Some(length)) = (accept_ranges.contains("bytes"), length) {
                debug!(url = %self.url, size = length, "archive size from HEAD");
                return Ok(length);
            }
        }

        let resp = self
            .client
            .get(&self.url)
            .headers(self.headers.clone())
            .header(RANGE, "bytes=0-0")
            .send()
            .await?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            bail!(
                "Remote server does not support Range requests (status {})",
                resp.status()
            );
        }

        let size = resp
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(total_from_content_range)
            .ok_or_else(|| anyhow!("Remote server did not return a usable Content-Range"))?;

        debug!(url = %self.url, size, "archive size from Content-Range");
        Ok(size)
    }
}

/// Extract the complete length from a `Content-Range: bytes a-b/total` value.
fn total_from_content_range(value: &str) -> Option<u64> {
    let (unit, rest) = value.trim().split_once(' ')?;
    if unit != "bytes" {
        return None;
    }
    let (_, total) = rest.split_once('/')?;
    total.parse().ok()
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let size = self.size().await?;
        if buf.is_empty() || offset >= size {
            return Ok(0);
        }

        let end = offset + buf.len() as u64 - 1;
        let end = end.min(size - 1);
        let expected_size = (end - offset + 1) as usize;

        let mut received = 0;
        let mut retry_count = 0;

        while received < expected_size {
            let current_start = offset + received as u64;
            let range = format!("bytes={}-{}", current_start, end);

            let result = self
                .client
                .get(&self.url)
                .headers(self.headers.clone())
                .header(RANGE, &range)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    if resp.status() != StatusCode::PARTIAL_CONTENT {
                        bail!("HTTP range request failed with status: {}", resp.status());
                    }

                    let bytes = resp.bytes().await?;
                    if bytes.is_empty() {
                        bail!("Remote server returned an empty range for {}", range);
                    }
                    let chunk_len = bytes.len().min(expected_size - received);
                    buf[received..received + chunk_len].copy_from_slice(&bytes[..chunk_len]);
                    received += chunk_len;

                    self.transferred_bytes
                        .fetch_add(chunk_len as u64, Ordering::Relaxed);
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    retry_count += 1;
                    if retry_count >= self.max_retry {
                        bail!("Max retries exceeded reading {}", self.url);
                    }
                    warn!(
                        url = %self.url,
                        retry = retry_count,
                        max_retry = self.max_retry,
                        error = %e,
                        "range request failed, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(received)
    }

    async fn size(&self) -> Result<u64> {
        self.size
            .get_or_try_init(|| self.probe_size())
            .await
            .copied()
    }
}
