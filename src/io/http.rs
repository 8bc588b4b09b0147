use ::url::Url;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::ReadAt;
use crate::error::{ReadError, ReadResult};
use crate::http::status_error;

/// Bounded HTTP range reader for remote archives.
///
/// Each [`read_at`](ReadAt::read_at) call issues a single bounded
/// `Range: bytes=a-b` request. A transient failure propagates to the caller;
/// there is no retry policy at this layer.
#[derive(Debug)]
pub struct HttpRangeReader {
    client: Client,
    url: Url,
    size: u64,
}

impl HttpRangeReader {
    /// Probes `url` with a HEAD request to verify range support and learn
    /// the resource size.
    pub async fn new(client: Client, url: Url) -> ReadResult<Self> {
        let resp = client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| ReadError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &url));
        }

        let accept_ranges = resp
            .headers()
            .get("accept-ranges")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("none");
        if !accept_ranges.contains("bytes") {
            return Err(ReadError::UnsupportedOperation(format!(
                "server at {url} does not support range requests"
            )));
        }

        let size = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                ReadError::Network(format!("server at {url} did not return Content-Length"))
            })?;

        Ok(Self { client, url, size })
    }
}

#[async_trait]
impl ReadAt for HttpRangeReader {
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ReadResult<usize> {
        if buf.is_empty() || offset >= self.size {
            return Ok(0);
        }

        let end = (offset + buf.len() as u64 - 1).min(self.size - 1);
        let expected = (end - offset + 1) as usize;

        let resp = self
            .client
            .get(self.url.clone())
            .header("Range", format!("bytes={offset}-{end}"))
            .send()
            .await
            .map_err(|e| ReadError::Network(e.to_string()))?;

        if resp.status() != StatusCode::PARTIAL_CONTENT {
            return Err(status_error(resp.status(), &self.url));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ReadError::Network(e.to_string()))?;
        let len = bytes.len().min(expected);
        buf[..len].copy_from_slice(&bytes[..len]);

        Ok(len)
    }

    fn size(&self) -> u64 {
        self.size
    }
}
