//! HTTP container.
//!
//! Serves remote resources for progressive, sequential consumption: one
//! open-ended `Range: bytes=start-` request backs a logical stream whose
//! body is consumed incrementally across forward reads, instead of one
//! bounded request per chunk. Backward seeks reopen the stream.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use log::debug;
use reqwest::{Client, StatusCode};
use ::url::Url;
use tokio::sync::Mutex;

use crate::container::Container;
use crate::error::{ReadError, ReadResult};
use crate::mediatype::{MediaType, MediaTypeHints};
use crate::resource::{Range, Resource, sniff_resource};
use crate::url::EntryUrl;

/// Maps an HTTP error status to the read error taxonomy.
pub(crate) fn status_error(status: StatusCode, url: &Url) -> ReadError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ReadError::AccessDenied(format!("HTTP {status} for {url}"))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE => ReadError::not_found(url.as_str()),
        _ => ReadError::Network(format!("unexpected HTTP status {status} for {url}")),
    }
}

/// Container fetching remote resources through HTTP.
///
/// Only URLs whose absolute form uses an http(s) scheme are served; `get`
/// returns `None` for everything else. The client is shared and safe for
/// concurrent requests; it is injected rather than built internally so the
/// application controls timeouts and TLS configuration.
pub struct HttpContainer {
    client: Client,
    base_url: Option<Url>,
    entries: BTreeSet<EntryUrl>,
    closed: Arc<AtomicBool>,
}

impl HttpContainer {
    pub fn new(client: Client, base_url: Option<Url>, entries: BTreeSet<EntryUrl>) -> Self {
        HttpContainer {
            client,
            base_url,
            entries,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Container for HttpContainer {
    fn entries(&self) -> BTreeSet<EntryUrl> {
        self.entries.clone()
    }

    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>> {
        let absolute = url.to_absolute(self.base_url.as_ref())?;
        if !matches!(absolute.scheme(), "http" | "https") {
            return None;
        }
        Some(Box::new(HttpResource {
            client: self.client.clone(),
            url: absolute,
            hints: MediaTypeHints::from_url(url),
            closed: self.closed.clone(),
            state: Mutex::new(HttpState::default()),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// A remote resource backed by a single HTTP client.
pub struct HttpResource {
    client: Client,
    url: Url,
    hints: MediaTypeHints,
    closed: Arc<AtomicBool>,
    state: Mutex<HttpState>,
}

#[derive(Default)]
struct HttpState {
    head: Option<HeadInfo>,
    stream: Option<HttpStream>,
}

struct HeadInfo {
    length: Option<u64>,
    media_type: Option<MediaType>,
}

/// An open-ended response body being consumed incrementally.
struct HttpStream {
    response: reqwest::Response,
    /// Offset of the next unread byte of the remote resource.
    pos: u64,
    chunk: Bytes,
    chunk_pos: usize,
}

impl HttpStream {
    /// Returns the next unread slice of the body, or `None` at its end.
    async fn next_slice(&mut self) -> ReadResult<Option<&[u8]>> {
        if self.chunk_pos >= self.chunk.len() {
            match self
                .response
                .chunk()
                .await
                .map_err(|e| ReadError::Network(e.to_string()))?
            {
                Some(chunk) => {
                    self.chunk = chunk;
                    self.chunk_pos = 0;
                }
                None => return Ok(None),
            }
        }
        Ok(Some(&self.chunk[self.chunk_pos..]))
    }

    fn consume(&mut self, count: usize) {
        self.chunk_pos += count;
        self.pos += count as u64;
    }
}

impl HttpResource {
    fn ensure_open(&self) -> ReadResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReadError::UnsupportedOperation(format!(
                "container was closed, cannot read {}",
                self.url
            )));
        }
        Ok(())
    }

    async fn head(&self, state: &mut HttpState) -> ReadResult<()> {
        if state.head.is_some() {
            return Ok(());
        }
        let resp = self
            .client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| ReadError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(status_error(resp.status(), &self.url));
        }

        let length = resp
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok());
        let media_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|essence| {
                // Drop parameters such as charset.
                MediaType::new(essence.split(';').next().unwrap_or(essence).trim())
            });
        state.head = Some(HeadInfo { length, media_type });
        Ok(())
    }

    /// Opens a new open-ended stream starting at `start`.
    ///
    /// Returns `None` when the server answers 416, i.e. `start` is past the
    /// end of the resource; the read then clamps to a zero-length success.
    async fn open_stream(&self, start: u64) -> ReadResult<Option<HttpStream>> {
        let resp = self
            .client
            .get(self.url.clone())
            .header("Range", format!("bytes={start}-"))
            .send()
            .await
            .map_err(|e| ReadError::Network(e.to_string()))?;

        match resp.status() {
            StatusCode::PARTIAL_CONTENT => {}
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(None),
            // A server without range support replays from the beginning;
            // acceptable only when that is where we want to be.
            StatusCode::OK if start == 0 => {}
            status if status.is_success() => {
                return Err(ReadError::Network(format!(
                    "server at {} ignored the range request",
                    self.url
                )));
            }
            status => return Err(status_error(status, &self.url)),
        }

        Ok(Some(HttpStream {
            response: resp,
            pos: start,
            chunk: Bytes::new(),
            chunk_pos: 0,
        }))
    }

    async fn read_range(&self, range: Range) -> ReadResult<Vec<u8>> {
        let mut state = self.state.lock().await;

        // Reuse the current stream for forward reads; a backward seek
        // discards it and issues a fresh request.
        let reuse = matches!(&state.stream, Some(stream) if stream.pos <= range.start());
        if !reuse {
            if let Some(stale) = state.stream.take() {
                debug!(
                    "backward seek on {}: stream at {}, requested {}",
                    self.url,
                    stale.pos,
                    range.start()
                );
            }
            match self.open_stream(range.start()).await? {
                Some(stream) => state.stream = Some(stream),
                None => return Ok(Vec::new()),
            }
        }
        let Some(stream) = state.stream.as_mut() else {
            return Ok(Vec::new());
        };

        // Discard bytes up to the requested start.
        while stream.pos < range.start() {
            let missing = range.start() - stream.pos;
            match stream.next_slice().await? {
                Some(slice) => {
                    let n = (slice.len() as u64).min(missing) as usize;
                    stream.consume(n);
                }
                // Body ended before the requested start: out of range,
                // clamped to an empty success.
                None => return Ok(Vec::new()),
            }
        }

        let mut buf = Vec::with_capacity(range.len() as usize);
        while (buf.len() as u64) < range.len() {
            let missing = range.len() - buf.len() as u64;
            match stream.next_slice().await? {
                Some(slice) => {
                    let n = (slice.len() as u64).min(missing) as usize;
                    buf.extend_from_slice(&slice[..n]);
                    stream.consume(n);
                }
                None => break, // Range clamped to the body's end.
            }
        }
        Ok(buf)
    }
}

#[async_trait]
impl Resource for HttpResource {
    async fn length(&self) -> ReadResult<u64> {
        self.ensure_open()?;
        let mut state = self.state.lock().await;
        self.head(&mut state).await?;
        state
            .head
            .as_ref()
            .and_then(|head| head.length)
            .ok_or_else(|| {
                ReadError::UnsupportedOperation(format!(
                    "server at {} does not expose a length",
                    self.url
                ))
            })
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        self.ensure_open()?;
        {
            let mut state = self.state.lock().await;
            self.head(&mut state).await?;
            if let Some(media_type) = state.head.as_ref().and_then(|head| head.media_type.clone())
            {
                if media_type.as_str() != MediaType::BINARY {
                    return Ok(media_type);
                }
            }
        }
        sniff_resource(self, &self.hints).await
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        self.ensure_open()?;
        let Some(range) = range else {
            let resp = self
                .client
                .get(self.url.clone())
                .send()
                .await
                .map_err(|e| ReadError::Network(e.to_string()))?;
            if !resp.status().is_success() {
                return Err(status_error(resp.status(), &self.url));
            }
            let bytes = resp
                .bytes()
                .await
                .map_err(|e| ReadError::Network(e.to_string()))?;
            return Ok(bytes.to_vec());
        };

        if range.is_empty() {
            return Ok(Vec::new());
        }
        self.read_range(range).await
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.stream = None;
    }
}
