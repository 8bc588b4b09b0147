//! Resource contract: an addressable, lazily-read unit of content.
//!
//! A [`Resource`] serves byte ranges out of some backing store. Content is
//! immutable for the lifetime of the container that issued the resource, so
//! re-reading the same range always returns identical bytes.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ReadResult, try_alloc};
use crate::io::{FileReader, ReadAt};
use crate::mediatype::{MediaType, MediaTypeHints, SNIFF_LEN};

/// Half-open byte interval `[start, end)` over a resource's content.
///
/// Ranges may extend past the available length; reads clamp them rather than
/// failing, and a range entirely beyond the content yields a zero-length
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    start: u64,
    end: u64,
}

impl Range {
    /// Creates a range.
    ///
    /// # Panics
    ///
    /// Panics if `start > end`; an inverted range is a contract violation
    /// caught at the boundary, not a runtime read error.
    pub fn new(start: u64, end: u64) -> Self {
        assert!(start <= end, "invalid range: {start} > {end}");
        Range { start, end }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Clamps the range to `length` bytes of available content.
    pub fn clamp(&self, length: u64) -> Range {
        Range {
            start: self.start.min(length),
            end: self.end.min(length),
        }
    }
}

/// Archive-level attributes of an entry, when backed by an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveProperties {
    /// Size the entry occupies inside the archive. For compressed entries
    /// this is the compressed size; for stored entries it equals the
    /// resource length.
    pub entry_length: u64,
    pub is_entry_compressed: bool,
}

/// Attributes attached to a resource by its backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub archive: Option<ArchiveProperties>,
}

/// An addressable, closable, range-readable byte source.
///
/// Implementations open any underlying stream lazily on first read. A single
/// resource is not safe for concurrent reads from multiple tasks; callers
/// serialize access per resource. Distinct resources are independent.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Length of the content in bytes.
    ///
    /// The value is a hint computed from cheap metadata (archive central
    /// directory, Content-Length header) and may disagree with the true
    /// byte count when that metadata is corrupt. Callers needing certainty
    /// must read fully.
    async fn length(&self) -> ReadResult<u64>;

    /// Media type of the content, classified from hints and sniffed bytes.
    async fn media_type(&self) -> ReadResult<MediaType>;

    /// Backend-specific attributes.
    async fn properties(&self) -> ReadResult<Properties> {
        Ok(Properties::default())
    }

    /// Reads a byte range, or the entire content when `range` is `None`.
    ///
    /// Out-of-range bounds are clamped to the available length; a range
    /// entirely beyond the content yields an empty vector, not an error.
    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>>;

    /// Releases any underlying stream. Idempotent; failures are logged by
    /// the implementation, never propagated.
    async fn close(&self);
}

/// Default media-type retrieval: extension hints plus a sniff of the first
/// bytes of the resource.
pub(crate) async fn sniff_resource(
    resource: &dyn Resource,
    hints: &MediaTypeHints,
) -> ReadResult<MediaType> {
    let head = resource.read(Some(Range::new(0, SNIFF_LEN))).await?;
    Ok(MediaType::sniff(hints, &head))
}

/// A resource holding its content in memory.
pub struct InMemoryResource {
    content: Vec<u8>,
    media_type: Option<MediaType>,
}

impl InMemoryResource {
    pub fn new(content: impl Into<Vec<u8>>) -> Self {
        InMemoryResource {
            content: content.into(),
            media_type: None,
        }
    }

    pub fn with_media_type(content: impl Into<Vec<u8>>, media_type: MediaType) -> Self {
        InMemoryResource {
            content: content.into(),
            media_type: Some(media_type),
        }
    }
}

#[async_trait]
impl Resource for InMemoryResource {
    async fn length(&self) -> ReadResult<u64> {
        Ok(self.content.len() as u64)
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        if let Some(media_type) = &self.media_type {
            return Ok(media_type.clone());
        }
        Ok(MediaType::sniff(&MediaTypeHints::default(), &self.content))
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        let bytes = match range {
            None => self.content.clone(),
            Some(range) => {
                let range = range.clamp(self.content.len() as u64);
                self.content[range.start() as usize..range.end() as usize].to_vec()
            }
        };
        Ok(bytes)
    }

    async fn close(&self) {}
}

/// A resource backed by a single local file, read with positioned reads.
pub struct FileResource {
    reader: Arc<FileReader>,
    hints: MediaTypeHints,
}

impl FileResource {
    /// Opens the file at `path`.
    ///
    /// A missing file maps to [`NotFound`](crate::ReadError::NotFound); other
    /// open failures to [`Filesystem`](crate::ReadError::Filesystem) or
    /// [`AccessDenied`](crate::ReadError::AccessDenied).
    pub fn open(path: &Path) -> ReadResult<Self> {
        let reader = FileReader::open(path)?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        Ok(FileResource {
            reader: Arc::new(reader),
            hints: MediaTypeHints {
                extension,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl Resource for FileResource {
    async fn length(&self) -> ReadResult<u64> {
        Ok(self.reader.size())
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        sniff_resource(self, &self.hints).await
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        let range = match range {
            None => Range::new(0, self.reader.size()),
            Some(range) => range.clamp(self.reader.size()),
        };
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut buf = try_alloc(range.len() as usize)?;
        self.reader.read_exact_at(range.start(), &mut buf).await?;
        Ok(buf)
    }

    async fn close(&self) {}
}
