//! ZIP archive container.
//!
//! Serves entries of a ZIP archive over any [`ReadAt`] backing. Stored
//! entries are sliced directly out of the archive; deflated entries stream
//! through a cached decompression cursor so that sequential forward range
//! requests, the dominant access pattern when a web view pages through a
//! chapter, do not re-inflate the entry from its start every time.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use flate2::{Decompress, FlushDecompress, Status};
use log::debug;
use tokio::sync::Mutex;

use crate::container::Container;
use crate::error::{ReadError, ReadResult, try_alloc};
use crate::io::{FileReader, ReadAt};
use crate::mediatype::{MediaType, MediaTypeHints};
use crate::resource::{ArchiveProperties, Properties, Range, Resource, sniff_resource};
use crate::url::EntryUrl;

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipEntryMeta};

/// Container over a ZIP archive.
#[derive(Debug)]
pub struct ZipContainer<R: ReadAt> {
    shared: Arc<ZipShared<R>>,
    urls: BTreeSet<EntryUrl>,
}

#[derive(Debug)]
struct ZipShared<R: ReadAt> {
    /// Emptied by `close`: taking the parser out releases the archive
    /// handle, and entries finding `None` here fail their reads.
    parser: Mutex<Option<Arc<ZipParser<R>>>>,
    entries: HashMap<EntryUrl, ZipEntryMeta>,
}

impl ZipContainer<FileReader> {
    /// Opens a local ZIP archive.
    pub async fn open_file(path: &Path) -> ReadResult<Self> {
        let reader = Arc::new(FileReader::open(path)?);
        Self::open(reader).await
    }
}

impl<R: ReadAt + 'static> ZipContainer<R> {
    /// Opens an archive over `reader`, enumerating the central directory.
    ///
    /// Directory entries are excluded from the namespace.
    pub async fn open(reader: Arc<R>) -> ReadResult<Self> {
        let parser = ZipParser::new(reader);
        let metas = parser.read_central_directory().await?;

        let mut entries = HashMap::with_capacity(metas.len());
        for meta in metas {
            if meta.is_directory {
                continue;
            }
            if let Some(url) = EntryUrl::new(&meta.name) {
                entries.insert(url, meta);
            }
        }
        let urls = entries.keys().cloned().collect();

        Ok(Self {
            shared: Arc::new(ZipShared {
                parser: Mutex::new(Some(Arc::new(parser))),
                entries,
            }),
            urls,
        })
    }
}

#[async_trait]
impl<R: ReadAt + 'static> Container for ZipContainer<R> {
    fn entries(&self) -> BTreeSet<EntryUrl> {
        self.urls.clone()
    }

    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>> {
        let meta = self.shared.entries.get(url)?.clone();
        Some(Box::new(ZipEntry {
            url: url.clone(),
            meta,
            shared: self.shared.clone(),
            state: Mutex::new(EntryState::default()),
        }))
    }

    async fn close(&self) {
        // Dropping the parser releases the archive handle as soon as no
        // read is in flight; cached cursors die with their entries.
        if self.shared.parser.lock().await.take().is_some() {
            debug!("closed zip container ({} entries)", self.urls.len());
        }
    }
}

/// One archive entry, issued by [`ZipContainer::get`].
struct ZipEntry<R: ReadAt> {
    url: EntryUrl,
    meta: ZipEntryMeta,
    shared: Arc<ZipShared<R>>,
    state: Mutex<EntryState>,
}

#[derive(Default)]
struct EntryState {
    /// Offset of the entry's data in the archive, resolved from the local
    /// file header on first read.
    data_offset: Option<u64>,
    /// Single-slot cursor cache for deflated entries: only the most recent
    /// stream is kept, replaced on backward seek.
    cursor: Option<DeflateCursor>,
}

impl<R: ReadAt + 'static> ZipEntry<R> {
    /// Snapshot of the shared parser, failing when the container was
    /// closed and the archive handle released.
    async fn parser(&self) -> ReadResult<Arc<ZipParser<R>>> {
        self.shared.parser.lock().await.clone().ok_or_else(|| {
            ReadError::UnsupportedOperation(format!(
                "container was closed, cannot read \"{}\"",
                self.url
            ))
        })
    }

    async fn data_offset(
        &self,
        parser: &ZipParser<R>,
        state: &mut EntryState,
    ) -> ReadResult<u64> {
        if let Some(offset) = state.data_offset {
            return Ok(offset);
        }
        let offset = parser.data_offset(&self.meta).await?;
        state.data_offset = Some(offset);
        Ok(offset)
    }

    async fn read_fully(&self) -> ReadResult<Vec<u8>> {
        let parser = self.parser().await?;
        let mut state = self.state.lock().await;
        let data_offset = self.data_offset(&parser, &mut state).await?;
        let mut buf = try_alloc(self.meta.uncompressed_size as usize)?;

        match self.meta.method {
            CompressionMethod::Stored => {
                parser.reader().read_exact_at(data_offset, &mut buf).await?;
            }
            CompressionMethod::Deflate => {
                // A full read always uses a fresh stream and leaves the
                // cached cursor alone.
                let mut cursor = DeflateCursor::new();
                cursor
                    .read_exact(
                        parser.reader().as_ref(),
                        data_offset,
                        self.meta.compressed_size,
                        &mut buf,
                    )
                    .await?;
            }
            CompressionMethod::Unknown(method) => {
                return Err(self.unsupported_method(method));
            }
        }
        Ok(buf)
    }

    async fn read_stored(&self, range: Range) -> ReadResult<Vec<u8>> {
        let parser = self.parser().await?;
        let mut state = self.state.lock().await;
        let data_offset = self.data_offset(&parser, &mut state).await?;

        // No decompression involved: serve the sub-range with a single
        // positioned read at the requested offset.
        let mut buf = try_alloc(range.len() as usize)?;
        parser
            .reader()
            .read_exact_at(data_offset + range.start(), &mut buf)
            .await?;
        Ok(buf)
    }

    async fn read_deflated(&self, range: Range) -> ReadResult<Vec<u8>> {
        let parser = self.parser().await?;
        let mut state = self.state.lock().await;
        let data_offset = self.data_offset(&parser, &mut state).await?;

        // Reuse the cached stream only if it has not advanced past the
        // requested start; deflate cannot seek backward.
        let mut cursor = match state.cursor.take() {
            Some(cursor) if cursor.position() <= range.start() => cursor,
            Some(stale) => {
                debug!(
                    "backward seek on \"{}\": cursor at {}, requested {}",
                    self.url,
                    stale.position(),
                    range.start()
                );
                drop(stale);
                DeflateCursor::new()
            }
            None => DeflateCursor::new(),
        };

        let reader = parser.reader().as_ref();
        let result = async {
            cursor
                .skip(
                    reader,
                    data_offset,
                    self.meta.compressed_size,
                    range.start() - cursor.position(),
                )
                .await?;
            let mut buf = try_alloc(range.len() as usize)?;
            cursor
                .read_exact(reader, data_offset, self.meta.compressed_size, &mut buf)
                .await?;
            Ok(buf)
        }
        .await;

        // Keep the advanced cursor for the next forward read, but never a
        // stream in a failed state.
        if result.is_ok() {
            state.cursor = Some(cursor);
        }
        result
    }

    fn unsupported_method(&self, method: u16) -> ReadError {
        ReadError::UnsupportedOperation(format!(
            "compression method {method} of \"{}\" is not supported",
            self.url
        ))
    }
}

#[async_trait]
impl<R: ReadAt + 'static> Resource for ZipEntry<R> {
    async fn length(&self) -> ReadResult<u64> {
        Ok(self.meta.uncompressed_size)
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        sniff_resource(self, &MediaTypeHints::from_url(&self.url)).await
    }

    async fn properties(&self) -> ReadResult<Properties> {
        let archive = match self.meta.method {
            CompressionMethod::Stored => ArchiveProperties {
                entry_length: self.meta.uncompressed_size,
                is_entry_compressed: false,
            },
            _ => ArchiveProperties {
                entry_length: self.meta.compressed_size,
                is_entry_compressed: true,
            },
        };
        Ok(Properties {
            archive: Some(archive),
        })
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        let Some(range) = range else {
            return self.read_fully().await;
        };

        let range = range.clamp(self.meta.uncompressed_size);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        match self.meta.method {
            CompressionMethod::Stored => self.read_stored(range).await,
            CompressionMethod::Deflate => self.read_deflated(range).await,
            CompressionMethod::Unknown(method) => Err(self.unsupported_method(method)),
        }
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.cursor = None;
    }
}

/// Size of the compressed-input buffer of a [`DeflateCursor`].
const IN_BUF_LEN: usize = 32 * 1024;

/// Counting decompression stream over an entry's compressed data.
///
/// Tracks how many plaintext bytes it has produced so far; the entry reuses
/// it for a subsequent read only if that read starts at or after
/// [`position`](DeflateCursor::position).
struct DeflateCursor {
    inflater: Decompress,
    in_buf: Vec<u8>,
    in_start: usize,
    in_end: usize,
    /// Next compressed byte to fetch, relative to the entry's data offset.
    comp_pos: u64,
    /// Plaintext bytes produced so far.
    out_pos: u64,
    finished: bool,
}

impl DeflateCursor {
    fn new() -> Self {
        DeflateCursor {
            // Raw deflate: ZIP entries carry no zlib header.
            inflater: Decompress::new(false),
            in_buf: vec![0u8; IN_BUF_LEN],
            in_start: 0,
            in_end: 0,
            comp_pos: 0,
            out_pos: 0,
            finished: false,
        }
    }

    fn position(&self) -> u64 {
        self.out_pos
    }

    async fn fill_input<R: ReadAt + ?Sized>(
        &mut self,
        reader: &R,
        data_offset: u64,
        compressed_size: u64,
    ) -> ReadResult<()> {
        if self.in_start < self.in_end || self.comp_pos >= compressed_size {
            return Ok(());
        }
        let want = (self.in_buf.len() as u64).min(compressed_size - self.comp_pos) as usize;
        reader
            .read_exact_at(data_offset + self.comp_pos, &mut self.in_buf[..want])
            .await?;
        self.comp_pos += want as u64;
        self.in_start = 0;
        self.in_end = want;
        Ok(())
    }

    /// Inflates at most `out.len()` bytes, returning zero only at the end of
    /// the deflate stream.
    async fn read_some<R: ReadAt + ?Sized>(
        &mut self,
        reader: &R,
        data_offset: u64,
        compressed_size: u64,
        out: &mut [u8],
    ) -> ReadResult<usize> {
        if self.finished || out.is_empty() {
            return Ok(0);
        }
        loop {
            self.fill_input(reader, data_offset, compressed_size).await?;
            let input = &self.in_buf[self.in_start..self.in_end];
            let input_exhausted = input.is_empty() && self.comp_pos >= compressed_size;

            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();
            let status = self
                .inflater
                .decompress(input, out, FlushDecompress::None)
                .map_err(|e| ReadError::Decoding(format!("deflate error: {e}")))?;
            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            self.in_start += consumed;
            self.out_pos += produced as u64;

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    return Ok(produced);
                }
                _ if produced > 0 => return Ok(produced),
                _ if input_exhausted => return Ok(0),
                _ if consumed == 0 && !input.is_empty() => {
                    return Err(ReadError::Decoding("deflate stream stalled".into()));
                }
                // Otherwise the inflater consumed input without producing
                // output yet; fetch more and continue.
                _ => {}
            }
        }
    }

    async fn read_exact<R: ReadAt + ?Sized>(
        &mut self,
        reader: &R,
        data_offset: u64,
        compressed_size: u64,
        out: &mut [u8],
    ) -> ReadResult<()> {
        let mut filled = 0;
        while filled < out.len() {
            let n = self
                .read_some(reader, data_offset, compressed_size, &mut out[filled..])
                .await?;
            if n == 0 {
                return Err(ReadError::Decoding(format!(
                    "deflate stream ended {} bytes early",
                    out.len() - filled
                )));
            }
            filled += n;
        }
        Ok(())
    }

    /// Discards `count` plaintext bytes to advance to a new read position.
    ///
    /// A skip that makes no progress means the stream ended before the
    /// requested offset; that is a fatal decoding error, not a retryable
    /// condition.
    async fn skip<R: ReadAt + ?Sized>(
        &mut self,
        reader: &R,
        data_offset: u64,
        compressed_size: u64,
        mut count: u64,
    ) -> ReadResult<()> {
        let mut scratch = [0u8; 8 * 1024];
        while count > 0 {
            let want = scratch.len().min(count as usize);
            let n = self
                .read_some(reader, data_offset, compressed_size, &mut scratch[..want])
                .await?;
            if n == 0 {
                return Err(ReadError::Decoding(format!(
                    "deflate stream exhausted {count} bytes before the requested offset"
                )));
            }
            count -= n as u64;
        }
        Ok(())
    }
}
