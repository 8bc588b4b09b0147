//! Random-access byte sources backing the containers.
//!
//! [`ReadAt`] abstracts positioned reads over a seekable backing store so
//! that the ZIP layer works identically over a local file and a remote
//! archive reached through HTTP range requests.

mod http;
mod local;

pub use http::HttpRangeReader;
pub use local::FileReader;

use async_trait::async_trait;

use crate::error::{ReadError, ReadResult};

/// Trait for random access reading from a data source.
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Reads data at the specified offset into the buffer, returning the
    /// number of bytes read. A return of zero means end of source.
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> ReadResult<usize>;

    /// Total size of the data source in bytes.
    fn size(&self) -> u64;

    /// Fills `buf` entirely from `offset`.
    ///
    /// A source that runs out before the buffer is full indicates truncated
    /// data and fails with [`ReadError::Decoding`].
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> ReadResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .read_at(offset + filled as u64, &mut buf[filled..])
                .await?;
            if n == 0 {
                return Err(ReadError::Decoding(format!(
                    "unexpected end of source at offset {}",
                    offset + filled as u64
                )));
            }
            filled += n;
        }
        Ok(())
    }
}
