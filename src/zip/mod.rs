//! ZIP archive access.
//!
//! The archive is read from the end: the End of Central Directory record
//! locates the central directory, which enumerates every entry without
//! touching its data. Entry data is only fetched on demand, so listing a
//! remote archive over HTTP costs a couple of range requests on its tail.
//!
//! - [`structures`]: binary layout of EOCD, ZIP64 records and headers
//! - [`parser`]: parsing those structures from a [`ReadAt`](crate::io::ReadAt) source
//! - [`container`]: the [`Container`](crate::Container) implementation with
//!   per-entry stream caching
//!
//! Supported: standard ZIP and ZIP64, STORED and DEFLATE methods. Not
//! supported: ZIP-level encryption, multi-disk archives, other methods.

mod container;
mod parser;
mod structures;

pub use container::ZipContainer;
pub use parser::ZipParser;
pub use structures::{CompressionMethod, ZipEntryMeta};
