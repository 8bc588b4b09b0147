//! # pubfs
//!
//! A read-only container abstraction for publications.
//!
//! Publications (EPUB, audiobooks, comics) are namespaces of resources
//! addressed by URL. This crate serves their bytes uniformly from
//! heterogeneous backing stores: local files, ZIP archives read on demand
//! (locally or remotely through HTTP range requests), and plain HTTP
//! resources; with an optional LCP decryption layer interposed
//! transparently between archive entries and their consumers.
//!
//! ## Features
//!
//! - Lazy, range-based reads with a uniform [`Resource`] contract
//! - ZIP and ZIP64 archives over any random-access backing, with resumable
//!   decompression streams for sequential forward reads of deflated entries
//! - Open-ended HTTP range streaming for progressive remote consumption
//! - Per-entry AES-256-CBC (LCP) decryption driven by manifest metadata
//! - Local/remote routing for publications with a local manifest and remote
//!   content
//!
//! ## Example
//!
//! ```no_run
//! use std::path::Path;
//! use pubfs::{Container, EntryUrl, Range, ZipContainer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), pubfs::ReadError> {
//!     let container = ZipContainer::open_file(Path::new("book.epub")).await?;
//!
//!     for url in container.entries() {
//!         println!("{url}");
//!     }
//!
//!     let url = EntryUrl::new("OEBPS/chapter1.xhtml").unwrap();
//!     if let Some(chapter) = container.get(&url) {
//!         let head = chapter.read(Some(Range::new(0, 4096))).await?;
//!         println!("{} bytes", head.len());
//!     }
//!
//!     container.close().await;
//!     Ok(())
//! }
//! ```

pub mod container;
pub mod error;
pub mod http;
pub mod io;
pub mod lcp;
pub mod mediatype;
pub mod resource;
pub mod url;
pub mod zip;

pub use container::{
    Container, RoutingContainer, SingleResourceContainer, Transform, TransformingContainer,
};
pub use error::{ReadError, ReadResult};
pub use http::{HttpContainer, HttpResource};
pub use io::{FileReader, HttpRangeReader, ReadAt};
pub use lcp::{ContentKey, Encryption, EncryptionMap, LcpProtection};
pub use mediatype::{MediaType, MediaTypeHints};
pub use resource::{
    ArchiveProperties, FileResource, InMemoryResource, Properties, Range, Resource,
};
pub use crate::url::EntryUrl;
pub use zip::{CompressionMethod, ZipContainer};
