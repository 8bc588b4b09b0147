//! Error taxonomy shared by every container backend.
//!
//! All fallible operations on [`Resource`](crate::Resource) and
//! [`Container`](crate::Container) return a [`ReadError`] classified by kind
//! rather than by backend, so callers can react to a missing entry or a
//! denied access the same way whether the bytes live in a local file, a ZIP
//! archive or behind an HTTP server.

use thiserror::Error;

/// Result alias used across resource and container operations.
pub type ReadResult<T> = Result<T, ReadError>;

/// Classified failure while accessing a resource.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The URL has no corresponding entry in the container.
    #[error("no entry at \"{url}\"")]
    NotFound { url: String },

    /// Permission or credential failure: filesystem permission, missing
    /// decryption key, HTTP 401/403.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// I/O failure from local storage.
    #[error("filesystem error: {source}")]
    Filesystem {
        #[from]
        source: std::io::Error,
    },

    /// Transport-level failure from remote access, including non-success
    /// HTTP statuses and malformed responses.
    #[error("network error: {0}")]
    Network(String),

    /// Bytes are present but cannot be interpreted as expected: corrupt
    /// archive structures, truncated deflate streams, invalid padding.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The operation is not meaningful for this backend, e.g. the length of
    /// a remote resource whose server omits Content-Length.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Allocation failure while materializing bytes.
    #[error("out of memory: failed to allocate {requested} bytes")]
    OutOfMemory { requested: u64 },
}

impl ReadError {
    pub(crate) fn not_found(url: impl Into<String>) -> Self {
        ReadError::NotFound { url: url.into() }
    }
}

/// Allocates a zeroed buffer of `len` bytes, reporting allocation failure as
/// [`ReadError::OutOfMemory`] instead of aborting the process.
///
/// Entry lengths come from untrusted archive metadata, so a corrupt central
/// directory must not be able to take the whole process down.
pub(crate) fn try_alloc(len: usize) -> ReadResult<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ReadError::OutOfMemory {
            requested: len as u64,
        })?;
    buf.resize(len, 0);
    Ok(buf)
}
