//! Entry addressing.
//!
//! Entries are identified by a URL relative to their container's namespace,
//! e.g. `OEBPS/chapter1.xhtml` inside an EPUB archive. Absolute http(s) URLs
//! are also valid identities, used by containers serving remote resources.

use std::fmt;

use ::url::Url;

/// Address of an entry within a container namespace.
///
/// Relative paths are stored without a leading `/` so that `get("a.txt")`
/// and `get("/a.txt")` resolve to the same entry. Absolute URLs are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryUrl(String);

impl EntryUrl {
    /// Creates an entry URL from a path or absolute URL.
    ///
    /// Returns `None` for empty input or bare directory paths (trailing
    /// `/`), which never address readable content.
    pub fn new(raw: &str) -> Option<Self> {
        if raw.is_empty() || raw.ends_with('/') {
            return None;
        }
        if raw.contains("://") {
            return Some(EntryUrl(raw.to_string()));
        }
        let path = raw.trim_start_matches('/');
        if path.is_empty() {
            return None;
        }
        Some(EntryUrl(path.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File extension of the last path segment, lowercased.
    pub fn extension(&self) -> Option<String> {
        let name = self.0.rsplit('/').next()?;
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    /// Resolves this URL to an absolute one, against `base` when relative.
    pub fn to_absolute(&self, base: Option<&Url>) -> Option<Url> {
        if self.0.contains("://") {
            return Url::parse(&self.0).ok();
        }
        base?.join(&self.0).ok()
    }
}

impl fmt::Display for EntryUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
