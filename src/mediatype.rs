//! Media type classification for container entries.
//!
//! Retrieval is hint-first: an explicit hint wins, then the extension
//! registry, then content sniffing over the first bytes of the entry, and
//! finally a binary fallback. Unrecognized content is not an error.

use crate::url::EntryUrl;

/// A media type identified by its essence string, e.g. `application/xhtml+xml`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    pub const BINARY: &'static str = "application/octet-stream";
    pub const CSS: &'static str = "text/css";
    pub const EPUB: &'static str = "application/epub+zip";
    pub const GIF: &'static str = "image/gif";
    pub const HTML: &'static str = "text/html";
    pub const JAVASCRIPT: &'static str = "text/javascript";
    pub const JPEG: &'static str = "image/jpeg";
    pub const JSON: &'static str = "application/json";
    pub const MP3: &'static str = "audio/mpeg";
    pub const MP4: &'static str = "video/mp4";
    pub const NCX: &'static str = "application/x-dtbncx+xml";
    pub const OPF: &'static str = "application/oebps-package+xml";
    pub const PDF: &'static str = "application/pdf";
    pub const PNG: &'static str = "image/png";
    pub const RWPM: &'static str = "application/webpub+json";
    pub const SVG: &'static str = "image/svg+xml";
    pub const TEXT: &'static str = "text/plain";
    pub const TTF: &'static str = "font/ttf";
    pub const WOFF: &'static str = "font/woff";
    pub const WOFF2: &'static str = "font/woff2";
    pub const XHTML: &'static str = "application/xhtml+xml";
    pub const XML: &'static str = "application/xml";
    pub const ZIP: &'static str = "application/zip";

    pub fn new(essence: impl Into<String>) -> Self {
        MediaType(essence.into())
    }

    pub fn binary() -> Self {
        MediaType::new(Self::BINARY)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Looks up a media type from a lowercased file extension.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let essence = match extension {
            "css" => Self::CSS,
            "epub" => Self::EPUB,
            "gif" => Self::GIF,
            "htm" | "html" => Self::HTML,
            "jpeg" | "jpg" => Self::JPEG,
            "js" | "mjs" => Self::JAVASCRIPT,
            "json" => Self::JSON,
            "m4a" | "m4v" | "mp4" => Self::MP4,
            "mp3" => Self::MP3,
            "ncx" => Self::NCX,
            "opf" => Self::OPF,
            "pdf" => Self::PDF,
            "png" => Self::PNG,
            "svg" => Self::SVG,
            "ttf" => Self::TTF,
            "txt" => Self::TEXT,
            "webpub" => Self::RWPM,
            "woff" => Self::WOFF,
            "woff2" => Self::WOFF2,
            "xhtml" => Self::XHTML,
            "xml" => Self::XML,
            "zip" => Self::ZIP,
            _ => return None,
        };
        Some(MediaType::new(essence))
    }

    /// Resolves a media type from hints and a content prefix.
    ///
    /// `content` only needs to hold the first bytes of the entry; signature
    /// sniffing never looks past a few hundred bytes.
    pub fn sniff(hints: &MediaTypeHints, content: &[u8]) -> Self {
        if let Some(media_type) = &hints.media_type {
            return media_type.clone();
        }
        if let Some(media_type) = hints
            .extension
            .as_deref()
            .and_then(MediaType::from_extension)
        {
            return media_type;
        }
        if let Some(kind) = infer::get(content) {
            return MediaType::new(kind.mime_type());
        }
        MediaType::binary()
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hints used to classify an entry before looking at its bytes.
#[derive(Debug, Clone, Default)]
pub struct MediaTypeHints {
    /// Lowercased file extension.
    pub extension: Option<String>,
    /// Media type declared out of band, e.g. an HTTP Content-Type header.
    pub media_type: Option<MediaType>,
}

impl MediaTypeHints {
    pub fn from_url(url: &EntryUrl) -> Self {
        MediaTypeHints {
            extension: url.extension(),
            ..Default::default()
        }
    }

    pub fn from_media_type(media_type: MediaType) -> Self {
        MediaTypeHints {
            media_type: Some(media_type),
            ..Default::default()
        }
    }
}

/// Number of leading bytes a resource should feed to [`MediaType::sniff`].
pub(crate) const SNIFF_LEN: u64 = 512;
