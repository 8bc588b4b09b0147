use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::Container;
use crate::resource::Resource;
use crate::url::EntryUrl;

/// A per-entry resource transform, e.g. a decryption layer.
///
/// Given an entry's URL and the raw resource, either returns the resource
/// unchanged or wraps it so that reads go through the transform. A wrapping
/// transform must reconstruct any semantics lost by ranged reads on the raw
/// resource, such as cipher block alignment, and report the transformed
/// (plaintext) length rather than the raw one.
pub type Transform = Arc<dyn Fn(&EntryUrl, Box<dyn Resource>) -> Box<dyn Resource> + Send + Sync>;

/// Wraps a container, applying a [`Transform`] to every resource it issues.
///
/// The set of URLs is unchanged; only the bytes served for each entry are.
pub struct TransformingContainer {
    inner: Arc<dyn Container>,
    transform: Transform,
}

impl TransformingContainer {
    pub fn new(inner: Arc<dyn Container>, transform: Transform) -> Self {
        TransformingContainer { inner, transform }
    }
}

#[async_trait]
impl Container for TransformingContainer {
    fn entries(&self) -> BTreeSet<EntryUrl> {
        self.inner.entries()
    }

    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>> {
        let raw = self.inner.get(url)?;
        Some((self.transform)(url, raw))
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
