//! Container contract and composition.
//!
//! A [`Container`] maps URLs to [`Resource`]s backed by one storage medium.
//! Containers compose by wrapping: [`TransformingContainer`] interposes a
//! byte transform (decryption) over any container, [`RoutingContainer`]
//! merges a local and a remote namespace.

mod routing;
mod transform;

pub use routing::RoutingContainer;
pub use transform::{Transform, TransformingContainer};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use crate::error::{ReadError, ReadResult};
use crate::mediatype::MediaType;
use crate::resource::{Properties, Range, Resource};
use crate::url::EntryUrl;

/// A namespace of resources, enumerable and closable.
///
/// Closing a container invalidates every resource obtained from it:
/// subsequent reads fail with a typed error, they never panic or return
/// stale bytes.
#[async_trait]
pub trait Container: Send + Sync {
    /// The known universe of URLs this container serves.
    fn entries(&self) -> BTreeSet<EntryUrl>;

    /// Looks up a resource. Pure lookup, performs no I/O; `None` when the
    /// URL is not part of this container.
    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>>;

    /// Releases backing handles. Idempotent; close-time failures are
    /// logged by implementations, never propagated.
    async fn close(&self);
}

/// A container serving a single resource under a fixed URL.
///
/// Used as the local side of a [`RoutingContainer`], e.g. an in-memory
/// manifest next to remote content resources.
pub struct SingleResourceContainer {
    url: EntryUrl,
    resource: Arc<dyn Resource>,
    closed: Arc<AtomicBool>,
}

impl SingleResourceContainer {
    pub fn new(url: EntryUrl, resource: impl Resource + 'static) -> Self {
        SingleResourceContainer {
            url,
            resource: Arc::new(resource),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Container for SingleResourceContainer {
    fn entries(&self) -> BTreeSet<EntryUrl> {
        BTreeSet::from([self.url.clone()])
    }

    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>> {
        if url != &self.url {
            return None;
        }
        Some(Box::new(SharedResource {
            url: self.url.clone(),
            resource: self.resource.clone(),
            closed: self.closed.clone(),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.resource.close().await;
        }
    }
}

/// Hands out the container's resource without giving entries the power to
/// close it for everyone else; reads stop once the container is closed.
struct SharedResource {
    url: EntryUrl,
    resource: Arc<dyn Resource>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Resource for SharedResource {
    async fn length(&self) -> ReadResult<u64> {
        self.resource.length().await
    }

    async fn media_type(&self) -> ReadResult<MediaType> {
        self.resource.media_type().await
    }

    async fn properties(&self) -> ReadResult<Properties> {
        self.resource.properties().await
    }

    async fn read(&self, range: Option<Range>) -> ReadResult<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ReadError::UnsupportedOperation(format!(
                "container was closed, cannot read \"{}\"",
                self.url
            )));
        }
        self.resource.read(range).await
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::InMemoryResource;

    #[tokio::test]
    async fn single_resource_lookup() {
        let url = EntryUrl::new("manifest.json").unwrap();
        let container = SingleResourceContainer::new(
            url.clone(),
            InMemoryResource::new(b"{}".to_vec()),
        );

        assert_eq!(container.entries(), BTreeSet::from([url.clone()]));
        assert!(container.get(&url).is_some());
        assert!(container.get(&EntryUrl::new("other.json").unwrap()).is_none());

        let entry = container.get(&url).unwrap();
        assert_eq!(entry.read(None).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn close_invalidates_issued_resources() {
        let url = EntryUrl::new("manifest.json").unwrap();
        let container =
            SingleResourceContainer::new(url.clone(), InMemoryResource::new(b"{}".to_vec()));
        let entry = container.get(&url).unwrap();
        assert!(entry.read(None).await.is_ok());

        container.close().await;
        container.close().await; // idempotent

        let err = entry.read(None).await.unwrap_err();
        assert!(matches!(err, ReadError::UnsupportedOperation(_)));
    }
}
