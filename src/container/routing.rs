use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::Container;
use crate::resource::Resource;
use crate::url::EntryUrl;

/// Merges a local and a remote container into one namespace.
///
/// Lookup tries the local container first and falls back to the remote one.
/// Used when a publication's manifest is held locally while the resources it
/// references live behind HTTP.
pub struct RoutingContainer {
    local: Arc<dyn Container>,
    remote: Arc<dyn Container>,
}

impl RoutingContainer {
    pub fn new(local: Arc<dyn Container>, remote: Arc<dyn Container>) -> Self {
        RoutingContainer { local, remote }
    }
}

#[async_trait]
impl Container for RoutingContainer {
    fn entries(&self) -> BTreeSet<EntryUrl> {
        let mut entries = self.local.entries();
        entries.extend(self.remote.entries());
        entries
    }

    fn get(&self, url: &EntryUrl) -> Option<Box<dyn Resource>> {
        self.local.get(url).or_else(|| self.remote.get(url))
    }

    async fn close(&self) {
        self.local.close().await;
        self.remote.close().await;
    }
}
