//! Store adapters: discovery and loading of raw resources.
//!
//! A store turns a configured source (a local document tree, a remote
//! IIIF endpoint) into [`ParsedResource`] descriptors — assigning each
//! one a slug through the slug engine — and later hydrates each
//! descriptor into its document plus initial cache state.

pub mod disk;
pub mod fingerprint;
pub mod remote;

use std::path::Path;

use async_trait::async_trait;

use tessella_cache::RequestCache;
use tessella_shared::{
    Document, IndexBuckets, JsonObject, ParsedResource, Result, ResourceDescriptor, ResourceType,
    StoreConfig, StoreSource, TessellaError,
};
use tessella_slugs::SlugEngine;

pub use disk::DiskStore;
pub use remote::RemoteStore;

/// Services a store adapter gets from the build: slug assignment and
/// the shared per-store request cache.
pub struct StoreApi<'a> {
    pub store_id: &'a str,
    pub engine: &'a SlugEngine,
    /// Slug rule names declared by the store, in order.
    pub slug_templates: &'a [String],
    pub request_cache: &'a RequestCache,
}

impl StoreApi<'_> {
    pub fn assign_slug(&self, kind: ResourceType, source_id: &str) -> (String, Option<String>) {
        self.engine.assign(kind, self.slug_templates, source_id)
    }
}

/// A resource hydrated by [`StoreAdapter::load`]: the descriptor, the
/// document, and the initial cache record categories.
pub struct LoadedResource {
    pub descriptor: ResourceDescriptor,
    pub graph: Document,
    pub meta: JsonObject,
    pub indices: IndexBuckets,
    pub caches: JsonObject,
}

#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Discover this store's resources and assign their slugs.
    async fn parse(&self, api: &StoreApi<'_>) -> Result<Vec<ParsedResource>>;

    /// Whether the resource must be re-loaded. `caches` is the
    /// resource's persisted invalidation state from the previous build.
    async fn invalidate(&self, resource: &ParsedResource, caches: &JsonObject) -> Result<bool>;

    /// Load the resource's document and initial cache state. `dir` is
    /// the resource's cache directory (for derived files).
    async fn load(
        &self,
        resource: &ParsedResource,
        dir: &Path,
        api: &StoreApi<'_>,
    ) -> Result<LoadedResource>;
}

/// Instantiate the adapter for a configured store.
pub fn create_store(store_id: &str, config: &StoreConfig) -> Result<Box<dyn StoreAdapter>> {
    match &config.source {
        StoreSource::Disk {
            path,
            pattern,
            ignore,
            sub_files,
            folder_collections,
        } => Ok(Box::new(DiskStore::new(
            store_id,
            path,
            pattern.as_deref(),
            ignore.as_deref(),
            *sub_files,
            *folder_collections,
        )?)),
        StoreSource::Remote {
            url,
            overrides,
            save_manifests,
        } => {
            url::Url::parse(url).map_err(|e| {
                TessellaError::config(format!("store '{store_id}' has an invalid url: {e}"))
            })?;
            Ok(Box::new(RemoteStore::new(
                store_id,
                url,
                overrides.as_deref(),
                *save_manifests,
            )))
        }
    }
}

/// Shared helper: wrap a JSON document, requiring an identifier.
pub(crate) fn document_from_json(value: serde_json::Value, origin: &str) -> Result<Document> {
    Document::from_value(value)
        .map_err(|_| TessellaError::store(format!("no id found in document at {origin}")))
}
