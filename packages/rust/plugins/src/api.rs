//! The views handed to plugin hooks.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::Mutex;

use tessella_cache::{LazyJson, RequestCache};
use tessella_shared::{AppConfig, Document, IndexBuckets, JsonObject, ResourceType};

/// Read-only view for extraction hooks: the resource's document plus
/// lazy access to the state persisted by earlier stages.
pub struct ExtractionApi<'a> {
    pub document: &'a Document,
    pub meta: &'a LazyJson<JsonObject>,
    pub indices: &'a LazyJson<IndexBuckets>,
    pub caches: &'a LazyJson<JsonObject>,
    pub config: &'a AppConfig,
    /// Base URL resolved identifiers are formed against.
    pub server_url: &'a str,
    /// Directory for derived binary assets.
    pub files_dir: PathBuf,
}

/// View for enrichment hooks. The object graph sits behind a lock
/// because one resource's enrichments run concurrently; a handler that
/// mutates it must report `did_change` so the graph is re-persisted.
pub struct EnrichmentApi<'a> {
    pub graph: &'a Mutex<Document>,
    pub meta: &'a LazyJson<JsonObject>,
    pub indices: &'a LazyJson<IndexBuckets>,
    pub caches: &'a LazyJson<JsonObject>,
    pub config: &'a AppConfig,
    pub server_url: &'a str,
    pub files_dir: PathBuf,
    /// Shared per-store request cache.
    pub request_cache: Option<&'a RequestCache>,
}

/// View for the cross-resource `collect` reduction.
pub struct CollectApi<'a> {
    pub config: &'a AppConfig,
    pub server_url: &'a str,
}

impl CollectApi<'_> {
    /// Absolute identifier a resource resolves to when emitted.
    pub fn make_id(&self, kind: ResourceType, slug: &str) -> String {
        let base = self.server_url.trim_end_matches('/');
        let slug = slug.trim_start_matches('/');
        format!("{base}/{slug}/{}", kind.document_file())
    }
}

/// Per-plugin temp contributions, keyed by resource slug.
pub type TempContributions = BTreeMap<String, Value>;

/// Per-resource patches produced by `collect`, keyed by resource slug,
/// applied through `inject_manifest` in the stage's second pass.
pub type CollectPatches = BTreeMap<String, Value>;
