//! The value a plugin handler returns to the orchestrator.

use serde_json::Value;
use tessella_shared::{IndexBuckets, JsonObject};

/// Effects of one handler invocation. Every field is optional; the
/// orchestrator merges what is present into the resource's cache record
/// (`meta`/`caches` shallow, `indices` set-union), records `temp` into
/// the run's aggregation map, appends the resource to each named
/// `collections` bucket, and OR-accumulates `did_change`.
#[derive(Debug, Clone, Default)]
pub struct PluginResult {
    pub meta: Option<JsonObject>,
    pub indices: Option<IndexBuckets>,
    pub caches: Option<JsonObject>,
    /// Per-resource contribution to this plugin's cross-resource
    /// aggregation, consumed by `collect` after the stage settles.
    pub temp: Option<Value>,
    /// Names of collections this resource belongs to.
    pub collections: Option<Vec<String>>,
    /// Whether the resource's object graph was mutated and must be
    /// re-persisted.
    pub did_change: bool,
}

impl PluginResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A result that only patches `meta`.
    pub fn with_meta(meta: JsonObject) -> Self {
        Self {
            meta: Some(meta),
            ..Self::default()
        }
    }

    /// A result that only contributes `indices` buckets.
    pub fn with_indices(indices: IndexBuckets) -> Self {
        Self {
            indices: Some(indices),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_none()
            && self.indices.is_none()
            && self.caches.is_none()
            && self.temp.is_none()
            && self.collections.is_none()
            && !self.did_change
    }
}
