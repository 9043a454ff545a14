//! State that lives for exactly one build invocation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use tessella_plugins::TempContributions;
use tessella_shared::{Document, ResourceDescriptor, ResourceType};

/// A resource in the active set, with its object graph attached once a
/// stage has needed it.
pub struct ActiveResource {
    pub descriptor: ResourceDescriptor,
    /// Shared because one resource's enrichments run concurrently and
    /// may all touch the graph.
    pub graph: Option<Arc<Mutex<Document>>>,
}

/// One entry of `meta/sitemap.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SiteMapEntry {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunStats {
    /// Resources served from cache during Load.
    pub cached: usize,
    /// Resources re-loaded during Load.
    pub rebuilt: usize,
}

/// The temp aggregation map: per plugin, per resource slug, one own
/// contribution plus any per-canvas contributions.
///
/// This is the only legitimate shared mutable state across manifests —
/// it exists specifically to support cross-resource reduction. Phase 1
/// (handlers) writes into it; after the stage's barrier join, phase 2
/// (`collect`) reads it as a whole.
#[derive(Default)]
pub struct TempMap {
    entries: BTreeMap<String, BTreeMap<String, TempEntry>>,
}

#[derive(Default)]
pub struct TempEntry {
    pub own: Option<Value>,
    /// Canvas contributions keyed by canvas index.
    pub canvases: BTreeMap<usize, Value>,
}

impl TempMap {
    pub fn record(&mut self, plugin: &str, slug: &str, value: Value) {
        self.entries
            .entry(plugin.to_string())
            .or_default()
            .entry(slug.to_string())
            .or_default()
            .own = Some(value);
    }

    pub fn record_canvas(&mut self, plugin: &str, manifest_slug: &str, index: usize, value: Value) {
        self.entries
            .entry(plugin.to_string())
            .or_default()
            .entry(manifest_slug.to_string())
            .or_default()
            .canvases
            .insert(index, value);
    }

    /// A plugin's own (non-canvas) contributions, keyed by slug.
    pub fn contributions(&self, plugin: &str) -> TempContributions {
        self.entries
            .get(plugin)
            .map(|per_slug| {
                per_slug
                    .iter()
                    .filter_map(|(slug, entry)| {
                        entry.own.clone().map(|value| (slug.clone(), value))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A plugin's canvas contributions for one manifest.
    pub fn canvas_contributions(&self, plugin: &str, manifest_slug: &str) -> BTreeMap<usize, Value> {
        self.entries
            .get(plugin)
            .and_then(|per_slug| per_slug.get(manifest_slug))
            .map(|entry| entry.canvases.clone())
            .unwrap_or_default()
    }
}

/// The active resource set and the run's shared maps. Discarded when
/// the build invocation ends.
#[derive(Default)]
pub struct RunContext {
    pub resources: Vec<ActiveResource>,
    pub temp: TempMap,
    /// Collection bucket → member resource slugs, fed by plugin
    /// `collections` results, materialized during Index.
    pub collections: BTreeMap<String, Vec<String>>,
    /// Source path → slug, for path-based reference rewriting.
    pub all_paths: BTreeMap<String, String>,
    /// Canonical id → (slug, type), for reference resolution at emit.
    pub id_to_slug: BTreeMap<String, (String, ResourceType)>,
    pub site_map: BTreeMap<String, SiteMapEntry>,
    /// Slug → editable source file (disk resources).
    pub editable: BTreeMap<String, String>,
    /// Alias/slug → emitted document path.
    pub overrides: BTreeMap<String, String>,
    pub stats: RunStats,
}

impl RunContext {
    pub fn resource(&self, slug: &str) -> Option<&ActiveResource> {
        self.resources
            .iter()
            .find(|resource| resource.descriptor.slug == slug)
    }

    /// Append a member to a collection bucket, once.
    pub fn join_collection(&mut self, bucket: &str, member_slug: &str) {
        let members = self.collections.entry(bucket.to_string()).or_default();
        if !members.iter().any(|slug| slug == member_slug) {
            members.push(member_slug.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn temp_map_keeps_own_and_canvas_contributions_apart() {
        let mut temp = TempMap::default();
        temp.record("p", "manifests/a", json!({"own": true}));
        temp.record_canvas("p", "manifests/a", 0, json!({"canvas": 0}));
        temp.record_canvas("p", "manifests/a", 1, json!({"canvas": 1}));

        let own = temp.contributions("p");
        assert_eq!(own.len(), 1);
        assert_eq!(own["manifests/a"]["own"], true);

        let canvases = temp.canvas_contributions("p", "manifests/a");
        assert_eq!(canvases.len(), 2);
        assert_eq!(canvases[&1]["canvas"], 1);

        assert!(temp.contributions("other").is_empty());
    }

    #[test]
    fn collection_membership_is_a_set() {
        let mut run = RunContext::default();
        run.join_collection("books", "manifests/a");
        run.join_collection("books", "manifests/a");
        run.join_collection("books", "manifests/b");
        assert_eq!(run.collections["books"], vec!["manifests/a", "manifests/b"]);
    }
}
