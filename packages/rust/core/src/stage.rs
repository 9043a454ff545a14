//! Helpers shared by the Extract and Enrich stage drivers.

use serde_json::Value;

use tessella_cache::ResourceCache;
use tessella_plugins::PluginResult;

/// Merge a handler result's cache effects into the staged record, and
/// hand back the parts the stage driver routes elsewhere: the `temp`
/// contribution, the collection buckets, and the dirty flag.
pub(crate) fn stage_effects(
    cache: &mut ResourceCache,
    result: PluginResult,
) -> (Option<Value>, Vec<String>, bool) {
    if let Some(meta) = result.meta {
        cache.stage_meta(meta);
    }
    if let Some(caches) = result.caches {
        cache.stage_caches(caches);
    }
    if let Some(indices) = result.indices {
        cache.stage_indices(&indices);
    }
    (
        result.temp,
        result.collections.unwrap_or_default(),
        result.did_change,
    )
}
