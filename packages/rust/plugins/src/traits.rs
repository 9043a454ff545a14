//! The three plugin kinds the orchestrator dispatches.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use tessella_shared::{AppConfig, Result, ResourceDescriptor, ResourceType};

use crate::api::{CollectApi, CollectPatches, EnrichmentApi, ExtractionApi, TempContributions};
use crate::result::PluginResult;

/// Identity and lifecycle hooks common to every plugin kind.
///
/// Registration happens once, before the build starts; descriptors are
/// immutable afterwards. `configure` runs before Discover, `close` after
/// the last stage.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    /// Resource types this plugin applies to.
    fn types(&self) -> &[ResourceType];

    fn applies_to(&self, kind: ResourceType) -> bool {
        self.types().contains(&kind)
    }

    async fn configure(&self, config: &AppConfig) -> Result<()> {
        let _ = config;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Read-only derivation from a resource's document into its cache
/// record, with optional cross-resource aggregation hooks.
#[async_trait]
pub trait Extraction: Plugin {
    /// Whether the handler must run. With caching enabled, a `false`
    /// return skips the handler entirely.
    async fn invalidate(
        &self,
        resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<bool> {
        let _ = (resource, api);
        Ok(true)
    }

    async fn handler(
        &self,
        resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult>;

    /// Phase-2 reduction over every resource's `temp` contribution,
    /// called once per stage after all resources settle. Returns
    /// per-resource patches for [`Extraction::inject_manifest`].
    async fn collect(
        &self,
        temp: &TempContributions,
        api: &CollectApi<'_>,
    ) -> Result<Option<CollectPatches>> {
        let _ = (temp, api);
        Ok(None)
    }

    /// Fold a manifest's per-canvas `temp` contributions (keyed by
    /// canvas index) back into the manifest's record, after its
    /// canvases settle.
    async fn collect_manifest(
        &self,
        resource: &ResourceDescriptor,
        canvas_temp: &BTreeMap<usize, Value>,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let _ = (resource, canvas_temp, api);
        Ok(PluginResult::empty())
    }

    /// Apply one resource's `collect` patch. The returned `meta`/
    /// `indices` contribution is merged into that resource's cache
    /// record and persisted.
    async fn inject_manifest(
        &self,
        resource: &ResourceDescriptor,
        patch: &Value,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let _ = (resource, patch, api);
        Ok(PluginResult::empty())
    }
}

/// Augmentation of the resource's own object graph. The only plugin
/// kind allowed to mutate persisted graph state, signalled through
/// `did_change`.
#[async_trait]
pub trait Enrichment: Plugin {
    async fn invalidate(
        &self,
        resource: &ResourceDescriptor,
        api: &EnrichmentApi<'_>,
    ) -> Result<bool> {
        let _ = (resource, api);
        Ok(true)
    }

    async fn handler(
        &self,
        resource: &ResourceDescriptor,
        api: &EnrichmentApi<'_>,
    ) -> Result<PluginResult>;

    /// Phase-2 reduction, as on [`Extraction::collect`].
    async fn collect(
        &self,
        temp: &TempContributions,
        api: &CollectApi<'_>,
    ) -> Result<Option<CollectPatches>> {
        let _ = (temp, api);
        Ok(None)
    }
}

/// Slug rewriting, consumed during slug finalization at discovery time.
pub trait Rewrite: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn types(&self) -> &[ResourceType];

    fn applies_to(&self, kind: ResourceType) -> bool {
        self.types().contains(&kind)
    }

    /// Return a replacement slug, or `None` to leave it unchanged.
    fn rewrite(&self, slug: &str, kind: ResourceType) -> Option<String>;
}
