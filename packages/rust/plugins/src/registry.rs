//! The explicit plugin registry.
//!
//! An instance is built before the pipeline starts (built-ins plus any
//! caller-registered plugins) and threaded through the orchestrator —
//! there is no ambient global plugin state.

use std::sync::Arc;

use tessella_shared::{AppConfig, Result, ResourceType, StoreConfig};
use tracing::debug;

use crate::traits::{Enrichment, Extraction, Plugin, Rewrite};

#[derive(Default)]
pub struct PluginRegistry {
    extractions: Vec<Arc<dyn Extraction>>,
    enrichments: Vec<Arc<dyn Enrichment>>,
    rewrites: Vec<Arc<dyn Rewrite>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with the built-in plugins, in their default
    /// run order.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_extraction(Arc::new(crate::builtins::ManifestLabel));
        registry.register_extraction(Arc::new(crate::builtins::SlugSource));
        registry.register_extraction(Arc::new(crate::builtins::MetadataTopics::new()));
        registry.register_extraction(Arc::new(crate::builtins::CanvasDims));
        registry.register_extraction(Arc::new(crate::builtins::CollectionMembership));
        registry.register_enrichment(Arc::new(crate::builtins::ManifestHomepage));
        registry.register_rewrite(Arc::new(crate::builtins::FlatSlugs));
        registry
    }

    pub fn register_extraction(&mut self, plugin: Arc<dyn Extraction>) {
        debug!(id = plugin.id(), "registered extraction");
        self.extractions.push(plugin);
    }

    pub fn register_enrichment(&mut self, plugin: Arc<dyn Enrichment>) {
        debug!(id = plugin.id(), "registered enrichment");
        self.enrichments.push(plugin);
    }

    pub fn register_rewrite(&mut self, plugin: Arc<dyn Rewrite>) {
        debug!(id = plugin.id(), "registered rewrite");
        self.rewrites.push(plugin);
    }

    // -----------------------------------------------------------------------
    // Stage selection
    // -----------------------------------------------------------------------

    /// Extraction plugins to run for one resource of `kind` owned by
    /// `store`, in final order.
    pub fn extractions_for(
        &self,
        kind: ResourceType,
        allow: Option<&[String]>,
        store: &StoreConfig,
    ) -> Vec<Arc<dyn Extraction>> {
        select(&self.extractions, kind, allow, store)
    }

    /// Enrichment plugins, same selection rules.
    pub fn enrichments_for(
        &self,
        kind: ResourceType,
        allow: Option<&[String]>,
        store: &StoreConfig,
    ) -> Vec<Arc<dyn Enrichment>> {
        select(&self.enrichments, kind, allow, store)
    }

    /// Rewrites applicable to `kind`, honoring the global allow-list.
    pub fn rewrites_for(&self, kind: ResourceType, allow: Option<&[String]>) -> Vec<Arc<dyn Rewrite>> {
        self.rewrites
            .iter()
            .filter(|plugin| allowed(allow, plugin.id()) && plugin.applies_to(kind))
            .cloned()
            .collect()
    }

    /// All extractions, for stage-level collect/inject dispatch.
    pub fn all_extractions(&self) -> &[Arc<dyn Extraction>] {
        &self.extractions
    }

    pub fn all_enrichments(&self) -> &[Arc<dyn Enrichment>] {
        &self.enrichments
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Run every plugin's `configure` hook, before Discover.
    pub async fn configure_all(&self, config: &AppConfig) -> Result<()> {
        for plugin in &self.extractions {
            plugin.configure(config).await?;
        }
        for plugin in &self.enrichments {
            plugin.configure(config).await?;
        }
        Ok(())
    }

    /// Run every plugin's `close` hook, after the last stage.
    pub async fn close_all(&self) -> Result<()> {
        for plugin in &self.extractions {
            plugin.close().await?;
        }
        for plugin in &self.enrichments {
            plugin.close().await?;
        }
        Ok(())
    }
}

fn allowed(allow: Option<&[String]>, id: &str) -> bool {
    allow.is_none_or(|list| list.iter().any(|entry| entry == id))
}

/// The per-resource selection algorithm:
/// 1. start from the registry's default order filtered by the global
///    allow-list,
/// 2. keep only plugins applicable to the resource's type,
/// 3. drop ids in the store's skip-list,
/// 4. when the store declares a run order, append any store-named
///    plugins not already present, then stable-sort so mentioned ids
///    come first in declared order and unmentioned ids follow in their
///    original relative order.
fn select<T>(
    plugins: &[Arc<T>],
    kind: ResourceType,
    allow: Option<&[String]>,
    store: &StoreConfig,
) -> Vec<Arc<T>>
where
    T: Plugin + ?Sized,
{
    let mut selected: Vec<Arc<T>> = plugins
        .iter()
        .filter(|plugin| allowed(allow, plugin.id()))
        .filter(|plugin| plugin.applies_to(kind))
        .filter(|plugin| !store.skip.iter().any(|id| id == plugin.id()))
        .cloned()
        .collect();

    if let Some(order) = store.run.as_deref() {
        for id in order {
            if selected.iter().any(|plugin| plugin.id() == id) {
                continue;
            }
            let Some(extra) = plugins.iter().find(|plugin| plugin.id() == id) else {
                continue;
            };
            if extra.applies_to(kind) && !store.skip.iter().any(|skip| skip == id) {
                selected.push(extra.clone());
            }
        }
        selected.sort_by_key(|plugin| {
            order
                .iter()
                .position(|id| id == plugin.id())
                .unwrap_or(usize::MAX)
        });
    }

    selected
}
