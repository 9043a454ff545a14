//! The fixed stage sequence: Discover → Load → Extract → Enrich → Emit → Index.
//!
//! Stages are separated by hard barriers: no resource begins stage N+1
//! until stage N has persisted cache state for the entire active set.
//! Within a stage no ordering between distinct resources is guaranteed.

use std::time::Instant;

use tracing::{info, instrument};

use tessella_shared::Result;

use crate::context::{BuildContext, BuildSummary, ProgressReporter};
use crate::run::RunContext;
use crate::{discover, emit, enrich, extract, indices, load};

/// Run a full build. Configuration errors surface before the first
/// stage; stage-level aggregated plugin failures abort the build after
/// the failing stage has completed its successful work.
#[instrument(skip_all)]
pub async fn run_build(
    ctx: &BuildContext,
    progress: &dyn ProgressReporter,
) -> Result<BuildSummary> {
    let started = Instant::now();

    ctx.registry.configure_all(&ctx.config).await?;

    progress.stage("Discovering resources");
    let discovered = discover::run(ctx).await?;

    let mut run = RunContext::default();
    progress.stage("Loading stores");
    load::run(ctx, &mut run, discovered, progress).await?;

    progress.stage("Extracting");
    extract::run(ctx, &mut run).await?;

    progress.stage("Enriching");
    enrich::run(ctx, &mut run).await?;

    progress.stage("Emitting documents");
    let emitted = emit::run(ctx, &run).await?;

    progress.stage("Building indices");
    indices::run(ctx, &run, emitted).await?;

    ctx.registry.close_all().await?;

    let summary = BuildSummary {
        resources: run.resources.len(),
        cached: run.stats.cached,
        rebuilt: run.stats.rebuilt,
        elapsed: started.elapsed(),
    };
    progress.done(&summary);
    info!(
        resources = summary.resources,
        cached = summary.cached,
        rebuilt = summary.rebuilt,
        elapsed_ms = summary.elapsed.as_millis(),
        "build complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use tessella_plugins::{
        Enrichment, EnrichmentApi, Extraction, ExtractionApi, Plugin, PluginRegistry, PluginResult,
    };
    use tessella_shared::{
        AppConfig, JsonObject, Result, ResourceDescriptor, ResourceType, StoreConfig, StoreSource,
        TessellaError,
    };

    use super::*;
    use crate::context::{BuildContext, BuildOptions, SilentProgress};

    // -----------------------------------------------------------------------
    // Fixtures
    // -----------------------------------------------------------------------

    fn test_config(root: &Path) -> AppConfig {
        let mut stores = BTreeMap::new();
        stores.insert(
            "main".to_string(),
            StoreConfig {
                source: StoreSource::Disk {
                    path: root.join("content"),
                    pattern: Some("**/*.json".into()),
                    ignore: None,
                    sub_files: false,
                    folder_collections: false,
                },
                slug_templates: Vec::new(),
                skip: Vec::new(),
                run: None,
            },
        );
        let mut config = AppConfig {
            stores,
            ..AppConfig::default()
        };
        config.server.url = "https://site.example".into();
        config.build.cache_dir = root.join("cache");
        config.build.build_dir = root.join("build");
        config
    }

    fn write_manifest(root: &Path, rel: &str, id: &str, canvases: usize) {
        let items: Vec<Value> = (0..canvases)
            .map(|n| {
                json!({
                    "id": format!("{id}/canvas/{n}"),
                    "type": "Canvas",
                    "width": 600 + n * 100,
                    "height": 400,
                })
            })
            .collect();
        let document = json!({
            "id": id,
            "type": "Manifest",
            "label": { "en": [rel] },
            "metadata": [
                { "label": { "en": ["Author"] }, "value": { "en": ["Ada"] } }
            ],
            "items": items,
        });
        let path = root.join("content").join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, serde_json::to_vec_pretty(&document).expect("json")).expect("write");
    }

    async fn build(config: AppConfig, registry: PluginRegistry) -> Result<BuildSummary> {
        let ctx = BuildContext::new(config, registry, BuildOptions::default())?;
        run_build(&ctx, &SilentProgress).await
    }

    // -----------------------------------------------------------------------
    // Stub plugins
    // -----------------------------------------------------------------------

    /// Counts handler invocations; caches a completion token so re-runs
    /// with valid caches skip it. Optionally fails for one slug.
    struct Counting {
        id: &'static str,
        runs: Arc<AtomicUsize>,
        fail_for: Option<&'static str>,
    }

    const MANIFEST_ONLY: &[ResourceType] = &[ResourceType::Manifest];
    const CANVAS_ONLY: &[ResourceType] = &[ResourceType::Canvas];

    #[async_trait]
    impl Plugin for Counting {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            self.id
        }
        fn types(&self) -> &[ResourceType] {
            MANIFEST_ONLY
        }
    }

    #[async_trait]
    impl Extraction for Counting {
        async fn invalidate(
            &self,
            _resource: &ResourceDescriptor,
            api: &ExtractionApi<'_>,
        ) -> Result<bool> {
            Ok(!api.caches.get().await.contains_key(self.id))
        }

        async fn handler(
            &self,
            resource: &ResourceDescriptor,
            _api: &ExtractionApi<'_>,
        ) -> Result<PluginResult> {
            if self.fail_for == Some(resource.slug.as_str()) {
                return Err(TessellaError::plugin(self.id, &resource.slug, "stub failure"));
            }
            self.runs.fetch_add(1, Ordering::SeqCst);

            let mut meta = JsonObject::new();
            meta.insert(format!("ran_{}", self.id), Value::Bool(true));
            let mut caches = JsonObject::new();
            caches.insert(self.id.to_string(), Value::Bool(true));
            Ok(PluginResult {
                meta: Some(meta),
                caches: Some(caches),
                ..PluginResult::default()
            })
        }
    }

    /// Canvas enrichment that tags the manifest graph and reports a
    /// change, to exercise upward dirty propagation.
    struct CanvasTagger;

    #[async_trait]
    impl Plugin for CanvasTagger {
        fn id(&self) -> &'static str {
            "canvas-tagger"
        }
        fn name(&self) -> &'static str {
            "Canvas tagger"
        }
        fn types(&self) -> &[ResourceType] {
            CANVAS_ONLY
        }
    }

    #[async_trait]
    impl Enrichment for CanvasTagger {
        async fn handler(
            &self,
            _resource: &ResourceDescriptor,
            api: &EnrichmentApi<'_>,
        ) -> Result<PluginResult> {
            let mut graph = api.graph.lock().await;
            let changed = graph.as_value().get("tagged").is_none();
            if changed {
                let mut value = graph.as_value().clone();
                if let Some(object) = value.as_object_mut() {
                    object.insert("tagged".to_string(), Value::Bool(true));
                }
                *graph = tessella_shared::Document::from_value(value).expect("still has id");
            }
            Ok(PluginResult {
                did_change: changed,
                ..PluginResult::default()
            })
        }
    }

    // -----------------------------------------------------------------------
    // End-to-end properties
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn full_build_emits_documents_and_aggregates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_manifest(root, "a.json", "https://example.org/iiif/a", 2);
        write_manifest(root, "b.json", "https://example.org/iiif/b", 1);

        let mut config = test_config(root);
        config.plugins.insert(
            "metadata-topics".to_string(),
            toml::from_str("[topic_types]\nauthor = [\"Author\"]").expect("options"),
        );

        let summary = build(config, PluginRegistry::with_builtins())
            .await
            .expect("build");
        assert_eq!(summary.resources, 2);
        assert_eq!(summary.rebuilt, 2);

        // flat-slugs moved both manifests under manifests/.
        let manifest = root.join("build/manifests/a/manifest.json");
        assert!(manifest.exists());
        let emitted: Value =
            serde_json::from_slice(&std::fs::read(&manifest).expect("read")).expect("json");
        assert_eq!(
            emitted["id"],
            "https://site.example/manifests/a/manifest.json"
        );
        // The homepage enrichment mutated and re-persisted the graph.
        assert!(emitted["homepage"][0]["id"]
            .as_str()
            .expect("homepage id")
            .contains("manifests/a"));

        // Canvas fold-up landed in the manifest meta.
        let meta: Value = serde_json::from_slice(
            &std::fs::read(root.join("cache/manifests/a/meta.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(meta["max_canvas_width"], 700);
        assert_eq!(meta["label"], "a.json");

        // Aggregates.
        assert!(root.join("build/collection.json").exists());
        assert!(root.join("build/manifests/collection.json").exists());
        assert!(root.join("build/stores/main/collection.json").exists());
        assert!(root.join("build/topics/author/ada/collection.json").exists());
        assert!(root.join("build/meta/sitemap.json").exists());
        assert!(root.join("build/config/stores.json").exists());

        let topic: Value = serde_json::from_slice(
            &std::fs::read(root.join("build/topics/author/ada/collection.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(topic["tessella:totalItems"], 2);
        assert_eq!(topic["items"].as_array().expect("items").len(), 2);
    }

    #[tokio::test]
    async fn extract_is_idempotent_under_caching() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_manifest(root, "a.json", "https://example.org/iiif/a", 0);
        write_manifest(root, "b.json", "https://example.org/iiif/b", 0);

        let runs = Arc::new(AtomicUsize::new(0));
        let registry = || {
            let mut registry = PluginRegistry::new();
            registry.register_extraction(Arc::new(Counting {
                id: "counting",
                runs: runs.clone(),
                fail_for: None,
            }));
            registry
        };

        build(test_config(root), registry()).await.expect("first build");
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        let meta_path = root.join("cache/a/meta.json");
        let before = std::fs::read(&meta_path).expect("read");

        // Second run: no source changes, every invalidate returns false.
        build(test_config(root), registry()).await.expect("second build");
        assert_eq!(runs.load(Ordering::SeqCst), 2, "no handler may re-run");

        let after = std::fs::read(&meta_path).expect("read");
        assert_eq!(before, after, "cache output must be byte-identical");
    }

    #[tokio::test]
    async fn plugin_failures_are_isolated_and_aggregated() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_manifest(root, "r1.json", "https://example.org/iiif/r1", 0);
        write_manifest(root, "r2.json", "https://example.org/iiif/r2", 0);

        let a_runs = Arc::new(AtomicUsize::new(0));
        let b_runs = Arc::new(AtomicUsize::new(0));
        let mut registry = PluginRegistry::new();
        registry.register_extraction(Arc::new(Counting {
            id: "plugin_a",
            runs: a_runs.clone(),
            fail_for: Some("r1"),
        }));
        registry.register_extraction(Arc::new(Counting {
            id: "plugin_b",
            runs: b_runs.clone(),
            fail_for: None,
        }));

        let err = build(test_config(root), registry).await.unwrap_err();
        let TessellaError::Stage { stage, failures } = err else {
            panic!("expected a stage error, got {err}");
        };
        assert_eq!(stage, "extract");
        assert_eq!(failures.len(), 1, "exactly the r1/plugin_a failure");
        assert_eq!(failures[0].slug, "r1");
        assert_eq!(failures[0].plugin, "plugin_a");

        // A still ran for r2; B ran for both resources.
        assert_eq!(a_runs.load(Ordering::SeqCst), 1);
        assert_eq!(b_runs.load(Ordering::SeqCst), 2);

        // B's merged state for r1 survived A's failure.
        let meta: Value = serde_json::from_slice(
            &std::fs::read(root.join("cache/r1/meta.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(meta["ran_plugin_b"], true);
    }

    #[tokio::test]
    async fn duplicate_slugs_drop_the_second_resource() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        // Both flatten to manifests/a; x/a.json is discovered first.
        write_manifest(root, "x/a.json", "https://example.org/iiif/first", 0);
        write_manifest(root, "y/a.json", "https://example.org/iiif/second", 0);

        let summary = build(test_config(root), PluginRegistry::with_builtins())
            .await
            .expect("build");
        assert_eq!(summary.resources, 1);

        let graph: Value = serde_json::from_slice(
            &std::fs::read(root.join("cache/manifests/a/graph.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(
            graph["id"], "https://example.org/iiif/first",
            "the first resource's data is retained unmodified"
        );
    }

    #[tokio::test]
    async fn canvas_did_change_re_persists_the_manifest_graph() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_manifest(root, "a.json", "https://example.org/iiif/a", 1);

        let mut registry = PluginRegistry::new();
        registry.register_enrichment(Arc::new(CanvasTagger));

        build(test_config(root), registry).await.expect("build");

        // The manifest registered no change of its own, yet the canvas's
        // did_change forced the graph to be re-persisted.
        let graph: Value = serde_json::from_slice(
            &std::fs::read(root.join("cache/a/graph.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(graph["tagged"], true);
    }

    #[tokio::test]
    async fn collection_membership_round_trips_through_collect_inject() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_manifest(root, "a.json", "https://example.org/iiif/a", 0);
        write_manifest(root, "b.json", "https://example.org/iiif/b", 0);

        let collection = json!({
            "id": "https://example.org/iiif/all",
            "type": "Collection",
            "label": { "en": ["Everything"] },
            "items": [
                { "id": "https://example.org/iiif/a", "type": "Manifest" },
                { "id": "https://example.org/iiif/b", "type": "Manifest" }
            ]
        });
        std::fs::write(
            root.join("content/all.json"),
            serde_json::to_vec_pretty(&collection).expect("json"),
        )
        .expect("write");

        build(test_config(root), PluginRegistry::with_builtins())
            .await
            .expect("build");

        // inject_manifest merged membership into each manifest's meta.
        let meta: Value = serde_json::from_slice(
            &std::fs::read(root.join("cache/manifests/a/meta.json")).expect("read"),
        )
        .expect("json");
        let part_of = meta["part_of_collections"].as_array().expect("membership");
        assert_eq!(part_of.len(), 1);
        assert_eq!(part_of[0]["slug"], "collections/all");

        // Emit pass 2 substituted the child snippets.
        let emitted: Value = serde_json::from_slice(
            &std::fs::read(root.join("build/collections/all/collection.json")).expect("read"),
        )
        .expect("json");
        let items = emitted["items"].as_array().expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0]["id"],
            "https://site.example/manifests/a/manifest.json"
        );
        assert_eq!(items[0]["label"]["en"][0], "a.json");
    }
}
