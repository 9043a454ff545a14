//! Extract stage: read-only derivation from each resource's document.
//!
//! Resources are visited sequentially; within one resource, its
//! applicable plugins are launched and joined together, with a separate
//! concurrent sub-loop for its canvases. A rejection from one plugin
//! never prevents sibling plugins from completing; all failures across
//! the stage are aggregated and thrown once, after every successful
//! effect has been persisted.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use tessella_cache::ResourceCache;
use tessella_plugins::{CollectApi, Extraction, ExtractionApi, PluginResult};
use tessella_shared::{
    Document, Result, ResourceDescriptor, ResourceType, StageFailure, TessellaError,
};

use crate::context::BuildContext;
use crate::run::RunContext;
use crate::stage::stage_effects;

#[instrument(skip_all)]
pub(crate) async fn run(ctx: &BuildContext, run: &mut RunContext) -> Result<()> {
    // Attach object graphs for resources that were served from cache.
    for resource in &mut run.resources {
        if resource.graph.is_none() {
            let cache = ResourceCache::new(&ctx.cache_dir, &resource.descriptor.slug);
            match cache.load_graph().await? {
                Some(graph) => resource.graph = Some(Arc::new(Mutex::new(graph))),
                None => warn!(
                    slug = resource.descriptor.slug,
                    "missing graph state, skipping resource"
                ),
            }
        }
    }

    let mut failures: Vec<StageFailure> = Vec::new();
    let mut flushes: Vec<ResourceCache> = Vec::new();

    {
        let RunContext {
            resources,
            temp,
            collections,
            ..
        } = &mut *run;

        for resource in resources.iter() {
            let Some(graph) = resource.graph.clone() else {
                continue;
            };
            let descriptor = &resource.descriptor;
            let Some(store) = ctx.store_config(&descriptor.store_id) else {
                continue;
            };

            let plugins = ctx
                .registry
                .extractions_for(descriptor.kind, ctx.allow(), store);
            let canvas_plugins = if descriptor.kind == ResourceType::Manifest {
                ctx.registry
                    .extractions_for(ResourceType::Canvas, ctx.allow(), store)
            } else {
                Vec::new()
            };
            if plugins.is_empty() && canvas_plugins.is_empty() {
                continue;
            }

            let graph_guard = graph.lock().await;
            let mut cache = ResourceCache::new(&ctx.cache_dir, &descriptor.slug);

            // The resource's own plugins, launched and joined together.
            let results = {
                let api = extraction_api(ctx, &cache, &graph_guard);
                join_all(plugins.iter().map(|plugin| {
                    invoke(plugin.as_ref(), descriptor, &api, ctx.options.cache)
                }))
                .await
            };
            for (plugin, outcome) in plugins.iter().zip(results) {
                match outcome {
                    Ok(None) => {}
                    Ok(Some(result)) => {
                        let (temp_value, buckets, _) = stage_effects(&mut cache, result);
                        if let Some(value) = temp_value {
                            temp.record(plugin.id(), &descriptor.slug, value);
                        }
                        for bucket in buckets {
                            let members = collections.entry(bucket).or_default();
                            if !members.contains(&descriptor.slug) {
                                members.push(descriptor.slug.clone());
                            }
                        }
                    }
                    Err(e) => failures.push(StageFailure {
                        slug: descriptor.slug.clone(),
                        plugin: plugin.id().to_string(),
                        message: e.to_string(),
                    }),
                }
            }

            // Canvas sub-pipeline: every canvas concurrently, each with
            // its own cache scope and invalidation.
            if !canvas_plugins.is_empty() {
                let canvases = graph_guard.canvas_documents();
                let canvas_outcomes = join_all(canvases.iter().enumerate().map(
                    |(index, canvas)| {
                        extract_canvas(ctx, descriptor, index, canvas, &canvas_plugins, &cache)
                    },
                ))
                .await;
                for outcome in canvas_outcomes {
                    failures.extend(outcome.failures);
                    for (plugin_id, index, value) in outcome.temps {
                        temp.record_canvas(&plugin_id, &descriptor.slug, index, value);
                    }
                    if outcome.cache.has_staged() {
                        flushes.push(outcome.cache);
                    }
                }

                // Fold the canvas contributions back into the manifest.
                let folds = {
                    let api = extraction_api(ctx, &cache, &graph_guard);
                    let mut folds = Vec::new();
                    for plugin in &canvas_plugins {
                        let canvas_temp = temp.canvas_contributions(plugin.id(), &descriptor.slug);
                        if canvas_temp.is_empty() {
                            continue;
                        }
                        folds.push((
                            plugin.id(),
                            plugin.collect_manifest(descriptor, &canvas_temp, &api).await,
                        ));
                    }
                    folds
                };
                for (plugin_id, outcome) in folds {
                    match outcome {
                        Ok(result) => {
                            let (temp_value, _, _) = stage_effects(&mut cache, result);
                            if let Some(value) = temp_value {
                                temp.record(plugin_id, &descriptor.slug, value);
                            }
                        }
                        Err(e) => failures.push(StageFailure {
                            slug: descriptor.slug.clone(),
                            plugin: plugin_id.to_string(),
                            message: e.to_string(),
                        }),
                    }
                }
            }

            if cache.has_staged() {
                flushes.push(cache);
            }
        }
    }

    // One flush wave at the stage boundary.
    debug!(files = flushes.len(), "flushing extract stage");
    for result in join_all(flushes.into_iter().map(ResourceCache::flush)).await {
        result?;
    }

    // Two-phase cross-resource aggregation.
    failures.extend(collect_and_inject(ctx, run).await?);

    if failures.is_empty() {
        Ok(())
    } else {
        Err(TessellaError::Stage {
            stage: "extract",
            failures,
        })
    }
}

fn extraction_api<'a>(
    ctx: &'a BuildContext,
    cache: &'a ResourceCache,
    document: &'a Document,
) -> ExtractionApi<'a> {
    ExtractionApi {
        document,
        meta: cache.meta(),
        indices: cache.indices(),
        caches: cache.caches(),
        config: &ctx.config,
        server_url: &ctx.server_url,
        files_dir: cache.files_dir(),
    }
}

/// Gate on `invalidate` when caching is enabled, then run the handler.
/// `Ok(None)` means the cached state is still valid.
async fn invoke(
    plugin: &dyn Extraction,
    descriptor: &ResourceDescriptor,
    api: &ExtractionApi<'_>,
    use_cache: bool,
) -> Result<Option<PluginResult>> {
    if use_cache && !plugin.invalidate(descriptor, api).await? {
        debug!(plugin = plugin.id(), slug = descriptor.slug, "not modified, skipping");
        return Ok(None);
    }
    debug!(plugin = plugin.id(), slug = descriptor.slug, "running extraction");
    plugin.handler(descriptor, api).await.map(Some)
}

struct CanvasOutcome {
    cache: ResourceCache,
    /// (plugin id, canvas index, temp value)
    temps: Vec<(String, usize, Value)>,
    failures: Vec<StageFailure>,
}

async fn extract_canvas(
    ctx: &BuildContext,
    manifest: &ResourceDescriptor,
    index: usize,
    canvas: &Document,
    plugins: &[Arc<dyn Extraction>],
    manifest_cache: &ResourceCache,
) -> CanvasOutcome {
    let descriptor = manifest.canvas(index);
    let mut cache = manifest_cache.canvas_scope(index);
    let mut temps = Vec::new();
    let mut failures = Vec::new();

    let results = {
        let api = extraction_api(ctx, &cache, canvas);
        join_all(
            plugins
                .iter()
                .map(|plugin| invoke(plugin.as_ref(), &descriptor, &api, ctx.options.cache)),
        )
        .await
    };

    for (plugin, outcome) in plugins.iter().zip(results) {
        match outcome {
            Ok(None) => {}
            Ok(Some(result)) => {
                let (temp_value, _, _) = stage_effects(&mut cache, result);
                if let Some(value) = temp_value {
                    temps.push((plugin.id().to_string(), index, value));
                }
            }
            Err(e) => failures.push(StageFailure {
                slug: descriptor.slug.clone(),
                plugin: plugin.id().to_string(),
                message: e.to_string(),
            }),
        }
    }

    CanvasOutcome {
        cache,
        temps,
        failures,
    }
}

/// Phase 2 of the aggregation protocol: each plugin's `collect` reduces
/// the full temp map into per-resource patches, then `inject_manifest`
/// applies each patch, with the results merged and persisted in a
/// second write wave.
async fn collect_and_inject(ctx: &BuildContext, run: &RunContext) -> Result<Vec<StageFailure>> {
    let mut failures = Vec::new();
    let mut flushes = Vec::new();
    let collect_api = CollectApi {
        config: &ctx.config,
        server_url: &ctx.server_url,
    };

    for plugin in ctx.registry.all_extractions() {
        let contributions = run.temp.contributions(plugin.id());
        if contributions.is_empty() {
            continue;
        }

        let patches = match plugin.collect(&contributions, &collect_api).await {
            Ok(Some(patches)) => patches,
            Ok(None) => continue,
            Err(e) => {
                failures.push(StageFailure {
                    slug: "(collect)".to_string(),
                    plugin: plugin.id().to_string(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        debug!(plugin = plugin.id(), patches = patches.len(), "applying collect patches");

        for (slug, patch) in patches {
            let Some(resource) = run.resource(&slug) else {
                warn!(slug, plugin = plugin.id(), "collect patch for inactive resource");
                continue;
            };
            let Some(graph) = resource.graph.clone() else {
                continue;
            };
            let graph_guard = graph.lock().await;
            let mut cache = ResourceCache::new(&ctx.cache_dir, &slug);

            let outcome = {
                let api = extraction_api(ctx, &cache, &graph_guard);
                plugin
                    .inject_manifest(&resource.descriptor, &patch, &api)
                    .await
            };
            match outcome {
                Ok(result) => {
                    stage_effects(&mut cache, result);
                    if cache.has_staged() {
                        flushes.push(cache);
                    }
                }
                Err(e) => failures.push(StageFailure {
                    slug: slug.clone(),
                    plugin: plugin.id().to_string(),
                    message: e.to_string(),
                }),
            }
        }
    }

    for result in join_all(flushes.into_iter().map(ResourceCache::flush)).await {
        result?;
    }
    Ok(failures)
}
