//! Enrich stage: augmentation of each resource's object graph.
//!
//! Unlike Extract, every resource's full per-resource pipeline is
//! launched concurrently and joined once at the end. An optional
//! `enrich_concurrency` bound caps the fan-out; the default is
//! unbounded. A canvas handler's `did_change` marks the owning manifest
//! dirty so its graph is re-persisted, never the reverse.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use tessella_cache::ResourceCache;
use tessella_plugins::{CollectApi, Enrichment, EnrichmentApi, PluginResult};
use tessella_shared::{
    Document, Result, ResourceDescriptor, ResourceType, StageFailure, TessellaError,
};

use crate::context::BuildContext;
use crate::run::{ActiveResource, RunContext};
use crate::stage::stage_effects;

#[instrument(skip_all)]
pub(crate) async fn run(ctx: &BuildContext, run: &mut RunContext) -> Result<()> {
    let futures: Vec<_> = run
        .resources
        .iter()
        .map(|resource| enrich_resource(ctx, resource))
        .collect();

    let outcomes = match ctx.config.build.enrich_concurrency {
        Some(limit) if limit > 0 => {
            futures::stream::iter(futures)
                .buffer_unordered(limit)
                .collect::<Vec<_>>()
                .await
        }
        _ => join_all(futures).await,
    };

    let mut failures = Vec::new();
    let mut flushes = Vec::new();
    for outcome in outcomes {
        failures.extend(outcome.failures);
        for (plugin_id, value) in outcome.temps {
            run.temp.record(&plugin_id, &outcome.slug, value);
        }
        for (plugin_id, index, value) in outcome.canvas_temps {
            run.temp.record_canvas(&plugin_id, &outcome.slug, index, value);
        }
        for bucket in outcome.collections {
            run.join_collection(&bucket, &outcome.slug);
        }
        flushes.push(flush_outcome(outcome.cache, outcome.dirty_graph));
        for canvas_cache in outcome.canvas_caches {
            flushes.push(flush_outcome(canvas_cache, None));
        }
    }

    // One flush wave: staged cache records plus re-persisted graphs.
    debug!(files = flushes.len(), "flushing enrich stage");
    for result in join_all(flushes).await {
        result?;
    }

    failures.extend(collect_enrichments(ctx, run).await?);

    if failures.is_empty() {
        Ok(())
    } else {
        Err(TessellaError::Stage {
            stage: "enrich",
            failures,
        })
    }
}

async fn flush_outcome(
    cache: ResourceCache,
    dirty_graph: Option<Arc<Mutex<Document>>>,
) -> Result<()> {
    if let Some(graph) = dirty_graph {
        let guard = graph.lock().await;
        cache.save_graph(&guard).await?;
    }
    cache.flush().await?;
    Ok(())
}

struct EnrichOutcome {
    slug: String,
    cache: ResourceCache,
    canvas_caches: Vec<ResourceCache>,
    /// Present when the graph was mutated and must be re-persisted.
    dirty_graph: Option<Arc<Mutex<Document>>>,
    temps: Vec<(String, Value)>,
    canvas_temps: Vec<(String, usize, Value)>,
    collections: Vec<String>,
    failures: Vec<StageFailure>,
}

async fn enrich_resource(ctx: &BuildContext, resource: &ActiveResource) -> EnrichOutcome {
    let descriptor = &resource.descriptor;
    let mut outcome = EnrichOutcome {
        slug: descriptor.slug.clone(),
        cache: ResourceCache::new(&ctx.cache_dir, &descriptor.slug),
        canvas_caches: Vec::new(),
        dirty_graph: None,
        temps: Vec::new(),
        canvas_temps: Vec::new(),
        collections: Vec::new(),
        failures: Vec::new(),
    };

    let Some(graph) = resource.graph.clone() else {
        return outcome;
    };
    let Some(store) = ctx.store_config(&descriptor.store_id) else {
        return outcome;
    };

    let plugins = ctx
        .registry
        .enrichments_for(descriptor.kind, ctx.allow(), store);
    let canvas_plugins = if descriptor.kind == ResourceType::Manifest {
        ctx.registry
            .enrichments_for(ResourceType::Canvas, ctx.allow(), store)
    } else {
        Vec::new()
    };
    if plugins.is_empty() && canvas_plugins.is_empty() {
        return outcome;
    }

    let request_cache = ctx
        .request_cache(&descriptor.store_id)
        .map(|cache| cache.as_ref());
    let mut did_change = false;

    let results = {
        let api = enrichment_api(ctx, &outcome.cache, &graph, request_cache);
        join_all(
            plugins
                .iter()
                .map(|plugin| invoke(plugin.as_ref(), descriptor, &api, ctx.options.cache)),
        )
        .await
    };
    for (plugin, result) in plugins.iter().zip(results) {
        match result {
            Ok(None) => {}
            Ok(Some(result)) => {
                let (temp_value, buckets, changed) = stage_effects(&mut outcome.cache, result);
                if let Some(value) = temp_value {
                    outcome.temps.push((plugin.id().to_string(), value));
                }
                outcome.collections.extend(buckets);
                did_change |= changed;
            }
            Err(e) => outcome.failures.push(StageFailure {
                slug: descriptor.slug.clone(),
                plugin: plugin.id().to_string(),
                message: e.to_string(),
            }),
        }
    }

    // Canvas sub-pipeline; dirt propagates up to the manifest.
    if !canvas_plugins.is_empty() {
        let canvas_count = { graph.lock().await.canvases().len() };
        let canvas_outcomes = join_all((0..canvas_count).map(|index| {
            enrich_canvas(
                ctx,
                descriptor,
                index,
                &graph,
                &canvas_plugins,
                &outcome.cache,
                request_cache,
            )
        }))
        .await;
        for canvas in canvas_outcomes {
            did_change |= canvas.did_change;
            outcome.failures.extend(canvas.failures);
            outcome.canvas_temps.extend(canvas.temps);
            if canvas.cache.has_staged() {
                outcome.canvas_caches.push(canvas.cache);
            }
        }
    }

    if did_change {
        outcome.dirty_graph = Some(graph);
    }
    outcome
}

fn enrichment_api<'a>(
    ctx: &'a BuildContext,
    cache: &'a ResourceCache,
    graph: &'a Mutex<Document>,
    request_cache: Option<&'a tessella_cache::RequestCache>,
) -> EnrichmentApi<'a> {
    EnrichmentApi {
        graph,
        meta: cache.meta(),
        indices: cache.indices(),
        caches: cache.caches(),
        config: &ctx.config,
        server_url: &ctx.server_url,
        files_dir: cache.files_dir(),
        request_cache,
    }
}

async fn invoke(
    plugin: &dyn Enrichment,
    descriptor: &ResourceDescriptor,
    api: &EnrichmentApi<'_>,
    use_cache: bool,
) -> Result<Option<PluginResult>> {
    if use_cache && !plugin.invalidate(descriptor, api).await? {
        debug!(plugin = plugin.id(), slug = descriptor.slug, "not modified, skipping");
        return Ok(None);
    }
    debug!(plugin = plugin.id(), slug = descriptor.slug, "running enrichment");
    plugin.handler(descriptor, api).await.map(Some)
}

struct CanvasOutcome {
    cache: ResourceCache,
    temps: Vec<(String, usize, Value)>,
    did_change: bool,
    failures: Vec<StageFailure>,
}

#[allow(clippy::too_many_arguments)]
async fn enrich_canvas(
    ctx: &BuildContext,
    manifest: &ResourceDescriptor,
    index: usize,
    graph: &Arc<Mutex<Document>>,
    plugins: &[Arc<dyn Enrichment>],
    manifest_cache: &ResourceCache,
    request_cache: Option<&tessella_cache::RequestCache>,
) -> CanvasOutcome {
    let descriptor = manifest.canvas(index);
    let mut cache = manifest_cache.canvas_scope(index);
    let mut temps = Vec::new();
    let mut failures = Vec::new();
    let mut did_change = false;

    let results = {
        let api = enrichment_api(ctx, &cache, graph, request_cache);
        join_all(
            plugins
                .iter()
                .map(|plugin| invoke(plugin.as_ref(), &descriptor, &api, ctx.options.cache)),
        )
        .await
    };

    for (plugin, result) in plugins.iter().zip(results) {
        match result {
            Ok(None) => {}
            Ok(Some(result)) => {
                let (temp_value, _, changed) = stage_effects(&mut cache, result);
                if let Some(value) = temp_value {
                    temps.push((plugin.id().to_string(), index, value));
                }
                did_change |= changed;
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
        did_change,
        failures,
    }
}

/// Enrichment `collect` is a terminal reduction: returned patches are
/// merged straight into each resource's meta record.
async fn collect_enrichments(ctx: &BuildContext, run: &RunContext) -> Result<Vec<StageFailure>> {
    let mut failures = Vec::new();
    let mut flushes = Vec::new();
    let collect_api = CollectApi {
        config: &ctx.config,
        server_url: &ctx.server_url,
    };

    for plugin in ctx.registry.all_enrichments() {
        let contributions = run.temp.contributions(plugin.id());
        if contributions.is_empty() {
            continue;
        }
        match plugin.collect(&contributions, &collect_api).await {
            Ok(None) => {}
            Ok(Some(patches)) => {
                for (slug, patch) in patches {
                    let Some(object) = patch.as_object() else {
                        warn!(slug, plugin = plugin.id(), "non-object enrichment patch, ignoring");
                        continue;
                    };
                    let mut cache = ResourceCache::new(&ctx.cache_dir, &slug);
                    cache.stage_meta(object.clone());
                    flushes.push(cache);
                }
            }
            Err(e) => failures.push(StageFailure {
                slug: "(collect)".to_string(),
                plugin: plugin.id().to_string(),
                message: e.to_string(),
            }),
        }
    }

    for result in join_all(flushes.into_iter().map(ResourceCache::flush)).await {
        result?;
    }
    Ok(failures)
}
