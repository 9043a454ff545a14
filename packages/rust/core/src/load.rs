//! Load stage: hydrate working state and the per-resource cache.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use tessella_cache::{ResourceCache, read_json_opt, write_json};
use tessella_shared::{ParsedResource, Result, ResourceDescriptor, ResourceOrigin};

use crate::context::{BuildContext, ProgressReporter};
use crate::run::{ActiveResource, RunContext, SiteMapEntry};

/// For each discovered resource: evaluate the store's invalidation
/// against the cached tokens, re-load and persist when stale, otherwise
/// re-hydrate the cached descriptor. Also builds the run's lookup maps
/// (sitemap, editable sources, overrides, path → slug).
#[instrument(skip_all)]
pub(crate) async fn run(
    ctx: &BuildContext,
    run: &mut RunContext,
    discovered: Vec<ParsedResource>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let total = discovered.len();

    for (index, resource) in discovered.into_iter().enumerate() {
        progress.resource(&resource.slug, index + 1, total);

        let Some(entry) = ctx.store(&resource.store_id) else {
            warn!(store = resource.store_id, "resource from unknown store, skipping");
            continue;
        };
        let api = ctx.store_api(entry);
        let cache = ResourceCache::new(&ctx.cache_dir, &resource.slug);

        let cached_descriptor: Option<ResourceDescriptor> = if ctx.options.cache {
            read_json_opt(&cache.root().join("resource.json")).await?
        } else {
            None
        };

        let still_valid = match &cached_descriptor {
            Some(_) => {
                ctx.options.cache
                    && !entry
                        .adapter
                        .invalidate(&resource, cache.caches().get().await)
                        .await?
            }
            None => false,
        };

        let descriptor = match (still_valid, cached_descriptor) {
            (true, Some(descriptor)) => {
                debug!(slug = resource.slug, "resource not modified");
                run.stats.cached += 1;
                run.resources.push(ActiveResource {
                    descriptor: descriptor.clone(),
                    graph: None,
                });
                descriptor
            }
            _ => {
                debug!(slug = resource.slug, "loading resource");
                run.stats.rebuilt += 1;

                let loaded = entry.adapter.load(&resource, cache.root(), &api).await?;

                // One write wave per resource.
                let root = cache.root();
                let writes = [
                    (root.join("resource.json"), serde_json::to_value(&loaded.descriptor)?),
                    (root.join("graph.json"), loaded.graph.as_value().clone()),
                    (root.join("meta.json"), serde_json::to_value(&loaded.meta)?),
                    (root.join("indices.json"), serde_json::to_value(&loaded.indices)?),
                    (root.join("caches.json"), serde_json::to_value(&loaded.caches)?),
                ];
                let results =
                    join_all(writes.iter().map(|(path, value)| write_json(path, value))).await;
                for result in results {
                    result?;
                }

                run.resources.push(ActiveResource {
                    descriptor: loaded.descriptor.clone(),
                    graph: Some(Arc::new(Mutex::new(loaded.graph))),
                });
                loaded.descriptor
            }
        };

        // Run-wide lookup maps, after slugs are final.
        run.site_map.insert(
            descriptor.slug.clone(),
            SiteMapEntry {
                kind: descriptor.kind,
                source: descriptor.origin.location(),
            },
        );

        match &descriptor.origin {
            ResourceOrigin::Disk { path, alias } => {
                run.editable
                    .insert(descriptor.slug.clone(), path.display().to_string());
                if let Some(alias) = alias {
                    run.overrides.insert(
                        alias.clone(),
                        format!("{}/{}", descriptor.slug, descriptor.kind.document_file()),
                    );
                }
            }
            ResourceOrigin::Remote { .. } if descriptor.save_to_disk => {
                run.overrides.insert(
                    descriptor.slug.clone(),
                    format!("{}/{}", descriptor.slug, descriptor.kind.document_file()),
                );
            }
            ResourceOrigin::Remote { .. } => {}
        }

        run.all_paths
            .insert(resource.path.clone(), descriptor.slug.clone());
        for sub_file in &resource.sub_files {
            run.all_paths.insert(
                sub_file.to_string_lossy().replace('\\', "/"),
                descriptor.slug.clone(),
            );
        }
        run.id_to_slug.insert(
            descriptor.id.clone(),
            (descriptor.slug.clone(), descriptor.kind),
        );
    }

    debug!(
        resources = run.resources.len(),
        cached = run.stats.cached,
        rebuilt = run.stats.rebuilt,
        "load stage complete"
    );
    Ok(())
}
