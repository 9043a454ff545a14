//! Discover stage: store parsing, slug finalization, uniqueness.

use std::collections::HashSet;

use tracing::{debug, instrument, warn};

use tessella_shared::{ParsedResource, Result};

use crate::context::BuildContext;

/// Parse every selected store, finalize slugs through the rewrite
/// plugins, apply the `--exact` narrowing, and enforce slug uniqueness
/// (the second resource mapping to an already-seen slug is dropped with
/// a warning, never an error).
#[instrument(skip_all)]
pub(crate) async fn run(ctx: &BuildContext) -> Result<Vec<ParsedResource>> {
    let mut discovered = Vec::new();
    let mut unique: HashSet<String> = HashSet::new();

    for entry in ctx.stores() {
        let api = ctx.store_api(entry);
        let resources = entry.adapter.parse(&api).await?;
        debug!(store = entry.id, count = resources.len(), "store parsed");

        for mut resource in resources {
            for rewrite in ctx.registry.rewrites_for(resource.kind, ctx.allow()) {
                if let Some(new_slug) = rewrite.rewrite(&resource.slug, resource.kind) {
                    resource.slug = new_slug;
                }
            }

            if let Some(exact) = &ctx.options.exact
                && resource.slug != *exact
                && resource.path != *exact
            {
                continue;
            }

            // Uniqueness check, after rewrites.
            if !unique.insert(resource.slug.clone()) {
                warn!(
                    slug = resource.slug,
                    path = resource.path,
                    "duplicate slug, dropping resource"
                );
                continue;
            }

            discovered.push(resource);
        }
    }

    Ok(discovered)
}
