//! Emit stage: resolve identifiers and write the per-resource build tree.
//!
//! Two passes over the active set: non-Collection resources first (so
//! their snippets exist), then Collections, substituting child item
//! references with the already-computed snippets and rewriting
//! path-based or symbolic references to resolved absolute identifiers.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use tessella_cache::{ResourceCache, write_json};
use tessella_shared::{Result, ResourceType, TessellaError, document_id, document_kind};

use crate::context::BuildContext;
use crate::run::{ActiveResource, RunContext};

/// Snippets accumulated while emitting, consumed by the Index stage.
#[derive(Default)]
pub(crate) struct EmitOutput {
    /// Slug → snippet, every emitted resource.
    pub index_collection: BTreeMap<String, Value>,
    pub manifest_collection: Vec<Value>,
    /// Store id → member snippets.
    pub store_collections: BTreeMap<String, Vec<Value>>,
}

#[instrument(skip_all)]
pub(crate) async fn run(ctx: &BuildContext, run: &RunContext) -> Result<EmitOutput> {
    let mut output = EmitOutput::default();

    // Pass 1: everything that is not a Collection.
    for resource in &run.resources {
        if resource.descriptor.kind != ResourceType::Collection {
            emit_resource(ctx, run, resource, &mut output).await?;
        }
    }
    // Pass 2: Collections, with child snippets now available.
    for resource in &run.resources {
        if resource.descriptor.kind == ResourceType::Collection {
            emit_resource(ctx, run, resource, &mut output).await?;
        }
    }

    debug!(resources = output.index_collection.len(), "emit stage complete");
    Ok(output)
}

async fn emit_resource(
    ctx: &BuildContext,
    run: &RunContext,
    resource: &ActiveResource,
    output: &mut EmitOutput,
) -> Result<()> {
    let descriptor = &resource.descriptor;
    let cache = ResourceCache::new(&ctx.cache_dir, &descriptor.slug);
    let Some(mut graph) = cache.load_graph().await? else {
        warn!(slug = descriptor.slug, "missing graph state, not emitted");
        return Ok(());
    };
    let meta = cache.meta().get().await;

    // Resources not written to disk keep their source identifier.
    let url = if descriptor.save_to_disk {
        ctx.make_id(descriptor.kind, &descriptor.slug)
    } else {
        descriptor.path.clone()
    };

    let label = match meta.get("label") {
        Some(Value::String(text)) => json!({ "en": [text] }),
        _ => graph.as_value().get("label").cloned().unwrap_or(Value::Null),
    };
    let thumbnail = graph
        .thumbnail()
        .cloned()
        .or_else(|| meta.get("thumbnail").cloned());

    let mut snippet = json!({
        "id": url,
        "type": descriptor.kind.to_string(),
        "label": label,
    });
    if let (Some(object), Some(thumbnail)) = (snippet.as_object_mut(), thumbnail) {
        object.insert("thumbnail".to_string(), thumbnail);
    }

    output
        .index_collection
        .insert(descriptor.slug.clone(), snippet.clone());
    if descriptor.kind == ResourceType::Manifest {
        output.manifest_collection.push(snippet.clone());
    }
    output
        .store_collections
        .entry(descriptor.store_id.clone())
        .or_default()
        .push(snippet);

    let resource_build_dir = ctx.build_dir.join(&descriptor.slug);

    if descriptor.save_to_disk {
        graph.set_id(ctx.make_id(descriptor.kind, &descriptor.slug));

        if descriptor.kind == ResourceType::Collection {
            let resolved: Vec<Value> = graph
                .items()
                .into_iter()
                .map(|item| resolve_item(ctx, run, output, item))
                .collect();
            graph.set_items(resolved);
        }

        write_json(
            &resource_build_dir.join(descriptor.kind.document_file()),
            graph.as_value(),
        )
        .await?;
    }

    write_json(&resource_build_dir.join("meta.json"), meta).await?;

    let files_dir = cache.files_dir();
    if files_dir.is_dir() {
        copy_tree(&files_dir, &resource_build_dir)?;
    }

    Ok(())
}

/// Resolve one collection item reference: substitute the child's
/// snippet when the child was emitted, otherwise rewrite a known id or
/// path to its resolved absolute identifier.
fn resolve_item(
    ctx: &BuildContext,
    run: &RunContext,
    output: &EmitOutput,
    item: &Value,
) -> Value {
    let reference = document_id(item);

    let resolved_slug = reference.and_then(|reference| {
        run.id_to_slug
            .get(reference)
            .map(|(slug, kind)| (slug.clone(), *kind))
            .or_else(|| {
                // Path-based reference into a store's source tree.
                run.all_paths.get(reference).map(|slug| {
                    let kind = document_kind(item).unwrap_or(ResourceType::Manifest);
                    (slug.clone(), kind)
                })
            })
    });

    let Some((slug, kind)) = resolved_slug else {
        return item.clone();
    };

    if let Some(snippet) = output.index_collection.get(&slug) {
        return snippet.clone();
    }

    let mut resolved = item.clone();
    if let Some(object) = resolved.as_object_mut() {
        let key = if object.contains_key("@id") { "@id" } else { "id" };
        object.insert(key.to_string(), Value::String(ctx.make_id(kind, &slug)));
    }
    resolved
}

/// Copy a directory tree of derived assets into the build tree.
pub(crate) fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).map_err(|e| TessellaError::io(dst, e))?;
    let entries = std::fs::read_dir(src).map_err(|e| TessellaError::io(src, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| TessellaError::io(src, e))?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to).map_err(|e| TessellaError::io(&from, e))?;
        }
    }
    Ok(())
}
