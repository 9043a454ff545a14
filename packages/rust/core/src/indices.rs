//! Index stage: fold per-resource indices into aggregate documents.
//!
//! Builds the membership collections, the hierarchical topic tree
//! (`topicType → topic → [resourceSlug]`), the flat aggregates (root,
//! all-manifests, per-store), and the meta/config outputs. Skipped
//! entirely for narrowed builds (`--exact`, `--stores`).

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, instrument};

use tessella_cache::{ResourceCache, write_json};
use tessella_shared::{Result, ResourceType};

use crate::context::BuildContext;
use crate::emit::EmitOutput;
use crate::run::RunContext;

/// Extension property carrying an aggregate's item count.
const TOTAL_ITEMS: &str = "tessella:totalItems";

#[instrument(skip_all)]
pub(crate) async fn run(ctx: &BuildContext, run: &RunContext, emitted: EmitOutput) -> Result<()> {
    if ctx.options.exact.is_some() || !ctx.options.stores.is_empty() {
        debug!("narrowed build, skipping aggregate indices");
        return Ok(());
    }

    let EmitOutput {
        mut index_collection,
        manifest_collection,
        store_collections,
    } = emitted;
    let mut top_level: Vec<Value> = Vec::new();

    // -----------------------------------------------------------------------
    // Membership collections (fed by plugin `collections` results)
    // -----------------------------------------------------------------------

    for (bucket, members) in &run.collections {
        let mut slug = if bucket.starts_with("collections/") {
            bucket.clone()
        } else {
            format!("collections/{bucket}")
        };
        for rewrite in ctx.registry.rewrites_for(ResourceType::Collection, ctx.allow()) {
            if let Some(new_slug) = rewrite.rewrite(&slug, ResourceType::Collection) {
                slug = new_slug;
            }
        }
        // A real resource already owns this slug; nothing to synthesize.
        if index_collection.contains_key(&slug) {
            continue;
        }

        let items: Vec<Value> = members
            .iter()
            .filter_map(|member| index_collection.get(member).cloned())
            .collect();
        let mut snippet = create_collection(&ctx.server_url, &slug, bucket);
        set_total(&mut snippet, items.len());

        let mut document = snippet.clone();
        if let Some(object) = document.as_object_mut() {
            object.insert("items".to_string(), Value::Array(items));
        }
        write_json(
            &ctx.build_dir.join(&slug).join("collection.json"),
            &document,
        )
        .await?;

        top_level.push(snippet.clone());
        index_collection.insert(slug, snippet);
    }

    // -----------------------------------------------------------------------
    // Topic tree
    // -----------------------------------------------------------------------

    let mut index_map: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
    for resource in &run.resources {
        let slug = &resource.descriptor.slug;
        let cache = ResourceCache::new(&ctx.cache_dir, slug);
        for (topic_type, values) in cache.indices().get().await {
            let topics = index_map.entry(topic_type.clone()).or_default();
            for value in values {
                let entry = topics.entry(value.clone()).or_default();
                if !entry.contains(slug) {
                    entry.push(slug.clone());
                }
            }
        }
    }

    if !index_map.is_empty() {
        let topics_snippet = create_collection(&ctx.server_url, "topics", "Topics");
        top_level.push(topics_snippet.clone());
        let mut topics_items = Vec::new();

        for (topic_type, topics) in &index_map {
            let type_slug = format!("topics/{}", slugify(topic_type));
            let mut type_snippet = create_collection(&ctx.server_url, &type_slug, topic_type);
            let mut type_items = Vec::new();

            for (topic, slugs) in topics {
                let topic_slug = format!("{type_slug}/{}", slugify(topic));
                let mut topic_snippet = create_collection(&ctx.server_url, &topic_slug, topic);

                let items: Vec<Value> = slugs
                    .iter()
                    .filter_map(|slug| index_collection.get(slug).cloned())
                    .collect();
                set_total(&mut topic_snippet, items.len());

                let mut topic_document = topic_snippet.clone();
                if let Some(object) = topic_document.as_object_mut() {
                    object.insert("items".to_string(), Value::Array(items));
                }
                let topic_meta = json!({
                    "id": slugify(topic),
                    "label": topic,
                    "slug": topic_slug,
                });

                let topic_dir = ctx.build_dir.join(&topic_slug);
                write_json(&topic_dir.join("collection.json"), &topic_document).await?;
                write_json(&topic_dir.join("meta.json"), &topic_meta).await?;

                type_items.push(topic_snippet.clone());
                index_collection.insert(topic_slug, topic_snippet);
            }

            set_total(&mut type_snippet, type_items.len());
            let mut type_document = type_snippet.clone();
            if let Some(object) = type_document.as_object_mut() {
                object.insert("items".to_string(), Value::Array(type_items));
            }
            let type_meta = json!({
                "id": slugify(topic_type),
                "label": topic_type,
                "slug": type_slug,
            });

            let type_dir = ctx.build_dir.join(&type_slug);
            write_json(&type_dir.join("collection.json"), &type_document).await?;
            write_json(&type_dir.join("meta.json"), &type_meta).await?;

            topics_items.push(type_snippet.clone());
            top_level.push(type_snippet.clone());
            index_collection.insert(type_slug, type_snippet);
        }

        let mut topics_document = topics_snippet;
        if let Some(object) = topics_document.as_object_mut() {
            object.insert("items".to_string(), Value::Array(topics_items));
        }
        write_json(
            &ctx.build_dir.join("topics/collection.json"),
            &topics_document,
        )
        .await?;
    }

    // -----------------------------------------------------------------------
    // Flat aggregates
    // -----------------------------------------------------------------------

    for (store_id, items) in &store_collections {
        let slug = format!("stores/{store_id}");
        let mut snippet = create_collection(&ctx.server_url, &slug, store_id);
        set_total(&mut snippet, items.len());
        top_level.push(snippet.clone());

        let mut document = snippet;
        if let Some(object) = document.as_object_mut() {
            object.insert("items".to_string(), Value::Array(items.clone()));
        }
        write_json(
            &ctx.build_dir.join(&slug).join("collection.json"),
            &document,
        )
        .await?;
    }

    let mut manifests_document = create_collection(&ctx.server_url, "manifests", "Manifests");
    if let Some(object) = manifests_document.as_object_mut() {
        object.insert("items".to_string(), Value::Array(manifest_collection));
    }
    write_json(
        &ctx.build_dir.join("manifests/collection.json"),
        &manifests_document,
    )
    .await?;

    let mut collections_document = create_collection(&ctx.server_url, "collections", "Collections");
    if let Some(object) = collections_document.as_object_mut() {
        object.insert("items".to_string(), Value::Array(top_level));
    }
    write_json(
        &ctx.build_dir.join("collections/collection.json"),
        &collections_document,
    )
    .await?;

    let mut root_document = create_collection(&ctx.server_url, "", "Index");
    if let Some(object) = root_document.as_object_mut() {
        object.insert(
            "items".to_string(),
            Value::Array(index_collection.into_values().collect()),
        );
    }
    write_json(&ctx.build_dir.join("collection.json"), &root_document).await?;

    // -----------------------------------------------------------------------
    // Meta + config outputs
    // -----------------------------------------------------------------------

    let meta_dir = ctx.build_dir.join("meta");
    write_json(&meta_dir.join("indices.json"), &index_map).await?;
    write_json(&meta_dir.join("sitemap.json"), &run.site_map).await?;
    write_json(&meta_dir.join("editable.json"), &run.editable).await?;
    write_json(&meta_dir.join("overrides.json"), &run.overrides).await?;

    let config_dir = ctx.build_dir.join("config");
    write_json(&config_dir.join("slugs.json"), &ctx.config.slugs).await?;
    write_json(&config_dir.join("stores.json"), &ctx.config.stores).await?;

    debug!("index stage complete");
    Ok(())
}

/// Snippet for an aggregate collection at `slug`.
fn create_collection(server_url: &str, slug: &str, label: &str) -> Value {
    let id = if slug.is_empty() {
        format!("{server_url}/collection.json")
    } else {
        format!("{server_url}/{slug}/collection.json")
    };
    json!({
        "@context": "http://iiif.io/api/presentation/3/context.json",
        "id": id,
        "type": "Collection",
        "label": { "en": [label] },
    })
}

fn set_total(snippet: &mut Value, count: usize) {
    if let Some(object) = snippet.as_object_mut() {
        object.insert(TOTAL_ITEMS.to_string(), json!(count));
    }
}

/// URL-safe identifier for a topic label.
fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_dash = true;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}
