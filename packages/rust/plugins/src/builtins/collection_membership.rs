//! Two-phase collection membership.
//!
//! Which collections contain a manifest is only knowable after every
//! resource has been processed, so this runs the full collect/inject
//! protocol: handlers contribute id mappings as `temp`, `collect`
//! reduces them into per-manifest patches, and `inject_manifest` writes
//! each manifest's `part_of_collections` meta.

use async_trait::async_trait;
use serde_json::{Value, json};

use tessella_shared::{JsonObject, Result, ResourceDescriptor, ResourceType, document_id};

use crate::api::{CollectApi, CollectPatches, ExtractionApi, TempContributions};
use crate::result::PluginResult;
use crate::traits::{Extraction, Plugin};

pub struct CollectionMembership;

const TYPES: &[ResourceType] = &[ResourceType::Manifest, ResourceType::Collection];

#[async_trait]
impl Plugin for CollectionMembership {
    fn id(&self) -> &'static str {
        "collection-membership"
    }

    fn name(&self) -> &'static str {
        "Collection membership"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }
}

#[async_trait]
impl Extraction for CollectionMembership {
    async fn handler(
        &self,
        resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let temp = match resource.kind {
            ResourceType::Collection => {
                let items: Vec<&str> = api
                    .document
                    .items()
                    .into_iter()
                    .filter_map(document_id)
                    .collect();
                json!({
                    "type": "Collection",
                    "id": resource.id,
                    "label": api.document.first_label(None),
                    "items": items,
                })
            }
            ResourceType::Manifest => json!({
                "type": "Manifest",
                "id": resource.id,
            }),
            ResourceType::Canvas => return Ok(PluginResult::empty()),
        };

        Ok(PluginResult {
            temp: Some(temp),
            ..PluginResult::default()
        })
    }

    async fn collect(
        &self,
        temp: &TempContributions,
        api: &CollectApi<'_>,
    ) -> Result<Option<CollectPatches>> {
        // Pass one: manifest id → slug.
        let mut manifest_slugs = std::collections::BTreeMap::new();
        for (slug, entry) in temp {
            if entry.get("type").and_then(Value::as_str) == Some("Manifest")
                && let Some(id) = entry.get("id").and_then(Value::as_str)
            {
                manifest_slugs.insert(id.to_string(), slug.clone());
            }
        }

        // Pass two: fold collection items into per-manifest membership.
        let mut patches = CollectPatches::new();
        for (slug, entry) in temp {
            if entry.get("type").and_then(Value::as_str) != Some("Collection") {
                continue;
            }
            let collection_id = match entry.get("id").and_then(Value::as_str) {
                // Synthesized collections have no real source id; re-base
                // onto the configured server.
                Some(id) if id.starts_with("virtual://") => {
                    api.make_id(ResourceType::Collection, slug)
                }
                Some(id) => id.to_string(),
                None => continue,
            };
            let label = entry.get("label").cloned().unwrap_or(Value::Null);

            let items = entry
                .get("items")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for item in items {
                let Some(manifest_id) = item.as_str() else {
                    continue;
                };
                let Some(manifest_slug) = manifest_slugs.get(manifest_id) else {
                    continue;
                };
                let patch = patches
                    .entry(manifest_slug.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = patch.as_array_mut() {
                    list.push(json!({
                        "id": collection_id,
                        "slug": slug,
                        "label": label,
                    }));
                }
            }
        }

        Ok((!patches.is_empty()).then_some(patches))
    }

    async fn inject_manifest(
        &self,
        _resource: &ResourceDescriptor,
        patch: &Value,
        _api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        if patch.as_array().is_none_or(Vec::is_empty) {
            return Ok(PluginResult::empty());
        }
        let mut meta = JsonObject::new();
        meta.insert("part_of_collections".to_string(), patch.clone());
        Ok(PluginResult::with_meta(meta))
    }
}

#[cfg(test)]
mod tests {
    use tessella_shared::AppConfig;

    use super::*;

    fn temp_for(entries: &[(&str, Value)]) -> TempContributions {
        entries
            .iter()
            .map(|(slug, value)| (slug.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn collect_maps_manifests_into_their_collections() {
        let temp = temp_for(&[
            (
                "collections/all",
                json!({
                    "type": "Collection",
                    "id": "https://example.org/iiif/collections/all",
                    "label": { "en": ["Everything"] },
                    "items": ["https://example.org/iiif/1", "https://example.org/iiif/2"],
                }),
            ),
            (
                "manifests/1",
                json!({ "type": "Manifest", "id": "https://example.org/iiif/1" }),
            ),
            (
                "manifests/2",
                json!({ "type": "Manifest", "id": "https://example.org/iiif/2" }),
            ),
        ]);
        let config = AppConfig::default();
        let api = CollectApi {
            config: &config,
            server_url: "https://example.org",
        };

        let patches = CollectionMembership
            .collect(&temp, &api)
            .await
            .expect("collect")
            .expect("patches");
        assert_eq!(patches.len(), 2);

        let first = patches["manifests/1"].as_array().expect("array");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0]["slug"], "collections/all");
        assert_eq!(first[0]["id"], "https://example.org/iiif/collections/all");
    }

    #[tokio::test]
    async fn virtual_collection_ids_are_rebased() {
        let temp = temp_for(&[
            (
                "collections/folder",
                json!({
                    "type": "Collection",
                    "id": "virtual://main/folder",
                    "label": Value::Null,
                    "items": ["https://example.org/iiif/1"],
                }),
            ),
            (
                "manifests/1",
                json!({ "type": "Manifest", "id": "https://example.org/iiif/1" }),
            ),
        ]);
        let config = AppConfig::default();
        let api = CollectApi {
            config: &config,
            server_url: "https://example.org",
        };

        let patches = CollectionMembership
            .collect(&temp, &api)
            .await
            .expect("collect")
            .expect("patches");
        let entry = &patches["manifests/1"].as_array().expect("array")[0];
        assert_eq!(
            entry["id"],
            "https://example.org/collections/folder/collection.json"
        );
    }

    #[tokio::test]
    async fn unknown_manifest_ids_are_ignored() {
        let temp = temp_for(&[(
            "collections/all",
            json!({
                "type": "Collection",
                "id": "https://example.org/iiif/collections/all",
                "label": Value::Null,
                "items": ["https://example.org/iiif/unknown"],
            }),
        )]);
        let config = AppConfig::default();
        let api = CollectApi {
            config: &config,
            server_url: "https://example.org",
        };

        let patches = CollectionMembership.collect(&temp, &api).await.expect("collect");
        assert!(patches.is_none());
    }
}
