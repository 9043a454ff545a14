//! Remote store: a IIIF endpoint, expanded recursively.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use tessella_shared::{
    IndexBuckets, JsonObject, ParsedResource, Result, ResourceDescriptor, ResourceOrigin,
    ResourceType, TessellaError, document_id, document_kind,
};

use crate::fingerprint::file_key;
use crate::{LoadedResource, StoreAdapter, StoreApi};

pub struct RemoteStore {
    store_id: String,
    url: String,
    overrides: Option<PathBuf>,
    save_manifests: bool,
}

impl RemoteStore {
    pub fn new(store_id: &str, url: &str, overrides: Option<&Path>, save_manifests: bool) -> Self {
        Self {
            store_id: store_id.to_string(),
            url: url.to_string(),
            overrides: overrides.map(Path::to_path_buf),
            save_manifests,
        }
    }

    /// Local file overriding the remote document for this slug, when it
    /// exists on disk.
    fn override_for(&self, slug: &str) -> Option<PathBuf> {
        let dir = self.overrides.as_ref()?;
        let path = dir.join(format!("{slug}.json"));
        path.exists().then_some(path)
    }
}

#[async_trait]
impl StoreAdapter for RemoteStore {
    async fn parse(&self, api: &StoreApi<'_>) -> Result<Vec<ParsedResource>> {
        let mut resources = Vec::new();
        let mut queue = VecDeque::from([self.url.clone()]);
        let mut seen: HashSet<String> = HashSet::new();

        while let Some(url) = queue.pop_front() {
            if !seen.insert(url.clone()) {
                continue;
            }

            let document = api.request_cache.fetch(&url).await?;
            let Some(id) = document_id(&document) else {
                warn!(url, "remote document has no id, skipping");
                continue;
            };
            let kind = match document_kind(&document) {
                Some(kind @ (ResourceType::Manifest | ResourceType::Collection)) => kind,
                _ => {
                    warn!(url, "remote document is neither Manifest nor Collection, skipping");
                    continue;
                }
            };

            let (slug, slug_source) = api.assign_slug(kind, id);
            let override_path = self.override_for(&slug);

            resources.push(ParsedResource {
                id: Some(id.to_string()),
                kind,
                store_id: self.store_id.clone(),
                path: url.clone(),
                slug,
                slug_source,
                origin: ResourceOrigin::Remote {
                    url: url.clone(),
                    override_path,
                },
                sub_files: Vec::new(),
                is_virtual: false,
            });

            if kind == ResourceType::Collection {
                // Fragment wrapper so both item shapes (v2/v3) expand.
                let doc = tessella_shared::Document::from_fragment(document.as_ref().clone(), &url);
                for item in doc.items() {
                    if let Some(item_id) = document_id(item) {
                        queue.push_back(item_id.to_string());
                    }
                }
            }
        }

        debug!(store = self.store_id, count = resources.len(), "parsed remote store");
        Ok(resources)
    }

    async fn invalidate(&self, resource: &ParsedResource, caches: &JsonObject) -> Result<bool> {
        let Some(token) = caches.get("load").and_then(Value::as_str) else {
            return Ok(true);
        };
        match &resource.origin {
            // A local override behaves like a disk document.
            ResourceOrigin::Remote {
                override_path: Some(path),
                ..
            } => Ok(file_key(path)? != token),
            // Remote documents are always re-loaded; the request cache
            // absorbs the repeated fetch.
            _ => Ok(true),
        }
    }

    async fn load(
        &self,
        resource: &ParsedResource,
        _dir: &Path,
        api: &StoreApi<'_>,
    ) -> Result<LoadedResource> {
        let mut caches = JsonObject::new();
        let value: Value = match &resource.origin {
            ResourceOrigin::Remote {
                override_path: Some(path),
                ..
            } => {
                caches.insert("load".to_string(), Value::String(file_key(path)?));
                let bytes = tokio::fs::read(path)
                    .await
                    .map_err(|e| TessellaError::io(path, e))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| TessellaError::store(format!("{}: {e}", path.display())))?
            }
            _ => api.request_cache.fetch(&resource.path).await?.as_ref().clone(),
        };

        let graph = crate::document_from_json(value, &resource.path)?;
        let kind = graph.kind().unwrap_or(resource.kind);
        let sub_resources = match kind {
            ResourceType::Manifest => graph.canvases().len(),
            ResourceType::Collection => graph.items().len(),
            ResourceType::Canvas => 0,
        };

        let has_override = matches!(
            &resource.origin,
            ResourceOrigin::Remote {
                override_path: Some(_),
                ..
            }
        );

        Ok(LoadedResource {
            descriptor: ResourceDescriptor {
                id: graph.id().to_string(),
                kind,
                slug: resource.slug.clone(),
                slug_source: resource.slug_source.clone(),
                store_id: self.store_id.clone(),
                path: resource.path.clone(),
                origin: resource.origin.clone(),
                save_to_disk: has_override || self.save_manifests,
                sub_resources,
                is_virtual: false,
            },
            graph,
            meta: JsonObject::new(),
            indices: IndexBuckets::new(),
            caches,
        })
    }
}
