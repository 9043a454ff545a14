//! Fixtures for exercising plugin hooks without a full pipeline run.

use std::path::Path;

use tokio::sync::Mutex;

use tessella_cache::LazyJson;
use tessella_shared::{
    AppConfig, Document, IndexBuckets, JsonObject, ResourceDescriptor, ResourceOrigin,
    ResourceType,
};

use crate::api::{EnrichmentApi, ExtractionApi};

/// A manifest descriptor with the given slug.
pub fn descriptor(slug: &str) -> ResourceDescriptor {
    ResourceDescriptor {
        id: format!("https://example.org/iiif/{slug}"),
        kind: ResourceType::Manifest,
        slug: slug.to_string(),
        slug_source: None,
        store_id: "main".to_string(),
        path: format!("content/{slug}.json"),
        origin: ResourceOrigin::Disk {
            path: format!("content/{slug}.json").into(),
            alias: None,
        },
        save_to_disk: true,
        sub_resources: 0,
        is_virtual: false,
    }
}

/// Owns the lazy cache views an [`ExtractionApi`] borrows.
pub struct ExtractionFixture<'a> {
    document: &'a Document,
    config: &'a AppConfig,
    meta: LazyJson<JsonObject>,
    indices: LazyJson<IndexBuckets>,
    caches: LazyJson<JsonObject>,
}

pub fn extraction_api<'a>(document: &'a Document, config: &'a AppConfig) -> ExtractionFixture<'a> {
    ExtractionFixture {
        document,
        config,
        meta: LazyJson::new("/nonexistent/meta.json"),
        indices: LazyJson::new("/nonexistent/indices.json"),
        caches: LazyJson::new("/nonexistent/caches.json"),
    }
}

impl<'a> ExtractionFixture<'a> {
    /// Point the lazy views at a real cache directory.
    pub fn set_cache_dir(&mut self, dir: &Path) {
        self.meta = LazyJson::new(dir.join("meta.json"));
        self.indices = LazyJson::new(dir.join("indices.json"));
        self.caches = LazyJson::new(dir.join("caches.json"));
    }

    pub fn api(&self) -> ExtractionApi<'_> {
        ExtractionApi {
            document: self.document,
            meta: &self.meta,
            indices: &self.indices,
            caches: &self.caches,
            config: self.config,
            server_url: &self.config.server.url,
            files_dir: "/nonexistent/files".into(),
        }
    }
}

/// Owns the locked graph an [`EnrichmentApi`] borrows.
pub struct EnrichmentFixture<'a> {
    graph: Mutex<Document>,
    config: &'a AppConfig,
    meta: LazyJson<JsonObject>,
    indices: LazyJson<IndexBuckets>,
    caches: LazyJson<JsonObject>,
}

pub fn enrichment_api(graph: Document, config: &AppConfig) -> EnrichmentFixture<'_> {
    EnrichmentFixture {
        graph: Mutex::new(graph),
        config,
        meta: LazyJson::new("/nonexistent/meta.json"),
        indices: LazyJson::new("/nonexistent/indices.json"),
        caches: LazyJson::new("/nonexistent/caches.json"),
    }
}

impl<'a> EnrichmentFixture<'a> {
    pub fn api(&self) -> EnrichmentApi<'_> {
        EnrichmentApi {
            graph: &self.graph,
            meta: &self.meta,
            indices: &self.indices,
            caches: &self.caches,
            config: self.config,
            server_url: &self.config.server.url,
            files_dir: "/nonexistent/files".into(),
            request_cache: None,
        }
    }
}
