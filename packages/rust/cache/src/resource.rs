//! Per-resource disk-backed cache records.

use std::path::{Path, PathBuf};

use tessella_shared::{Document, IndexBuckets, JsonObject, Result, TessellaError};

use crate::lazy::LazyJson;
use crate::merge::merge_indices;

/// Write a value as pretty JSON, creating parent directories.
pub async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| TessellaError::io(parent, e))?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| TessellaError::io(path, e))
}

/// Read a JSON value, `None` when the file does not exist.
pub async fn read_json_opt<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TessellaError::io(path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// One resource's cache record for one stage.
///
/// The lazy accessors expose the state persisted by earlier stages;
/// plugin effects are staged in memory and only written back by
/// [`ResourceCache::flush`], which the orchestrator calls in one wave at
/// the stage boundary. Nothing is written when nothing was staged.
#[derive(Debug)]
pub struct ResourceCache {
    root: PathBuf,
    meta: LazyJson<JsonObject>,
    indices: LazyJson<IndexBuckets>,
    caches: LazyJson<JsonObject>,
    new_meta: JsonObject,
    new_indices: IndexBuckets,
    new_caches: JsonObject,
}

impl ResourceCache {
    pub fn new(cache_dir: &Path, slug: &str) -> Self {
        let root = cache_dir.join(slug);
        Self {
            meta: LazyJson::new(root.join("meta.json")),
            indices: LazyJson::new(root.join("indices.json")),
            caches: LazyJson::new(root.join("caches.json")),
            new_meta: JsonObject::new(),
            new_indices: IndexBuckets::new(),
            new_caches: JsonObject::new(),
            root,
        }
    }

    /// Cache scope of one canvas, nested under this resource's record.
    pub fn canvas_scope(&self, index: usize) -> ResourceCache {
        ResourceCache::new(&self.root.join("canvases"), &index.to_string())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for derived binary assets, copied into the build tree
    /// at emit time.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn meta(&self) -> &LazyJson<JsonObject> {
        &self.meta
    }

    pub fn indices(&self) -> &LazyJson<IndexBuckets> {
        &self.indices
    }

    pub fn caches(&self) -> &LazyJson<JsonObject> {
        &self.caches
    }

    // -----------------------------------------------------------------------
    // Object graph state
    // -----------------------------------------------------------------------

    pub fn graph_path(&self) -> PathBuf {
        self.root.join("graph.json")
    }

    pub async fn load_graph(&self) -> Result<Option<Document>> {
        let value = read_json_opt::<serde_json::Value>(&self.graph_path()).await?;
        value.map(Document::from_value).transpose()
    }

    pub async fn save_graph(&self, graph: &Document) -> Result<()> {
        write_json(&self.graph_path(), graph.as_value()).await
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    /// Shallow key overwrite into `meta.json`.
    pub fn stage_meta(&mut self, patch: JsonObject) {
        self.new_meta.extend(patch);
    }

    /// Shallow key overwrite into `caches.json`.
    pub fn stage_caches(&mut self, patch: JsonObject) {
        self.new_caches.extend(patch);
    }

    /// Per-bucket set union into `indices.json`.
    pub fn stage_indices(&mut self, patch: &IndexBuckets) {
        merge_indices(&mut self.new_indices, patch);
    }

    pub fn has_staged(&self) -> bool {
        !self.new_meta.is_empty() || !self.new_indices.is_empty() || !self.new_caches.is_empty()
    }

    /// Merge staged changes over the persisted state and write back.
    /// Only categories that changed are written. Returns whether any
    /// file was written.
    pub async fn flush(self) -> Result<bool> {
        if !self.has_staged() {
            return Ok(false);
        }

        if !self.new_meta.is_empty() {
            let mut merged = self.meta.cloned().await;
            merged.extend(self.new_meta);
            write_json(self.meta.path(), &merged).await?;
        }
        if !self.new_indices.is_empty() {
            let mut merged = self.indices.cloned().await;
            merge_indices(&mut merged, &self.new_indices);
            write_json(self.indices.path(), &merged).await?;
        }
        if !self.new_caches.is_empty() {
            let mut merged = self.caches.cloned().await;
            merged.extend(self.new_caches);
            write_json(self.caches.path(), &merged).await?;
        }
        Ok(true)
    }
}
