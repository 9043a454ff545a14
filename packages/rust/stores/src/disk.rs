//! Disk store: a local tree of JSON documents.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use tessella_shared::{
    Document, IndexBuckets, JsonObject, ParsedResource, Result, ResourceDescriptor,
    ResourceOrigin, ResourceType, TessellaError, document_kind,
};

use crate::fingerprint::{file_key, group_key};
use crate::{LoadedResource, StoreAdapter, StoreApi};

pub struct DiskStore {
    store_id: String,
    root: PathBuf,
    pattern: Option<Regex>,
    ignore: Option<Regex>,
    sub_files: bool,
    folder_collections: bool,
}

impl DiskStore {
    pub fn new(
        store_id: &str,
        root: &Path,
        pattern: Option<&str>,
        ignore: Option<&str>,
        sub_files: bool,
        folder_collections: bool,
    ) -> Result<Self> {
        Ok(Self {
            store_id: store_id.to_string(),
            root: root.to_path_buf(),
            pattern: pattern.map(glob_to_regex).transpose()?,
            ignore: ignore.map(glob_to_regex).transpose()?,
            sub_files,
            folder_collections,
        })
    }

    /// Relative paths of every file under the root that passes the
    /// pattern/ignore filters, sorted for deterministic discovery.
    fn matching_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        walk(&self.root, &mut files)?;

        let mut relative: Vec<String> = files
            .iter()
            .filter_map(|path| path.strip_prefix(&self.root).ok())
            .map(|rel| rel.to_string_lossy().replace('\\', "/"))
            .collect();
        relative.sort();

        if let Some(pattern) = &self.pattern {
            relative.retain(|rel| pattern.is_match(rel));
        }
        if let Some(ignore) = &self.ignore {
            relative.retain(|rel| !ignore.is_match(rel));
        }
        Ok(relative)
    }

    fn load_key(&self, resource: &ParsedResource) -> Result<String> {
        if resource.is_virtual {
            return self.virtual_key(resource);
        }
        let ResourceOrigin::Disk { path, .. } = &resource.origin else {
            return Err(TessellaError::store("disk store resource with remote origin"));
        };
        Ok(group_key(path, &resource.sub_files)?)
    }

    /// A virtual folder collection changes when any document in its
    /// folder does.
    fn virtual_key(&self, resource: &ParsedResource) -> Result<String> {
        let ResourceOrigin::Disk { path, .. } = &resource.origin else {
            return Err(TessellaError::store("virtual resource with remote origin"));
        };
        let mut hasher = Sha256::new();
        for child in folder_documents(path)? {
            hasher.update(child.to_string_lossy().as_bytes());
            hasher.update(file_key(&child)?.as_bytes());
        }
        Ok(format!("dir:{:x}", hasher.finalize()))
    }

    async fn load_virtual(&self, resource: &ParsedResource) -> Result<LoadedResource> {
        let ResourceOrigin::Disk { path, .. } = &resource.origin else {
            return Err(TessellaError::store("virtual resource with remote origin"));
        };

        let mut items = Vec::new();
        for child in folder_documents(path)? {
            let bytes = std::fs::read(&child).map_err(|e| TessellaError::io(&child, e))?;
            let value: Value = match serde_json::from_slice(&bytes) {
                Ok(value) => value,
                Err(e) => {
                    warn!(path = %child.display(), error = %e, "skipping unparseable document");
                    continue;
                }
            };
            if let Some(id) = tessella_shared::document_id(&value) {
                let kind = document_kind(&value).unwrap_or(ResourceType::Manifest);
                items.push(json!({ "id": id, "type": kind.to_string() }));
            }
        }

        let id = resource
            .id
            .clone()
            .unwrap_or_else(|| format!("virtual://{}/{}", self.store_id, resource.slug));
        let label = resource
            .slug
            .rsplit('/')
            .next()
            .unwrap_or(&resource.slug)
            .to_string();
        let sub_resources = items.len();
        let graph = Document::from_value(json!({
            "id": id,
            "type": "Collection",
            "label": { "en": [label] },
            "items": items,
        }))?;

        let mut caches = JsonObject::new();
        caches.insert(
            "load".to_string(),
            Value::String(self.virtual_key(resource)?),
        );

        Ok(LoadedResource {
            descriptor: ResourceDescriptor {
                id: graph.id().to_string(),
                kind: ResourceType::Collection,
                slug: resource.slug.clone(),
                slug_source: resource.slug_source.clone(),
                store_id: self.store_id.clone(),
                path: resource.path.clone(),
                origin: resource.origin.clone(),
                save_to_disk: true,
                sub_resources,
                is_virtual: true,
            },
            graph,
            meta: JsonObject::new(),
            indices: IndexBuckets::new(),
            caches,
        })
    }
}

#[async_trait]
impl StoreAdapter for DiskStore {
    async fn parse(&self, api: &StoreApi<'_>) -> Result<Vec<ParsedResource>> {
        let relative = self.matching_files()?;

        // Group sidecar files under their parent document: a file whose
        // extension-less path sits below another file's extension-less
        // path belongs to that document.
        let stems: Vec<String> = relative.iter().map(|rel| strip_extension(rel)).collect();
        let mut grouped: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut documents: Vec<usize> = Vec::new();

        if self.sub_files {
            'outer: for (index, stem) in stems.iter().enumerate() {
                for (parent_index, parent_stem) in stems.iter().enumerate() {
                    if index != parent_index && stem.starts_with(&format!("{parent_stem}/")) {
                        grouped.entry(parent_index).or_default().push(relative[index].clone());
                        continue 'outer;
                    }
                }
                documents.push(index);
            }
        } else {
            documents = (0..relative.len()).collect();
        }

        let mut resources = Vec::with_capacity(documents.len());
        for index in documents {
            let rel = &relative[index];
            let full = self.root.join(rel);
            let sub_files = grouped
                .remove(&index)
                .map(|subs| subs.iter().map(|sub| self.root.join(sub)).collect())
                .unwrap_or_default();

            // Sniff the document's identity so slug rules and rewrites
            // see the real resource type before Load.
            let (id, kind) = match sniff(&full) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(path = %full.display(), error = %e, "unreadable document, skipping");
                    continue;
                }
            };

            // Slug rules apply when the store declares templates and the
            // document's id matched one; the path stem is the default.
            let (slug, slug_source) = match &id {
                Some(id) if !api.slug_templates.is_empty() => {
                    let (slug, source) = api.assign_slug(kind, id);
                    match source {
                        Some(source) => (slug, Some(source)),
                        None => (stems[index].clone(), None),
                    }
                }
                _ => (stems[index].clone(), None),
            };

            resources.push(ParsedResource {
                id,
                kind,
                store_id: self.store_id.clone(),
                path: full.to_string_lossy().replace('\\', "/"),
                slug,
                slug_source,
                origin: ResourceOrigin::Disk {
                    path: full,
                    alias: None,
                },
                sub_files,
                is_virtual: false,
            });
        }

        if self.folder_collections {
            let mut folders = BTreeSet::new();
            for resource in &resources {
                if let Some((folder, _)) = resource.slug.rsplit_once('/') {
                    folders.insert(folder.to_string());
                }
            }
            for folder in folders {
                let full = self.root.join(&folder);
                resources.push(ParsedResource {
                    id: Some(format!("virtual://{}/{folder}", self.store_id)),
                    kind: ResourceType::Collection,
                    store_id: self.store_id.clone(),
                    path: full.to_string_lossy().replace('\\', "/"),
                    slug: folder,
                    slug_source: None,
                    origin: ResourceOrigin::Disk {
                        path: full,
                        alias: None,
                    },
                    sub_files: Vec::new(),
                    is_virtual: true,
                });
            }
        }

        debug!(store = self.store_id, count = resources.len(), "parsed disk store");
        Ok(resources)
    }

    async fn invalidate(&self, resource: &ParsedResource, caches: &JsonObject) -> Result<bool> {
        let Some(token) = caches.get("load").and_then(Value::as_str) else {
            return Ok(true);
        };
        Ok(self.load_key(resource)? != token)
    }

    async fn load(
        &self,
        resource: &ParsedResource,
        dir: &Path,
        _api: &StoreApi<'_>,
    ) -> Result<LoadedResource> {
        if resource.is_virtual {
            return self.load_virtual(resource).await;
        }

        let ResourceOrigin::Disk { path, .. } = &resource.origin else {
            return Err(TessellaError::store("disk store resource with remote origin"));
        };

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| TessellaError::io(path, e))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| TessellaError::store(format!("{}: {e}", path.display())))?;
        let graph = crate::document_from_json(value, &path.display().to_string())?;
        let kind = graph.kind().unwrap_or(resource.kind);

        let sub_resources = match kind {
            ResourceType::Manifest => graph.canvases().len(),
            ResourceType::Collection => graph.items().len(),
            ResourceType::Canvas => 0,
        };

        if !resource.sub_files.is_empty() {
            copy_sub_files(path, &resource.sub_files, &dir.join("files"))?;
        }

        let mut caches = JsonObject::new();
        caches.insert("load".to_string(), Value::String(self.load_key(resource)?));

        Ok(LoadedResource {
            descriptor: ResourceDescriptor {
                id: graph.id().to_string(),
                kind,
                slug: resource.slug.clone(),
                slug_source: resource.slug_source.clone(),
                store_id: self.store_id.clone(),
                path: resource.path.clone(),
                origin: resource.origin.clone(),
                save_to_disk: true,
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

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn walk(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| TessellaError::io(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| TessellaError::io(dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, files)?;
        } else {
            files.push(path);
        }
    }
    Ok(())
}

fn strip_extension(rel: &str) -> String {
    match rel.rfind('.') {
        Some(dot) if !rel[dot..].contains('/') => rel[..dot].to_string(),
        _ => rel.to_string(),
    }
}

/// Documents directly inside a folder (not its subfolders), sorted.
fn folder_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| TessellaError::io(dir, e))?;
    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TessellaError::io(dir, e))?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            documents.push(path);
        }
    }
    documents.sort();
    Ok(documents)
}

/// Read just enough of a document to know its id and kind.
fn sniff(path: &Path) -> Result<(Option<String>, ResourceType)> {
    let bytes = std::fs::read(path).map_err(|e| TessellaError::io(path, e))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| TessellaError::store(format!("{}: {e}", path.display())))?;
    let id = tessella_shared::document_id(&value).map(str::to_string);
    let kind = document_kind(&value).unwrap_or(ResourceType::Manifest);
    Ok((id, kind))
}

/// Copy grouped sidecar files into the resource's `files/` directory,
/// preserving their layout below the document's extension-less path.
fn copy_sub_files(doc_path: &Path, sub_files: &[PathBuf], files_dir: &Path) -> Result<()> {
    let base = doc_path.with_extension("");
    for sub in sub_files {
        let dest = match sub.strip_prefix(&base) {
            Ok(rel) => files_dir.join(rel),
            Err(_) => match sub.file_name() {
                Some(name) => files_dir.join(name),
                None => continue,
            },
        };
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TessellaError::io(parent, e))?;
        }
        std::fs::copy(sub, &dest).map_err(|e| TessellaError::io(sub, e))?;
    }
    Ok(())
}

/// Translate a `**`-style glob into an anchored regex over `/`-separated
/// relative paths.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut out = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("(?:[^/]+/)*");
                    } else {
                        out.push_str(".*");
                    }
                } else {
                    out.push_str("[^/]*");
                }
            }
            '?' => out.push_str("[^/]"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    Regex::new(&out).map_err(|e| TessellaError::config(format!("invalid pattern '{glob}': {e}")))
}

#[cfg(test)]
mod tests {
    use tessella_cache::RequestCache;
    use tessella_slugs::SlugEngine;

    use super::*;

    fn write(dir: &Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, contents).expect("write");
    }

    fn manifest_json(id: &str) -> String {
        format!(r#"{{ "id": "{id}", "type": "Manifest", "label": {{ "en": ["x"] }} }}"#)
    }

    struct ApiFixture {
        engine: SlugEngine,
        request_cache: RequestCache,
        _tmp: tempfile::TempDir,
    }

    impl ApiFixture {
        fn new() -> Self {
            let tmp = tempfile::tempdir().expect("tempdir");
            Self {
                engine: SlugEngine::from_config(&Default::default()).expect("empty engine"),
                request_cache: RequestCache::new("test", tmp.path()).expect("cache"),
                _tmp: tmp,
            }
        }

        fn api(&self) -> StoreApi<'_> {
            StoreApi {
                store_id: "main",
                engine: &self.engine,
                slug_templates: &[],
                request_cache: &self.request_cache,
            }
        }
    }

    #[test]
    fn glob_translation() {
        let regex = glob_to_regex("**/*.json").expect("regex");
        assert!(regex.is_match("a.json"));
        assert!(regex.is_match("deep/nested/a.json"));
        assert!(!regex.is_match("a.yaml"));

        let regex = glob_to_regex("books/*.json").expect("regex");
        assert!(regex.is_match("books/a.json"));
        assert!(!regex.is_match("books/sub/a.json"));
    }

    #[tokio::test]
    async fn parse_discovers_matching_documents() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.json", &manifest_json("https://example.org/a"));
        write(
            dir.path(),
            "sub/b.json",
            &manifest_json("https://example.org/b"),
        );
        write(dir.path(), "notes.txt", "ignore me");

        let store = DiskStore::new("main", dir.path(), Some("**/*.json"), None, false, false)
            .expect("store");
        let fixture = ApiFixture::new();
        let resources = store.parse(&fixture.api()).await.expect("parse");

        let slugs: Vec<&str> = resources.iter().map(|r| r.slug.as_str()).collect();
        assert_eq!(slugs, vec!["a", "sub/b"]);
        assert!(resources.iter().all(|r| r.kind == ResourceType::Manifest));
    }

    #[tokio::test]
    async fn sub_files_group_under_their_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.json", &manifest_json("https://example.org/a"));
        write(dir.path(), "a/extra.json", r#"{"note": true}"#);
        write(dir.path(), "b.json", &manifest_json("https://example.org/b"));

        let store =
            DiskStore::new("main", dir.path(), Some("**/*.json"), None, true, false).expect("store");
        let fixture = ApiFixture::new();
        let resources = store.parse(&fixture.api()).await.expect("parse");

        assert_eq!(resources.len(), 2);
        let a = resources.iter().find(|r| r.slug == "a").expect("a");
        assert_eq!(a.sub_files.len(), 1);
        assert!(a.sub_files[0].ends_with("a/extra.json"));
    }

    #[tokio::test]
    async fn folder_collections_are_virtual() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "books/a.json",
            &manifest_json("https://example.org/a"),
        );
        write(
            dir.path(),
            "books/b.json",
            &manifest_json("https://example.org/b"),
        );

        let store =
            DiskStore::new("main", dir.path(), Some("**/*.json"), None, false, true).expect("store");
        let fixture = ApiFixture::new();
        let resources = store.parse(&fixture.api()).await.expect("parse");

        let collection = resources.iter().find(|r| r.is_virtual).expect("virtual");
        assert_eq!(collection.kind, ResourceType::Collection);
        assert_eq!(collection.slug, "books");
        assert_eq!(collection.id.as_deref(), Some("virtual://main/books"));

        let cache_dir = tempfile::tempdir().expect("tempdir");
        let loaded = store
            .load(collection, cache_dir.path(), &fixture.api())
            .await
            .expect("load");
        assert_eq!(loaded.descriptor.sub_resources, 2);
        assert!(loaded.descriptor.is_virtual);
        assert_eq!(loaded.graph.items().len(), 2);
    }

    #[tokio::test]
    async fn invalidate_is_false_until_the_file_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "a.json", &manifest_json("https://example.org/a"));

        let store = DiskStore::new("main", dir.path(), Some("**/*.json"), None, false, false)
            .expect("store");
        let fixture = ApiFixture::new();
        let resources = store.parse(&fixture.api()).await.expect("parse");
        let resource = &resources[0];

        // Nothing cached yet: must load.
        assert!(
            store
                .invalidate(resource, &JsonObject::new())
                .await
                .expect("invalidate")
        );

        let cache_dir = tempfile::tempdir().expect("tempdir");
        let loaded = store
            .load(resource, cache_dir.path(), &fixture.api())
            .await
            .expect("load");
        assert_eq!(loaded.descriptor.id, "https://example.org/a");

        assert!(
            !store
                .invalidate(resource, &loaded.caches)
                .await
                .expect("invalidate")
        );

        write(dir.path(), "a.json", &manifest_json("https://example.org/a2"));
        assert!(
            store
                .invalidate(resource, &loaded.caches)
                .await
                .expect("invalidate")
        );
    }
}
