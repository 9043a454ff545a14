//! Core domain types for the build pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A JSON object, as read from and written to the per-resource cache files.
pub type JsonObject = serde_json::Map<String, serde_json::Value>;

/// Index buckets: topic type → ordered, de-duplicated values.
pub type IndexBuckets = BTreeMap<String, Vec<String>>;

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// The closed set of resource kinds the pipeline operates on.
///
/// Canvas resources only exist as sub-resources of a Manifest; they are
/// synthesized during stage execution and never discovered by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Manifest,
    Collection,
    Canvas,
}

impl ResourceType {
    /// File name of the emitted document for this kind of resource.
    pub fn document_file(&self) -> &'static str {
        match self {
            Self::Manifest => "manifest.json",
            Self::Collection => "collection.json",
            // Canvases are emitted inline within their manifest, never
            // as standalone documents; this name only appears in
            // diagnostic paths.
            Self::Canvas => "canvas.json",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manifest => write!(f, "Manifest"),
            Self::Collection => write!(f, "Collection"),
            Self::Canvas => write!(f, "Canvas"),
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceOrigin
// ---------------------------------------------------------------------------

/// Where a resource's source document lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceOrigin {
    /// A document on the local filesystem.
    Disk {
        path: PathBuf,
        /// Optional short alias recorded into `meta/overrides.json`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
    /// A document fetched from a remote API.
    Remote {
        url: String,
        /// Local file that overrides the remote document when present.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        override_path: Option<PathBuf>,
    },
}

impl ResourceOrigin {
    /// The canonical source path or URL, for logs and the sitemap.
    pub fn location(&self) -> String {
        match self {
            Self::Disk { path, .. } => path.display().to_string(),
            Self::Remote { url, .. } => url.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// ParsedResource / ResourceDescriptor
// ---------------------------------------------------------------------------

/// A resource as discovered by a store adapter, before its document has
/// been loaded. Slug rewrites and the uniqueness check run against this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedResource {
    /// Canonical source identifier, when already known at discovery time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub store_id: String,
    /// Source path or URL, also the key into the path → slug map.
    pub path: String,
    pub slug: String,
    /// Name of the slug rule that produced the slug, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_source: Option<String>,
    pub origin: ResourceOrigin,
    /// Sidecar files grouped under this resource by the disk store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_files: Vec<PathBuf>,
    /// Synthesized collection (e.g. a folder collection), not a literal
    /// source document.
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

/// The `resource.json` record: a fully-loaded resource descriptor.
///
/// Created once per build during Load and immutable thereafter. The
/// resource's object-graph state lives alongside it in `graph.json`,
/// not on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Canonical identifier from the source document.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub slug: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug_source: Option<String>,
    pub store_id: String,
    /// Source path or URL as discovered.
    pub path: String,
    pub origin: ResourceOrigin,
    /// Whether the emitted document is written into the build tree.
    pub save_to_disk: bool,
    /// Number of child sub-resources (canvases for a Manifest, items for
    /// a Collection).
    #[serde(default)]
    pub sub_resources: usize,
    #[serde(default, rename = "virtual")]
    pub is_virtual: bool,
}

impl ResourceDescriptor {
    /// Descriptor for one canvas of this manifest.
    ///
    /// Canvas sub-resources are addressed as `<slug>/canvases/<index>`,
    /// zero-based, in the parent's document order.
    pub fn canvas(&self, index: usize) -> ResourceDescriptor {
        ResourceDescriptor {
            id: format!("{}/canvases/{index}", self.id),
            kind: ResourceType::Canvas,
            slug: format!("{}/canvases/{index}", self.slug),
            slug_source: self.slug_source.clone(),
            store_id: self.store_id.clone(),
            path: format!("{}/canvases/{index}", self.path),
            origin: self.origin.clone(),
            save_to_disk: false,
            sub_resources: 0,
            is_virtual: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SlugRule
// ---------------------------------------------------------------------------

/// One named slug rule, as configured under `[slugs.<name>]`.
///
/// `pattern` and `slug_template` share a segment grammar: literal
/// segments, named segments `:x`, optional named segments `:x?`, and a
/// greedy final capture `:x*`. Every rule must carry at least one
/// example that round-trips through compile and reverse-compile; rules
/// are validated when the slug engine is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlugRule {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    /// Source-URL prefix stripped before pattern matching.
    pub prefix: String,
    pub pattern: String,
    pub slug_template: String,
    /// Separator substituted for `/` in the greedy capture's slug form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_separator: Option<String>,
    /// Literal prefix prepended to every compiled slug.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_prefix: Option<String>,
    pub examples: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_roundtrip() {
        let descriptor = ResourceDescriptor {
            id: "https://example.org/iiif/1/manifest.json".into(),
            kind: ResourceType::Manifest,
            slug: "manifests/1".into(),
            slug_source: Some("default".into()),
            store_id: "main".into(),
            path: "https://example.org/iiif/1/manifest.json".into(),
            origin: ResourceOrigin::Remote {
                url: "https://example.org/iiif/1/manifest.json".into(),
                override_path: None,
            },
            save_to_disk: true,
            sub_resources: 4,
            is_virtual: false,
        };

        let json = serde_json::to_string_pretty(&descriptor).expect("serialize");
        assert!(json.contains("\"type\": \"Manifest\""));
        let parsed: ResourceDescriptor = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.slug, "manifests/1");
        assert_eq!(parsed.sub_resources, 4);
    }

    #[test]
    fn canvas_descriptor_addressing() {
        let descriptor = ResourceDescriptor {
            id: "https://example.org/iiif/1".into(),
            kind: ResourceType::Manifest,
            slug: "manifests/1".into(),
            slug_source: None,
            store_id: "main".into(),
            path: "content/1.json".into(),
            origin: ResourceOrigin::Disk {
                path: "content/1.json".into(),
                alias: None,
            },
            save_to_disk: true,
            sub_resources: 2,
            is_virtual: false,
        };

        let canvas = descriptor.canvas(0);
        assert_eq!(canvas.kind, ResourceType::Canvas);
        assert_eq!(canvas.slug, "manifests/1/canvases/0");
        assert!(!canvas.save_to_disk);
    }

    #[test]
    fn origin_tagging() {
        let origin = ResourceOrigin::Disk {
            path: "content/a.json".into(),
            alias: None,
        };
        let json = serde_json::to_string(&origin).expect("serialize");
        assert!(json.contains("\"type\":\"disk\""));
        assert!(!json.contains("alias"));
    }
}
