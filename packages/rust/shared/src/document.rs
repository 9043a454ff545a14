//! Thin wrapper over a resource's raw JSON document.
//!
//! Stands in for the external normalized-object-graph library: the
//! pipeline persists the whole document as `graph.json` and plugins poke
//! at it through these accessors. Understands both the legacy (`@id`,
//! `sc:Manifest`, `sequences`) and current (`id`, `Manifest`, `items`)
//! document shapes.

use serde_json::{Value, json};

use crate::error::{Result, TessellaError};
use crate::types::{JsonObject, ResourceType};

/// A loaded source document plus its canonical identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    root: Value,
}

/// Pull `id` or `@id` out of a JSON object.
pub fn document_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .or_else(|| value.get("@id"))
        .and_then(Value::as_str)
}

/// Sniff the resource kind from `type` / `@type`.
pub fn document_kind(value: &Value) -> Option<ResourceType> {
    let raw = value
        .get("type")
        .or_else(|| value.get("@type"))
        .and_then(Value::as_str)?;
    match raw {
        "Manifest" | "sc:Manifest" => Some(ResourceType::Manifest),
        "Collection" | "sc:Collection" => Some(ResourceType::Collection),
        "Canvas" | "sc:Canvas" => Some(ResourceType::Canvas),
        _ => None,
    }
}

impl Document {
    /// Wrap a raw document. The document must carry an `id` (or `@id`).
    pub fn from_value(root: Value) -> Result<Self> {
        let id = document_id(&root)
            .ok_or_else(|| TessellaError::store("no id found in document"))?
            .to_string();
        Ok(Self { id, root })
    }

    /// Wrap a fragment that may be missing its own identifier (some
    /// canvases are only addressable by position).
    pub fn from_fragment(root: Value, fallback_id: impl Into<String>) -> Self {
        let id = document_id(&root)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_id.into());
        Self { id, root }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> Option<ResourceType> {
        document_kind(&self.root)
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Rewrite the document's identifier (used when emitting under the
    /// configured server URL).
    pub fn set_id(&mut self, id: impl Into<String>) {
        let id = id.into();
        if let Some(obj) = self.root.as_object_mut() {
            let key = if obj.contains_key("@id") { "@id" } else { "id" };
            obj.insert(key.to_string(), Value::String(id.clone()));
        }
        self.id = id;
    }

    // -----------------------------------------------------------------------
    // Descriptive properties
    // -----------------------------------------------------------------------

    /// The language-map label, when present and well-formed.
    pub fn label(&self) -> Option<&JsonObject> {
        self.root.get("label").and_then(Value::as_object)
    }

    /// First label value, preferring the requested language.
    pub fn first_label(&self, language: Option<&str>) -> Option<String> {
        let label = self.root.get("label")?;
        // Legacy documents carry a bare string label.
        if let Some(text) = label.as_str() {
            return Some(text.to_string());
        }
        let map = label.as_object()?;
        let preferred = language
            .and_then(|lang| map.get(lang))
            .or_else(|| map.values().next())?;
        preferred
            .as_array()
            .and_then(|values| values.first())
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn thumbnail(&self) -> Option<&Value> {
        self.root.get("thumbnail")
    }

    /// Metadata entries as `(label, value)` JSON pairs.
    pub fn metadata(&self) -> Vec<(&Value, &Value)> {
        self.root
            .get("metadata")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| Some((entry.get("label")?, entry.get("value")?)))
                    .collect()
            })
            .unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Structure
    // -----------------------------------------------------------------------

    /// Canvases of a manifest, in document order.
    pub fn canvases(&self) -> Vec<&Value> {
        if let Some(items) = self.root.get("items").and_then(Value::as_array) {
            return items
                .iter()
                .filter(|item| document_kind(item) == Some(ResourceType::Canvas))
                .collect();
        }
        // Legacy shape: sequences[0].canvases.
        self.root
            .get("sequences")
            .and_then(Value::as_array)
            .and_then(|sequences| sequences.first())
            .and_then(|sequence| sequence.get("canvases"))
            .and_then(Value::as_array)
            .map(|canvases| canvases.iter().collect())
            .unwrap_or_default()
    }

    /// Canvases as standalone fragments, with positional fallback ids.
    pub fn canvas_documents(&self) -> Vec<Document> {
        self.canvases()
            .into_iter()
            .enumerate()
            .map(|(index, canvas)| {
                Document::from_fragment(canvas.clone(), format!("{}/canvas/{index}", self.id))
            })
            .collect()
    }

    /// Item references of a collection (`{id, type}` pairs).
    pub fn items(&self) -> Vec<&Value> {
        if let Some(items) = self.root.get("items").and_then(Value::as_array) {
            return items.iter().collect();
        }
        // Legacy collections list manifests/collections/members separately.
        ["manifests", "collections", "members"]
            .iter()
            .filter_map(|key| self.root.get(*key).and_then(Value::as_array))
            .flatten()
            .collect()
    }

    /// Replace a collection's items wholesale (emit pass 2).
    pub fn set_items(&mut self, items: Vec<Value>) {
        if let Some(obj) = self.root.as_object_mut() {
            obj.insert("items".to_string(), Value::Array(items));
        }
    }

    // -----------------------------------------------------------------------
    // Homepage (mutated by the homepage enrichment)
    // -----------------------------------------------------------------------

    pub fn homepage_ids(&self) -> Vec<&str> {
        self.root
            .get("homepage")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| document_id(entry))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Append a homepage link. Returns false when the id is already
    /// present, so callers can report `did_change` accurately.
    pub fn add_homepage(&mut self, id: &str, label: &str) -> bool {
        if self.homepage_ids().contains(&id) {
            return false;
        }
        let entry = json!({
            "id": id,
            "type": "Text",
            "label": { "en": [label] },
            "format": "text/html",
        });
        let Some(obj) = self.root.as_object_mut() else {
            return false;
        };
        match obj.get_mut("homepage").and_then(Value::as_array_mut) {
            Some(existing) => existing.push(entry),
            None => {
                obj.insert("homepage".to_string(), Value::Array(vec![entry]));
            }
        }
        true
    }
}
