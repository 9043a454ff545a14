//! Turns configured metadata fields into topic index buckets.
//!
//! Configuration, under `[plugins.metadata-topics]`:
//!
//! ```toml
//! [plugins.metadata-topics]
//! language = "en"
//! comma_separated = ["author"]
//!
//! [plugins.metadata-topics.topic_types]
//! author = ["Author", "Written by"]
//! topic = ["Subject"]
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use tessella_shared::{
    AppConfig, IndexBuckets, Result, ResourceDescriptor, ResourceType, TessellaError,
};

use crate::api::ExtractionApi;
use crate::result::PluginResult;
use crate::traits::{Extraction, Plugin};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopicsOptions {
    #[serde(default)]
    pub language: Option<String>,
    /// Topics whose metadata values are comma-separated lists.
    #[serde(default)]
    pub comma_separated: Vec<String>,
    /// Topic bucket → metadata field names to look for.
    #[serde(default)]
    pub topic_types: BTreeMap<String, Vec<String>>,
}

pub struct MetadataTopics {
    options: OnceLock<TopicsOptions>,
}

impl MetadataTopics {
    pub fn new() -> Self {
        Self {
            options: OnceLock::new(),
        }
    }

    fn options(&self) -> TopicsOptions {
        self.options.get().cloned().unwrap_or_default()
    }
}

impl Default for MetadataTopics {
    fn default() -> Self {
        Self::new()
    }
}

const TYPES: &[ResourceType] = &[ResourceType::Manifest];

/// First value out of a language map (or bare string / array).
fn first_value(value: &Value, language: Option<&str>) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(values) => values.first().and_then(|v| first_value(v, language)),
        Value::Object(map) => {
            let preferred = language.and_then(|lang| map.get(lang)).or_else(|| map.values().next())?;
            first_value(preferred, language)
        }
        _ => None,
    }
}

/// All values out of a language map entry, preferring the requested
/// language.
fn all_values(value: &Value, language: Option<&str>) -> Vec<String> {
    match value {
        Value::String(text) => vec![text.clone()],
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::Object(map) => {
            let preferred = language
                .and_then(|lang| map.get(lang))
                .or_else(|| map.values().next());
            preferred.map(|v| all_values(v, language)).unwrap_or_default()
        }
        _ => Vec::new(),
    }
}

#[async_trait]
impl Plugin for MetadataTopics {
    fn id(&self) -> &'static str {
        "metadata-topics"
    }

    fn name(&self) -> &'static str {
        "Extract topics"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }

    async fn configure(&self, config: &AppConfig) -> Result<()> {
        let Some(raw) = config.plugins.get(self.id()) else {
            return Ok(());
        };
        let options: TopicsOptions = raw.clone().try_into().map_err(|e| {
            TessellaError::config(format!("invalid [plugins.metadata-topics] options: {e}"))
        })?;
        let _ = self.options.set(options);
        Ok(())
    }
}

#[async_trait]
impl Extraction for MetadataTopics {
    async fn handler(
        &self,
        _resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let options = self.options();
        if options.topic_types.is_empty() {
            return Ok(PluginResult::empty());
        }

        let language = options.language.as_deref();
        let metadata = api.document.metadata();
        let mut indices = IndexBuckets::new();

        for (topic, field_names) in &options.topic_types {
            for (label, value) in &metadata {
                let Some(label_text) = first_value(label, language) else {
                    continue;
                };
                if !field_names.iter().any(|name| name == &label_text) {
                    continue;
                }
                let bucket = indices.entry(topic.clone()).or_default();
                for entry in all_values(value, language) {
                    if options.comma_separated.iter().any(|t| t == topic) {
                        for part in entry.split(',') {
                            let part = part.trim();
                            if !part.is_empty() && !bucket.contains(&part.to_string()) {
                                bucket.push(part.to_string());
                            }
                        }
                    } else if !bucket.contains(&entry) {
                        bucket.push(entry);
                    }
                }
            }
        }
        indices.retain(|_, values| !values.is_empty());

        if indices.is_empty() {
            Ok(PluginResult::empty())
        } else {
            Ok(PluginResult::with_indices(indices))
        }
    }
}
