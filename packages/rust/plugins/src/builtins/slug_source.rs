//! Records which slug rule placed the resource, and its child count.

use async_trait::async_trait;
use serde_json::{Value, json};

use tessella_shared::{JsonObject, Result, ResourceDescriptor, ResourceType};

use crate::api::ExtractionApi;
use crate::result::PluginResult;
use crate::traits::{Extraction, Plugin};

pub struct SlugSource;

const TYPES: &[ResourceType] = &[ResourceType::Manifest, ResourceType::Collection];

#[async_trait]
impl Plugin for SlugSource {
    fn id(&self) -> &'static str {
        "slug-source"
    }

    fn name(&self) -> &'static str {
        "Extract slug source"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }
}

#[async_trait]
impl Extraction for SlugSource {
    async fn handler(
        &self,
        resource: &ResourceDescriptor,
        _api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let mut meta = JsonObject::new();
        if let Some(source) = &resource.slug_source {
            meta.insert("slug_source".to_string(), Value::String(source.clone()));
        }
        meta.insert("total_items".to_string(), json!(resource.sub_resources));
        Ok(PluginResult::with_meta(meta))
    }
}
