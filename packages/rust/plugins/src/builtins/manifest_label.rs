//! Extracts the display label into `meta.json`.

use async_trait::async_trait;
use serde_json::Value;

use tessella_shared::{Result, ResourceDescriptor, ResourceType};

use crate::api::ExtractionApi;
use crate::result::PluginResult;
use crate::traits::{Extraction, Plugin};

pub struct ManifestLabel;

const TYPES: &[ResourceType] = &[ResourceType::Manifest, ResourceType::Collection];

#[async_trait]
impl Plugin for ManifestLabel {
    fn id(&self) -> &'static str {
        "manifest-label"
    }

    fn name(&self) -> &'static str {
        "Extract label as string"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }
}

#[async_trait]
impl Extraction for ManifestLabel {
    async fn handler(
        &self,
        _resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let language = api
            .config
            .plugins
            .get(self.id())
            .and_then(|options| options.get("language"))
            .and_then(|value| value.as_str());

        let Some(label) = api.document.first_label(language) else {
            return Ok(PluginResult::empty());
        };

        let mut meta = tessella_shared::JsonObject::new();
        meta.insert("label".to_string(), Value::String(label));
        Ok(PluginResult::with_meta(meta))
    }
}
