//! Extracts canvas dimensions, folding them up to the owning manifest.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{Value, json};

use tessella_shared::{JsonObject, Result, ResourceDescriptor, ResourceType};

use crate::api::ExtractionApi;
use crate::result::PluginResult;
use crate::traits::{Extraction, Plugin};

pub struct CanvasDims;

const TYPES: &[ResourceType] = &[ResourceType::Canvas];

#[async_trait]
impl Plugin for CanvasDims {
    fn id(&self) -> &'static str {
        "canvas-dims"
    }

    fn name(&self) -> &'static str {
        "Extract canvas dimensions"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }
}

#[async_trait]
impl Extraction for CanvasDims {
    async fn invalidate(
        &self,
        _resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<bool> {
        Ok(!api.caches.get().await.contains_key("dims"))
    }

    async fn handler(
        &self,
        _resource: &ResourceDescriptor,
        api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        let canvas = api.document.as_value();
        let width = canvas.get("width").and_then(Value::as_u64);
        let height = canvas.get("height").and_then(Value::as_u64);

        let mut meta = JsonObject::new();
        if let Some(width) = width {
            meta.insert("width".to_string(), json!(width));
        }
        if let Some(height) = height {
            meta.insert("height".to_string(), json!(height));
        }

        let mut caches = JsonObject::new();
        caches.insert("dims".to_string(), Value::Bool(true));

        Ok(PluginResult {
            meta: (!meta.is_empty()).then_some(meta),
            caches: Some(caches),
            temp: Some(json!({ "width": width, "height": height })),
            ..PluginResult::default()
        })
    }

    async fn collect_manifest(
        &self,
        _resource: &ResourceDescriptor,
        canvas_temp: &BTreeMap<usize, Value>,
        _api: &ExtractionApi<'_>,
    ) -> Result<PluginResult> {
        if canvas_temp.is_empty() {
            return Ok(PluginResult::empty());
        }

        let max_width = canvas_temp
            .values()
            .filter_map(|temp| temp.get("width").and_then(Value::as_u64))
            .max();
        let max_height = canvas_temp
            .values()
            .filter_map(|temp| temp.get("height").and_then(Value::as_u64))
            .max();

        let mut meta = JsonObject::new();
        if let Some(width) = max_width {
            meta.insert("max_canvas_width".to_string(), json!(width));
        }
        if let Some(height) = max_height {
            meta.insert("max_canvas_height".to_string(), json!(height));
        }
        if meta.is_empty() {
            return Ok(PluginResult::empty());
        }
        Ok(PluginResult::with_meta(meta))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tessella_shared::{AppConfig, Document};

    use super::*;
    use crate::test_support::{descriptor, extraction_api};

    #[tokio::test]
    async fn extracts_dimensions_and_cache_token() {
        let doc = Document::from_fragment(
            json!({ "id": "https://example.org/iiif/1/canvas/0", "type": "Canvas", "width": 640, "height": 480 }),
            "fallback",
        );
        let config = AppConfig::default();
        let fixture = extraction_api(&doc, &config);

        let result = CanvasDims
            .handler(&descriptor("manifests/1/canvases/0"), &fixture.api())
            .await
            .expect("handler");
        let meta = result.meta.expect("meta");
        assert_eq!(meta["width"], 640);
        assert_eq!(meta["height"], 480);
        assert_eq!(result.caches.expect("caches")["dims"], true);
        assert!(result.temp.is_some());
    }

    #[tokio::test]
    async fn collect_manifest_folds_max_dimensions() {
        let doc = Document::from_fragment(json!({ "id": "m", "type": "Manifest" }), "m");
        let config = AppConfig::default();
        let fixture = extraction_api(&doc, &config);

        let mut canvas_temp = BTreeMap::new();
        canvas_temp.insert(0, json!({ "width": 640, "height": 480 }));
        canvas_temp.insert(1, json!({ "width": 800, "height": 300 }));

        let result = CanvasDims
            .collect_manifest(&descriptor("manifests/1"), &canvas_temp, &fixture.api())
            .await
            .expect("collect_manifest");
        let meta = result.meta.expect("meta");
        assert_eq!(meta["max_canvas_width"], 800);
        assert_eq!(meta["max_canvas_height"], 480);
    }

    #[tokio::test]
    async fn cached_token_skips_the_handler() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("caches.json"), r#"{"dims":true}"#).expect("write");

        let doc = Document::from_fragment(json!({ "id": "c", "type": "Canvas" }), "c");
        let config = AppConfig::default();
        let mut fixture = extraction_api(&doc, &config);
        fixture.set_cache_dir(dir.path());

        let run = CanvasDims
            .invalidate(&descriptor("manifests/1/canvases/0"), &fixture.api())
            .await
            .expect("invalidate");
        assert!(!run);
    }
}
