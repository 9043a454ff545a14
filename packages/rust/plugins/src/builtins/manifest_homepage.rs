//! Adds a homepage link pointing at the resource's published location.

use async_trait::async_trait;

use tessella_shared::{Result, ResourceDescriptor, ResourceType};

use crate::api::EnrichmentApi;
use crate::result::PluginResult;
use crate::traits::{Enrichment, Plugin};

pub struct ManifestHomepage;

const TYPES: &[ResourceType] = &[ResourceType::Manifest];

fn homepage_url(server_url: &str, slug: &str) -> String {
    format!(
        "{}/{}",
        server_url.trim_end_matches('/'),
        slug.trim_start_matches('/')
    )
}

#[async_trait]
impl Plugin for ManifestHomepage {
    fn id(&self) -> &'static str {
        "manifest-homepage"
    }

    fn name(&self) -> &'static str {
        "Homepage property"
    }

    fn types(&self) -> &[ResourceType] {
        TYPES
    }
}

#[async_trait]
impl Enrichment for ManifestHomepage {
    async fn invalidate(
        &self,
        resource: &ResourceDescriptor,
        api: &EnrichmentApi<'_>,
    ) -> Result<bool> {
        let homepage = homepage_url(api.server_url, &resource.slug);
        let graph = api.graph.lock().await;
        Ok(!graph.homepage_ids().contains(&homepage.as_str()))
    }

    async fn handler(
        &self,
        resource: &ResourceDescriptor,
        api: &EnrichmentApi<'_>,
    ) -> Result<PluginResult> {
        let homepage = homepage_url(api.server_url, &resource.slug);
        let mut graph = api.graph.lock().await;
        let label = graph.first_label(None).unwrap_or_else(|| "View".to_string());
        let did_change = graph.add_homepage(&homepage, &label);
        Ok(PluginResult {
            did_change,
            ..PluginResult::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tessella_shared::{AppConfig, Document};

    use super::*;
    use crate::test_support::{descriptor, enrichment_api};

    #[tokio::test]
    async fn adds_homepage_and_reports_change() {
        let doc = Document::from_value(json!({
            "id": "https://example.org/iiif/1",
            "type": "Manifest",
            "label": { "en": ["One"] }
        }))
        .expect("valid doc");
        let config = AppConfig::default();
        let fixture = enrichment_api(doc, &config);
        let resource = descriptor("manifests/1");

        assert!(
            ManifestHomepage
                .invalidate(&resource, &fixture.api())
                .await
                .expect("invalidate")
        );

        let result = ManifestHomepage
            .handler(&resource, &fixture.api())
            .await
            .expect("handler");
        assert!(result.did_change);

        // A second pass sees the link and stands down.
        assert!(
            !ManifestHomepage
                .invalidate(&resource, &fixture.api())
                .await
                .expect("invalidate")
        );
        let result = ManifestHomepage
            .handler(&resource, &fixture.api())
            .await
            .expect("handler");
        assert!(!result.did_change);
    }
}
