//! Multi-rule slug resolution.

use std::collections::BTreeMap;

use tessella_shared::{Result, ResourceType, SlugRule, TessellaError};
use tracing::debug;

use crate::pattern::Params;
use crate::rule::CompiledRule;

/// A successful reverse resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseMatch {
    /// Name of the rule that matched.
    pub rule: String,
    /// Reconstructed source identifier.
    pub source_id: String,
    pub params: Params,
}

/// The full set of configured slug rules, compiled and validated.
pub struct SlugEngine {
    rules: Vec<(String, CompiledRule)>,
}

impl SlugEngine {
    /// Compile every configured rule. Any rule whose grammar is invalid
    /// or whose examples do not round-trip fails the whole build here,
    /// before any stage runs.
    pub fn from_config(slugs: &BTreeMap<String, SlugRule>) -> Result<Self> {
        let mut rules = Vec::with_capacity(slugs.len());
        for (name, rule) in slugs {
            let compiled = CompiledRule::new(rule.clone()).map_err(|e| {
                TessellaError::config(format!("slug rule '{name}' is invalid: {e}"))
            })?;
            rules.push((name.clone(), compiled));
        }
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Compile against one named rule.
    pub fn compile_with(&self, name: &str, source_id: &str) -> Option<(String, Params)> {
        let (_, rule) = self.rules.iter().find(|(rule_name, _)| rule_name == name)?;
        rule.compile(source_id)
    }

    /// Assign a slug to a resource: try the store's rule names in order
    /// (skipping rules declared for a different resource type), falling
    /// back to an identity-derived slug when nothing matches.
    ///
    /// Returns the normalized slug and the name of the rule that
    /// produced it (`None` for the identity fallback).
    pub fn assign(
        &self,
        kind: ResourceType,
        templates: &[String],
        source_id: &str,
    ) -> (String, Option<String>) {
        for name in templates {
            let Some((_, rule)) = self.rules.iter().find(|(rule_name, _)| rule_name == name)
            else {
                continue;
            };
            if rule.rule().kind != kind {
                continue;
            }
            if let Some((slug, _)) = rule.compile(source_id) {
                return (normalize_slug(&slug).to_string(), Some(name.clone()));
            }
        }
        debug!(source_id, "no slug rule matched, using identity slug");
        (identity_slug(source_id), None)
    }

    /// Resolve a slug back to its source identifier.
    ///
    /// Non-strict mode returns the first matching rule in name order.
    /// Strict mode treats more than one match as a hard error.
    pub fn reverse(&self, slug: &str, strict: bool) -> Result<Option<ReverseMatch>> {
        let mut matches = Vec::new();
        for (name, rule) in &self.rules {
            if let Some((source_id, params)) = rule.reverse_compile(slug) {
                matches.push(ReverseMatch {
                    rule: name.clone(),
                    source_id,
                    params,
                });
                if !strict {
                    break;
                }
            }
        }

        if strict && matches.len() > 1 {
            let names: Vec<&str> = matches.iter().map(|m| m.rule.as_str()).collect();
            return Err(TessellaError::slug(format!(
                "slug '{slug}' is ambiguous: matched by rules {}",
                names.join(", ")
            )));
        }
        Ok(matches.into_iter().next())
    }
}

/// Trim the leading slash a slug template may carry; slugs address
/// directories under the cache/build trees.
pub fn normalize_slug(slug: &str) -> &str {
    slug.trim_start_matches('/')
}

/// Default slug for a source no rule matched: the identifier with its
/// scheme stripped.
pub fn identity_slug(source_id: &str) -> String {
    let without_scheme = match source_id.find("://") {
        Some(index) => &source_id[index + 3..],
        None => source_id,
    };
    without_scheme.trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SlugEngine {
        let mut slugs = BTreeMap::new();
        slugs.insert(
            "manifests".to_string(),
            SlugRule {
                kind: ResourceType::Manifest,
                prefix: "https://example.org/iiif".into(),
                pattern: "/:id/manifest.json".into(),
                slug_template: "manifests/:id".into(),
                path_separator: None,
                added_prefix: None,
                examples: vec!["https://example.org/iiif/123/manifest.json".into()],
            },
        );
        slugs.insert(
            "collections".to_string(),
            SlugRule {
                kind: ResourceType::Collection,
                prefix: "https://example.org/iiif".into(),
                pattern: "/collections/:id".into(),
                slug_template: "collections/:id".into(),
                path_separator: None,
                added_prefix: None,
                examples: vec!["https://example.org/iiif/collections/all".into()],
            },
        );
        SlugEngine::from_config(&slugs).expect("valid rules")
    }

    #[test]
    fn assign_tries_rules_in_template_order() {
        let engine = engine();
        let templates = vec!["collections".to_string(), "manifests".to_string()];

        let (slug, source) = engine.assign(
            ResourceType::Manifest,
            &templates,
            "https://example.org/iiif/123/manifest.json",
        );
        assert_eq!(slug, "manifests/123");
        assert_eq!(source.as_deref(), Some("manifests"));
    }

    #[test]
    fn assign_falls_back_to_identity() {
        let engine = engine();
        let (slug, source) = engine.assign(
            ResourceType::Manifest,
            &["manifests".to_string()],
            "https://other.org/objects/9",
        );
        assert_eq!(slug, "other.org/objects/9");
        assert!(source.is_none());
    }

    #[test]
    fn reverse_non_strict_returns_first_match() {
        let engine = engine();
        let resolved = engine
            .reverse("manifests/123", false)
            .expect("no ambiguity error")
            .expect("matches");
        assert_eq!(resolved.rule, "manifests");
        assert_eq!(
            resolved.source_id,
            "https://example.org/iiif/123/manifest.json"
        );
    }

    #[test]
    fn reverse_strict_rejects_ambiguity() {
        let mut slugs = BTreeMap::new();
        for name in ["first", "second"] {
            slugs.insert(
                name.to_string(),
                SlugRule {
                    kind: ResourceType::Manifest,
                    prefix: "https://example.org/iiif".into(),
                    pattern: "/:id/manifest.json".into(),
                    slug_template: "manifests/:id".into(),
                    path_separator: None,
                    added_prefix: None,
                    examples: vec!["https://example.org/iiif/1/manifest.json".into()],
                },
            );
        }
        let engine = SlugEngine::from_config(&slugs).expect("valid rules");

        assert!(engine.reverse("manifests/1", false).expect("first match").is_some());
        let err = engine.reverse("manifests/1", true).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn reverse_no_match_is_none() {
        let engine = engine();
        assert!(engine.reverse("topics/author/x", false).expect("ok").is_none());
    }

    #[test]
    fn identity_slug_strips_scheme() {
        assert_eq!(identity_slug("https://example.org/a/b/"), "example.org/a/b");
        assert_eq!(identity_slug("content/a"), "content/a");
    }
}
