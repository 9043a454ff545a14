//! One compiled slug rule: the forward and reverse codecs.

use tessella_shared::{Result, SlugRule, TessellaError};

use crate::pattern::{Params, SegmentPattern};

/// Structural namespaces that the emitter may place slugs under. Reverse
/// compilation tolerates one of these as a leading segment when the slug
/// template itself does not consume it.
const STRUCTURAL_NAMESPACES: &[&str] = &["manifests/", "collections/"];

/// A [`SlugRule`] with both of its patterns parsed and its example set
/// verified to round-trip.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: SlugRule,
    pattern: SegmentPattern,
    template: SegmentPattern,
}

impl CompiledRule {
    /// Parse and validate a rule. Fails when either grammar is invalid,
    /// when the template requires a capture the pattern does not
    /// provide, when the example set is empty, or when any example does
    /// not round-trip.
    pub fn new(rule: SlugRule) -> Result<Self> {
        let pattern = SegmentPattern::parse(&rule.pattern)?;
        let template = SegmentPattern::parse(&rule.slug_template)?;

        let captured: Vec<&str> = pattern.required_names().chain(pattern.greedy_names()).collect();
        for name in template.required_names() {
            if !captured.contains(&name) {
                return Err(TessellaError::slug(format!(
                    "slug template '{}' uses ':{name}' which pattern '{}' does not capture",
                    rule.slug_template, rule.pattern
                )));
            }
        }

        let compiled = Self {
            rule,
            pattern,
            template,
        };
        compiled.check_examples()?;
        Ok(compiled)
    }

    pub fn rule(&self) -> &SlugRule {
        &self.rule
    }

    fn separator(&self) -> &str {
        self.rule.path_separator.as_deref().unwrap_or("/")
    }

    /// Every declared example must compile, and reverse-compiling the
    /// compiled slug must reproduce the example with identical params.
    fn check_examples(&self) -> Result<()> {
        if self.rule.examples.is_empty() {
            return Err(TessellaError::slug(format!(
                "slug rule for pattern '{}' declares no examples",
                self.rule.pattern
            )));
        }
        for example in &self.rule.examples {
            let Some((slug, params)) = self.compile(example) else {
                return Err(TessellaError::slug(format!(
                    "example '{example}' does not match pattern '{}'",
                    self.rule.pattern
                )));
            };
            match self.reverse_compile(&slug) {
                Some((source, reverse_params))
                    if source == *example && reverse_params == params => {}
                Some((source, _)) => {
                    return Err(TessellaError::slug(format!(
                        "example '{example}' does not round-trip: slug '{slug}' reverses to '{source}'"
                    )));
                }
                None => {
                    return Err(TessellaError::slug(format!(
                        "example '{example}' does not round-trip: slug '{slug}' does not reverse"
                    )));
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Forward
    // -----------------------------------------------------------------------

    /// Compile a source identifier into a slug. `None` is the no-match
    /// sentinel: callers try the next candidate rule or fall back to an
    /// identity-derived slug.
    pub fn compile(&self, source_id: &str) -> Option<(String, Params)> {
        let rest = source_id.strip_prefix(&self.rule.prefix)?;
        let params = self.pattern.match_path(rest)?;
        let slug = self.template.render(&params, self.separator())?;
        let slug = match &self.rule.added_prefix {
            Some(added) => format!("{added}{slug}"),
            None => slug,
        };
        Some((slug, params))
    }

    // -----------------------------------------------------------------------
    // Reverse
    // -----------------------------------------------------------------------

    /// Reverse-compile a slug back into its source identifier. `None`
    /// means this rule did not produce the slug.
    pub fn reverse_compile(&self, slug: &str) -> Option<(String, Params)> {
        let trimmed = slug.trim_end_matches('/').trim_start_matches('/');

        if let Some(result) = self.reverse_candidate(trimmed) {
            return Some(result);
        }
        // Only strip a structural namespace when the template as-given
        // did not match, so templates that emit into `manifests/...`
        // are never double-stripped.
        for namespace in STRUCTURAL_NAMESPACES {
            if let Some(stripped) = trimmed.strip_prefix(namespace)
                && let Some(result) = self.reverse_candidate(stripped)
            {
                return Some(result);
            }
        }
        None
    }

    fn reverse_candidate(&self, slug: &str) -> Option<(String, Params)> {
        let slug = match &self.rule.added_prefix {
            Some(added) => slug.strip_prefix(added.as_str())?,
            None => slug,
        };

        let mut params = self.template.match_path(slug)?;

        // The slug side of a greedy capture is joined with the rule's
        // separator; canonicalize back to `/` before re-rendering.
        let separator = self.separator();
        if separator != "/" {
            for name in self.template.greedy_names() {
                let canonical = params.get(name).map(|value| value.replace(separator, "/"));
                if let Some(canonical) = canonical {
                    params.insert(name.to_string(), canonical);
                }
            }
        }

        let path = self.pattern.render(&params, "/")?;
        let prefix = self.rule.prefix.trim_end_matches('/');
        let source = if path.starts_with('/') {
            format!("{prefix}{path}")
        } else {
            format!("{prefix}/{path}")
        };
        Some((source, params))
    }
}

#[cfg(test)]
mod tests {
    use tessella_shared::ResourceType;

    use super::*;

    fn rule(pattern: &str, template: &str, examples: &[&str]) -> SlugRule {
        SlugRule {
            kind: ResourceType::Manifest,
            prefix: "https://example.org/iiif".into(),
            pattern: pattern.into(),
            slug_template: template.into(),
            path_separator: None,
            added_prefix: None,
            examples: examples.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn compiles_the_documented_example() {
        let compiled = CompiledRule::new(rule(
            "/:id/manifest.json",
            "/manifests/:id",
            &["https://example.org/iiif/123/manifest.json"],
        ))
        .expect("valid rule");

        let (slug, params) = compiled
            .compile("https://example.org/iiif/123/manifest.json")
            .expect("compiles");
        assert_eq!(slug, "/manifests/123");
        assert_eq!(params.get("id").map(String::as_str), Some("123"));
    }

    #[test]
    fn no_match_is_a_value_not_an_error() {
        let compiled = CompiledRule::new(rule(
            "/:id/manifest.json",
            "/manifests/:id",
            &["https://example.org/iiif/123/manifest.json"],
        ))
        .expect("valid rule");

        assert!(compiled.compile("https://other.org/iiif/123/manifest.json").is_none());
        assert!(compiled.compile("https://example.org/iiif/123/collection.json").is_none());
        assert!(compiled.reverse_compile("unrelated/slug").is_none());
    }

    #[test]
    fn optional_segments_round_trip_without_empty_strings() {
        let compiled = CompiledRule::new(rule(
            "/:a/:b?",
            "x/:a/:b?",
            &[
                "https://example.org/iiif/foo",
                "https://example.org/iiif/foo/bar",
            ],
        ))
        .expect("valid rule");

        let (slug, params) = compiled.compile("https://example.org/iiif/foo").expect("compiles");
        assert_eq!(slug, "x/foo");
        assert!(!params.contains_key("b"));

        let (source, reverse_params) = compiled.reverse_compile("x/foo").expect("reverses");
        assert_eq!(source, "https://example.org/iiif/foo");
        assert!(!reverse_params.contains_key("b"));
        assert_eq!(reverse_params.get("a").map(String::as_str), Some("foo"));
    }

    #[test]
    fn greedy_capture_with_path_separator() {
        let mut raw = rule(
            "/books/:path*",
            "books/:path*",
            &["https://example.org/iiif/books/a/b/c"],
        );
        raw.path_separator = Some("-".into());
        let compiled = CompiledRule::new(raw).expect("valid rule");

        let (slug, params) = compiled
            .compile("https://example.org/iiif/books/a/b/c")
            .expect("compiles");
        assert_eq!(slug, "books/a-b-c");
        assert_eq!(params.get("path").map(String::as_str), Some("a/b/c"));

        let (source, reverse_params) = compiled.reverse_compile("books/a-b-c").expect("reverses");
        assert_eq!(source, "https://example.org/iiif/books/a/b/c");
        assert_eq!(reverse_params.get("path").map(String::as_str), Some("a/b/c"));
    }

    #[test]
    fn added_prefix_applied_and_stripped() {
        let mut raw = rule(
            "/:id/manifest.json",
            ":id",
            &["https://example.org/iiif/123/manifest.json"],
        );
        raw.added_prefix = Some("archive-".into());
        let compiled = CompiledRule::new(raw).expect("valid rule");

        let (slug, _) = compiled
            .compile("https://example.org/iiif/123/manifest.json")
            .expect("compiles");
        assert_eq!(slug, "archive-123");

        let (source, _) = compiled.reverse_compile("archive-123").expect("reverses");
        assert_eq!(source, "https://example.org/iiif/123/manifest.json");
    }

    #[test]
    fn reverse_tolerates_structural_namespace() {
        let compiled = CompiledRule::new(rule(
            "/:id/manifest.json",
            ":id",
            &["https://example.org/iiif/123/manifest.json"],
        ))
        .expect("valid rule");

        let (source, _) = compiled.reverse_compile("manifests/123").expect("reverses");
        assert_eq!(source, "https://example.org/iiif/123/manifest.json");
    }

    #[test]
    fn template_namespace_not_double_stripped() {
        let compiled = CompiledRule::new(rule(
            "/:id/manifest.json",
            "manifests/:id",
            &["https://example.org/iiif/123/manifest.json"],
        ))
        .expect("valid rule");

        let (source, _) = compiled.reverse_compile("manifests/123").expect("reverses");
        assert_eq!(source, "https://example.org/iiif/123/manifest.json");
    }

    #[test]
    fn bad_examples_rejected_at_build_time() {
        let err = CompiledRule::new(rule(
            "/:id/manifest.json",
            "/manifests/:id",
            &["https://example.org/other/123"],
        ))
        .unwrap_err();
        assert!(err.to_string().contains("does not match pattern"));

        let err = CompiledRule::new(rule("/:id/manifest.json", "/manifests/:id", &[])).unwrap_err();
        assert!(err.to_string().contains("no examples"));
    }
}
