//! Segment grammar shared by slug patterns and slug templates.
//!
//! A pattern is a `/`-separated list of segments: literals, named
//! captures `:x`, optional trailing captures `:x?`, and a single greedy
//! final capture `:x*` that swallows the remaining path. Matching and
//! rendering are exact inverses of each other, which is what makes
//! compile/reverse-compile round-trip.

use std::collections::BTreeMap;

use tessella_shared::{Result, TessellaError};

/// Matched parameters. Absent optional segments have no key, never an
/// empty string.
pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    Named {
        name: String,
        optional: bool,
        greedy: bool,
    },
}

/// A parsed segment pattern.
#[derive(Debug, Clone)]
pub struct SegmentPattern {
    segments: Vec<Segment>,
    leading_slash: bool,
}

impl SegmentPattern {
    /// Parse a pattern string, rejecting grammars that cannot reverse
    /// unambiguously: optionals must be trailing, and a greedy capture
    /// must be the final segment with no optionals before it.
    pub fn parse(text: &str) -> Result<Self> {
        let leading_slash = text.starts_with('/');
        let mut segments = Vec::new();
        for part in text.split('/').filter(|p| !p.is_empty()) {
            let segment = if let Some(name) = part.strip_prefix(':') {
                if let Some(name) = name.strip_suffix('?') {
                    Segment::Named {
                        name: name.to_string(),
                        optional: true,
                        greedy: false,
                    }
                } else if let Some(name) = name.strip_suffix('*') {
                    Segment::Named {
                        name: name.to_string(),
                        optional: false,
                        greedy: true,
                    }
                } else {
                    Segment::Named {
                        name: name.to_string(),
                        optional: false,
                        greedy: false,
                    }
                }
            } else {
                Segment::Literal(part.to_string())
            };
            segments.push(segment);
        }

        let mut seen_optional = false;
        for (index, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Named { optional: true, .. } => seen_optional = true,
                Segment::Named { greedy: true, .. } => {
                    if seen_optional {
                        return Err(TessellaError::slug(format!(
                            "pattern '{text}': greedy capture cannot follow an optional segment"
                        )));
                    }
                    if index + 1 != segments.len() {
                        return Err(TessellaError::slug(format!(
                            "pattern '{text}': greedy capture must be the final segment"
                        )));
                    }
                }
                _ if seen_optional => {
                    return Err(TessellaError::slug(format!(
                        "pattern '{text}': only optional segments may follow an optional segment"
                    )));
                }
                _ => {}
            }
        }

        Ok(Self {
            segments,
            leading_slash,
        })
    }

    /// Names captured by this pattern, required ones only.
    pub(crate) fn required_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Named {
                name,
                optional: false,
                ..
            } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Names of greedy captures (at most one, by construction).
    pub(crate) fn greedy_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Named {
                name, greedy: true, ..
            } => Some(name.as_str()),
            _ => None,
        })
    }

    /// Match a path against this pattern. A greedy capture stores the
    /// remaining segments joined with `/` (the canonical form).
    pub fn match_path(&self, path: &str) -> Option<Params> {
        let input: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
        let mut params = Params::new();
        let mut index = 0;

        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => {
                    if input.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                    index += 1;
                }
                Segment::Named {
                    name,
                    greedy: true, ..
                } => {
                    if index >= input.len() {
                        return None;
                    }
                    params.insert(name.clone(), input[index..].join("/"));
                    index = input.len();
                }
                Segment::Named {
                    name, optional, ..
                } => {
                    if index < input.len() {
                        params.insert(name.clone(), input[index].to_string());
                        index += 1;
                    } else if !optional {
                        return None;
                    }
                }
            }
        }

        (index == input.len()).then_some(params)
    }

    /// Substitute parameters back into this pattern. Returns `None` when
    /// a required parameter is missing; absent optionals are skipped.
    /// The greedy capture's value has its `/` separators replaced with
    /// `joiner` on the way out.
    pub fn render(&self, params: &Params, joiner: &str) -> Option<String> {
        let mut parts = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(literal) => parts.push(literal.clone()),
                Segment::Named {
                    name,
                    greedy: true, ..
                } => {
                    parts.push(params.get(name)?.replace('/', joiner));
                }
                Segment::Named { name, optional, .. } => match params.get(name) {
                    Some(value) => parts.push(value.clone()),
                    None if *optional => {}
                    None => return None,
                },
            }
        }
        let joined = parts.join("/");
        Some(if self.leading_slash {
            format!("/{joined}")
        } else {
            joined
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_and_named_segments() {
        let pattern = SegmentPattern::parse("/:id/manifest.json").expect("parse");
        let params = pattern
            .match_path("123/manifest.json")
            .expect("matches");
        assert_eq!(params.get("id").map(String::as_str), Some("123"));
        assert!(pattern.match_path("123/collection.json").is_none());
        assert!(pattern.match_path("123").is_none());
        assert!(pattern.match_path("123/manifest.json/extra").is_none());
    }

    #[test]
    fn optional_segment_absent_means_no_key() {
        let pattern = SegmentPattern::parse("/:a/:b?").expect("parse");

        let full = pattern.match_path("foo/bar").expect("matches");
        assert_eq!(full.get("b").map(String::as_str), Some("bar"));

        let partial = pattern.match_path("foo").expect("matches");
        assert_eq!(partial.get("a").map(String::as_str), Some("foo"));
        assert!(!partial.contains_key("b"));
    }

    #[test]
    fn greedy_capture_joins_remaining_segments() {
        let pattern = SegmentPattern::parse("/books/:path*").expect("parse");
        let params = pattern.match_path("books/a/b/c").expect("matches");
        assert_eq!(params.get("path").map(String::as_str), Some("a/b/c"));
        assert!(pattern.match_path("books").is_none());
    }

    #[test]
    fn render_is_the_inverse_of_match() {
        let pattern = SegmentPattern::parse("/:a/:b?").expect("parse");
        let params = pattern.match_path("foo").expect("matches");
        assert_eq!(pattern.render(&params, "/"), Some("/foo".into()));

        let params = pattern.match_path("foo/bar").expect("matches");
        assert_eq!(pattern.render(&params, "/"), Some("/foo/bar".into()));
    }

    #[test]
    fn invalid_grammars_rejected() {
        assert!(SegmentPattern::parse("/:a?/:b").is_err());
        assert!(SegmentPattern::parse("/:a*/x").is_err());
        assert!(SegmentPattern::parse("/:a?/:b*").is_err());
        assert!(SegmentPattern::parse("/:a?/:b?").is_ok());
    }
}
