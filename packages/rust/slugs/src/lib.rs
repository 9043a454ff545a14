//! Bidirectional slug/path compiler.
//!
//! Assigns every resource a stable, URL-friendly output location and
//! resolves output locations back to source identifiers:
//! - [`pattern`] — the segment grammar (`:x`, `:x?`, `:x*`)
//! - [`CompiledRule`] — one rule's forward/reverse codec, validated by
//!   its declared examples
//! - [`SlugEngine`] — ordered multi-rule resolution with an identity
//!   fallback and a strict/non-strict reverse ambiguity policy
//!
//! No-match is always a value (`None`), never an error: callers use it
//! to try the next candidate rule.

pub mod engine;
pub mod pattern;
pub mod rule;

pub use engine::{ReverseMatch, SlugEngine, identity_slug, normalize_slug};
pub use pattern::{Params, SegmentPattern};
pub use rule::CompiledRule;
