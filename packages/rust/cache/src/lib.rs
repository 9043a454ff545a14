//! Per-resource cache records and the shared request cache.
//!
//! Cache layout, per resource slug:
//! `resource.json` (descriptor), `graph.json` (object-graph state),
//! `meta.json`, `indices.json`, `caches.json` (invalidation tokens),
//! `files/` (derived assets), and `canvases/<n>/…` mirroring the same
//! structure for sub-resources.
//!
//! Writes are staged in memory during a stage and flushed as one wave
//! at the stage boundary; a missing or unparseable file always reads as
//! empty.

pub mod lazy;
pub mod merge;
pub mod request;
pub mod resource;

pub use lazy::LazyJson;
pub use merge::merge_indices;
pub use request::{RequestCache, fingerprint};
pub use resource::{ResourceCache, read_json_opt, write_json};
