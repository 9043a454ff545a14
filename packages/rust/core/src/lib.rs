//! Pipeline orchestrator and emitter/index builder.
//!
//! Drives the fixed stage sequence (Discover → Load → Extract → Enrich
//! → Emit → Index) over the active resource set: per-resource plugin
//! dispatch with invalidation gates, partial-failure isolation with
//! per-stage aggregation, the canvas sub-pipeline, two-phase
//! cross-resource aggregation, and the two-pass emitter plus
//! hierarchical index builder.

pub mod context;
pub mod pipeline;
pub mod run;

mod discover;
mod emit;
mod enrich;
mod extract;
mod indices;
mod load;
mod stage;

pub use context::{
    BuildContext, BuildOptions, BuildSummary, ProgressReporter, SilentProgress, StoreEntry,
};
pub use pipeline::run_build;
pub use run::{ActiveResource, RunContext, TempMap};
