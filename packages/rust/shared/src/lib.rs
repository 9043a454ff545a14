//! Shared types, error model, and configuration for Tessella.
//!
//! This crate is the foundation depended on by all other Tessella crates.
//! It provides:
//! - [`TessellaError`] — the unified error type
//! - Domain types ([`ResourceDescriptor`], [`ResourceType`], [`SlugRule`])
//! - [`Document`] — the thin object-graph wrapper over source JSON
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod document;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BuildPaths, CONFIG_FILE_NAME, ServerConfig, StoreConfig, StoreSource, init_config,
    load_config, load_config_from,
};
pub use document::{Document, document_id, document_kind};
pub use error::{Result, StageFailure, TessellaError};
pub use types::{
    IndexBuckets, JsonObject, ParsedResource, ResourceDescriptor, ResourceOrigin, ResourceType,
    SlugRule,
};
