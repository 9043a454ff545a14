//! Error types for Tessella.
//!
//! Library crates use [`TessellaError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt;
use std::path::PathBuf;

/// One failed resource/plugin pair inside a pipeline stage.
///
/// Stage execution never aborts on the first failure: every failure is
/// recorded here and surfaced once per stage via [`TessellaError::Stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    /// Slug of the resource the plugin was running against.
    pub slug: String,
    /// Id of the plugin that failed.
    pub plugin: String,
    /// Underlying error message.
    pub message: String,
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}: {}", self.slug, self.plugin, self.message)
    }
}

fn list_failures(failures: &[StageFailure]) -> String {
    failures
        .iter()
        .enumerate()
        .map(|(n, failure)| format!("  {}) {failure}", n + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Top-level error type for all Tessella operations.
#[derive(Debug, thiserror::Error)]
pub enum TessellaError {
    /// Configuration loading or validation error. Fatal before any stage runs.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while talking to a remote store.
    #[error("network error: {0}")]
    Network(String),

    /// Store adapter error (discovery, invalidation, or load).
    #[error("store error: {0}")]
    Store(String),

    /// A single plugin handler failure, before stage aggregation.
    #[error("plugin '{plugin}' failed for '{slug}': {message}")]
    Plugin {
        plugin: String,
        slug: String,
        message: String,
    },

    /// Aggregated plugin failures for one pipeline stage.
    ///
    /// Raised once per stage, after all otherwise-successful work in that
    /// stage has completed and been persisted.
    #[error("{stage} stage failed for {} resource/plugin pair(s):\n{}", .failures.len(), list_failures(.failures))]
    Stage {
        stage: &'static str,
        failures: Vec<StageFailure>,
    },

    /// Slug resolution error (ambiguous reverse match in strict mode,
    /// or a rule whose examples do not round-trip).
    #[error("slug error: {0}")]
    Slug(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// JSON/TOML serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TessellaError>;

impl TessellaError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a store error from any displayable message.
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a slug error from any displayable message.
    pub fn slug(msg: impl Into<String>) -> Self {
        Self::Slug(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Record a handler error against a resource/plugin pair.
    pub fn plugin(
        plugin: impl Into<String>,
        slug: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            slug: slug.into(),
            message: msg.into(),
        }
    }
}

impl From<serde_json::Error> for TessellaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialize(e.to_string())
    }
}
