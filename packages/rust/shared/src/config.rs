//! Project configuration for Tessella.
//!
//! Configuration lives in a project-local `tessella.toml`. A missing
//! file falls back to a default single-store setup reading `content/`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TessellaError};
use crate::types::SlugRule;

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "tessella.toml";

// ---------------------------------------------------------------------------
// Config structs (matching the tessella.toml schema)
// ---------------------------------------------------------------------------

/// Top-level project config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global plugin allow-list. When absent, every registered plugin
    /// runs. A top-level key, so it must precede the tables in TOML.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,

    /// `[server]` — base URL emitted documents resolve against.
    #[serde(default)]
    pub server: ServerConfig,

    /// `[build]` — directory layout and pipeline tuning.
    #[serde(default)]
    pub build: BuildPaths,

    /// `[stores.<id>]` — configured content sources.
    pub stores: BTreeMap<String, StoreConfig>,

    /// `[slugs.<name>]` — slug rules, in name order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slugs: BTreeMap<String, SlugRule>,

    /// `[plugins.<id>]` — free-form per-plugin options, interpreted by
    /// each plugin's `configure` hook.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, toml::Value>,
}

/// `[server]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL for resolved identifiers.
    #[serde(default = "default_server_url")]
    pub url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
        }
    }
}

fn default_server_url() -> String {
    "http://localhost:7111".into()
}

/// `[build]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPaths {
    /// Per-resource cache tree.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Emitted build tree.
    #[serde(default = "default_build_dir")]
    pub build_dir: PathBuf,

    /// Upper bound on concurrently-enriched resources. Unbounded when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrich_concurrency: Option<usize>,
}

impl Default for BuildPaths {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            build_dir: default_build_dir(),
            enrich_concurrency: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    ".tessella/cache".into()
}
fn default_build_dir() -> PathBuf {
    ".tessella/build".into()
}

// ---------------------------------------------------------------------------
// Store config
// ---------------------------------------------------------------------------

/// One configured store: a source definition plus per-store plugin
/// controls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub source: StoreSource,

    /// Slug rule names tried, in order, when assigning slugs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slug_templates: Vec<String>,

    /// Plugin ids never run for this store's resources.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,

    /// Explicit plugin run order for this store. Mentioned ids run first
    /// in this order; unmentioned ids follow in their default order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<Vec<String>>,
}

/// Where a store's resources come from. Unknown `type` values fail at
/// config parse time, before any stage runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreSource {
    /// A local tree of JSON documents.
    Disk {
        path: PathBuf,
        /// Glob-ish filter (`**/*.json`) applied to discovered files.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ignore: Option<String>,
        /// Group sidecar files under their parent document.
        #[serde(default)]
        sub_files: bool,
        /// Synthesize a virtual collection per directory of documents.
        #[serde(default)]
        folder_collections: bool,
    },
    /// A remote IIIF endpoint (manifest or collection).
    Remote {
        url: String,
        /// Directory of local files overriding remote documents by slug.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        overrides: Option<PathBuf>,
        /// Also write fetched manifests into the build tree.
        #[serde(default)]
        save_manifests: bool,
    },
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Default for AppConfig {
    /// The zero-config default: one disk store reading `content/`.
    fn default() -> Self {
        let mut stores = BTreeMap::new();
        stores.insert(
            "default".to_string(),
            StoreConfig {
                source: StoreSource::Disk {
                    path: "content".into(),
                    pattern: Some("**/*.json".into()),
                    ignore: None,
                    sub_files: false,
                    folder_collections: false,
                },
                slug_templates: Vec::new(),
                skip: Vec::new(),
                run: None,
            },
        );
        Self {
            server: ServerConfig::default(),
            build: BuildPaths::default(),
            run: None,
            stores,
            slugs: BTreeMap::new(),
            plugins: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Cross-reference checks that must pass before the pipeline starts.
    pub fn validate(&self) -> Result<()> {
        if self.stores.is_empty() {
            return Err(TessellaError::config("no stores defined in config"));
        }
        for (store_id, store) in &self.stores {
            for template in &store.slug_templates {
                if !self.slugs.contains_key(template) {
                    return Err(TessellaError::config(format!(
                        "store '{store_id}' references unknown slug rule '{template}'"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load the project config from `dir/tessella.toml`. Returns the default
/// config if the file does not exist.
pub fn load_config(dir: &Path) -> Result<AppConfig> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }
    load_config_from(&path)
}

/// Load the project config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| TessellaError::io(path, e))?;
    toml::from_str(&content)
        .map_err(|e| TessellaError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Write a default config file into `dir`, returning its path.
pub fn init_config(dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| TessellaError::io(dir, e))?;
    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| TessellaError::config(e.to_string()))?;
    std::fs::write(&path, content).map_err(|e| TessellaError::io(&path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResourceType;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("cache_dir"));
        assert!(toml_str.contains("[stores.default]"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.server.url, "http://localhost:7111");
        assert_eq!(parsed.build.cache_dir, PathBuf::from(".tessella/cache"));
    }

    #[test]
    fn full_config_parses() {
        let toml_str = r#"
run = ["manifest-label", "metadata-topics"]

[server]
url = "https://example.org"

[build]
cache_dir = ".site/cache"
build_dir = ".site/build"
enrich_concurrency = 8

[stores.local]
type = "disk"
path = "content"
pattern = "**/*.json"
sub_files = true
skip = ["manifest-homepage"]

[stores.api]
type = "remote"
url = "https://example.org/iiif/collection.json"
save_manifests = true
slug_templates = ["manifests"]
run = ["slug-source", "manifest-label"]

[slugs.manifests]
type = "Manifest"
prefix = "https://example.org/iiif"
pattern = "/:id/manifest.json"
slug_template = "manifests/:id"
examples = ["https://example.org/iiif/123/manifest.json"]

[plugins.metadata-topics]
language = "en"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.stores.len(), 2);
        assert_eq!(config.run.as_deref().map(<[String]>::len), Some(2));

        let api = &config.stores["api"];
        match &api.source {
            StoreSource::Remote { save_manifests, .. } => assert!(save_manifests),
            StoreSource::Disk { .. } => panic!("expected remote store"),
        }
        assert_eq!(api.slug_templates, vec!["manifests"]);

        let rule = &config.slugs["manifests"];
        assert_eq!(rule.kind, ResourceType::Manifest);
        assert_eq!(rule.examples.len(), 1);

        config.validate().expect("valid config");
    }

    #[test]
    fn unknown_store_type_is_a_parse_error() {
        let toml_str = r#"
[stores.bad]
type = "ftp"
path = "content"
"#;
        let err = toml::from_str::<AppConfig>(toml_str).unwrap_err();
        assert!(err.to_string().contains("ftp") || err.to_string().contains("unknown variant"));
    }

    #[test]
    fn unknown_slug_template_fails_validation() {
        let mut config = AppConfig::default();
        config
            .stores
            .get_mut("default")
            .expect("default store")
            .slug_templates
            .push("missing".into());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unknown slug rule 'missing'"));
    }
}
