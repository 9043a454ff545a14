//! Build-wide context: configuration, stores, plugins, directories.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tessella_cache::RequestCache;
use tessella_plugins::PluginRegistry;
use tessella_shared::{AppConfig, Result, ResourceType, StoreConfig, TessellaError};
use tessella_slugs::SlugEngine;
use tessella_stores::{StoreAdapter, StoreApi, create_store};

/// Options for one build invocation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Reuse cached state where invalidation allows.
    pub cache: bool,
    /// Narrow the build to a single resource (slug or source path).
    pub exact: Option<String>,
    /// Narrow the build to the named stores.
    pub stores: Vec<String>,
    /// Override the configured build directory.
    pub out: Option<PathBuf>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cache: true,
            exact: None,
            stores: Vec::new(),
            out: None,
        }
    }
}

/// One configured store with its instantiated adapter and its shared
/// request cache.
pub struct StoreEntry {
    pub id: String,
    pub config: StoreConfig,
    pub adapter: Box<dyn StoreAdapter>,
    pub request_cache: Arc<RequestCache>,
}

/// Everything a build run needs, created once before Discover.
///
/// Construction performs the fatal-before-any-stage checks: config
/// cross-references, slug rule example round-trips, store selection.
pub struct BuildContext {
    pub config: AppConfig,
    pub options: BuildOptions,
    pub registry: PluginRegistry,
    pub engine: SlugEngine,
    pub cache_dir: PathBuf,
    pub build_dir: PathBuf,
    pub server_url: String,
    stores: Vec<StoreEntry>,
}

impl BuildContext {
    pub fn new(
        config: AppConfig,
        registry: PluginRegistry,
        options: BuildOptions,
    ) -> Result<Self> {
        config.validate()?;
        let engine = SlugEngine::from_config(&config.slugs)?;

        let selected: Vec<&String> = config
            .stores
            .keys()
            .filter(|id| options.stores.is_empty() || options.stores.contains(*id))
            .collect();
        if selected.is_empty() {
            return Err(TessellaError::config(format!(
                "no stores found matching: {}",
                options.stores.join(", ")
            )));
        }

        let cache_dir = config.build.cache_dir.clone();
        let build_dir = options
            .out
            .clone()
            .unwrap_or_else(|| config.build.build_dir.clone());
        let request_cache_dir = cache_dir.join("_requests");

        let mut stores = Vec::with_capacity(selected.len());
        for id in selected {
            let store_config = config.stores[id].clone();
            let adapter = create_store(id, &store_config)?;
            stores.push(StoreEntry {
                id: id.clone(),
                config: store_config,
                adapter,
                request_cache: Arc::new(RequestCache::new(id, &request_cache_dir)?),
            });
        }

        let server_url = config.server.url.trim_end_matches('/').to_string();

        Ok(Self {
            config,
            options,
            registry,
            engine,
            cache_dir,
            build_dir,
            server_url,
            stores,
        })
    }

    pub fn stores(&self) -> &[StoreEntry] {
        &self.stores
    }

    pub fn store(&self, store_id: &str) -> Option<&StoreEntry> {
        self.stores.iter().find(|entry| entry.id == store_id)
    }

    pub fn store_config(&self, store_id: &str) -> Option<&StoreConfig> {
        self.store(store_id).map(|entry| &entry.config)
    }

    pub fn request_cache(&self, store_id: &str) -> Option<&Arc<RequestCache>> {
        self.store(store_id).map(|entry| &entry.request_cache)
    }

    pub fn store_api<'a>(&'a self, entry: &'a StoreEntry) -> StoreApi<'a> {
        StoreApi {
            store_id: &entry.id,
            engine: &self.engine,
            slug_templates: &entry.config.slug_templates,
            request_cache: &entry.request_cache,
        }
    }

    /// The global plugin allow-list, when configured.
    pub fn allow(&self) -> Option<&[String]> {
        self.config.run.as_deref()
    }

    /// Absolute identifier a resource resolves to when emitted.
    pub fn make_id(&self, kind: ResourceType, slug: &str) -> String {
        format!(
            "{}/{}/{}",
            self.server_url,
            slug.trim_start_matches('/'),
            kind.document_file()
        )
    }
}

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// Result of one build invocation.
#[derive(Debug, Clone)]
pub struct BuildSummary {
    /// Resources in the active set.
    pub resources: usize,
    /// Resources served from cache during Load.
    pub cached: usize,
    /// Resources re-loaded during Load.
    pub rebuilt: usize,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new stage.
    fn stage(&self, name: &str);
    /// Called per resource during Load.
    fn resource(&self, slug: &str, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, summary: &BuildSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _name: &str) {}
    fn resource(&self, _slug: &str, _current: usize, _total: usize) {}
    fn done(&self, _summary: &BuildSummary) {}
}
