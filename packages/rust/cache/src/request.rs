//! Content-addressed on-disk cache for remote requests.
//!
//! Shared across a store's resources. Entries are keyed by the SHA-256
//! of the URL; concurrent first-time fetches of the same URL are
//! serialized through a per-URL single-flight guard so two plugins can
//! never race on writing the same entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tessella_shared::{Result, TessellaError};

use crate::resource::write_json;

pub struct RequestCache {
    dir: PathBuf,
    client: reqwest::Client,
    memory: Mutex<HashMap<String, Arc<Value>>>,
    flights: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RequestCache {
    /// Cache rooted at `<request_cache_dir>/<store_key>`.
    pub fn new(store_key: &str, request_cache_dir: &Path) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("tessella/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| TessellaError::Network(format!("client build: {e}")))?;
        Ok(Self {
            dir: request_cache_dir.join(store_key),
            client,
            memory: Mutex::new(HashMap::new()),
            flights: Mutex::new(HashMap::new()),
        })
    }

    /// Location of the on-disk cache entry for a URL.
    pub fn entry_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(format!("{:x}.json", hasher.finalize()))
    }

    /// Fetch a JSON document, preferring memory, then disk, then the
    /// network.
    pub async fn fetch(&self, url: &str) -> Result<Arc<Value>> {
        if let Some(hit) = self.memory.lock().await.get(url) {
            return Ok(hit.clone());
        }

        // Single-flight: only one task populates a given URL's entry.
        let flight = {
            let mut flights = self.flights.lock().await;
            flights.entry(url.to_string()).or_default().clone()
        };
        let _guard = flight.lock().await;

        // Another task may have landed the entry while we waited.
        if let Some(hit) = self.memory.lock().await.get(url) {
            return Ok(hit.clone());
        }

        let path = self.entry_path(url);
        if let Ok(bytes) = tokio::fs::read(&path).await {
            match serde_json::from_slice::<Value>(&bytes) {
                Ok(value) => {
                    let value = Arc::new(value);
                    self.memory
                        .lock()
                        .await
                        .insert(url.to_string(), value.clone());
                    return Ok(value);
                }
                Err(e) => {
                    warn!(url, error = %e, "unparseable request cache entry, refetching");
                }
            }
        }

        debug!(url, "fetching");
        let value = self.fetch_fresh(url).await?;
        write_json(&path, value.as_ref()).await?;
        self.memory
            .lock()
            .await
            .insert(url.to_string(), value.clone());
        Ok(value)
    }

    /// Compare the cached entry against a fresh fetch. A changed (or
    /// never-cached) document replaces the cache entry, so a subsequent
    /// [`RequestCache::fetch`] observes the fresh state.
    pub async fn did_change(&self, url: &str) -> Result<bool> {
        let path = self.entry_path(url);
        let cached = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
            Err(_) => None,
        };
        let Some(cached) = cached else {
            return Ok(true);
        };

        let fresh = self.fetch_fresh(url).await?;
        let changed = fingerprint(&cached) != fingerprint(&fresh);
        if changed {
            write_json(&path, fresh.as_ref()).await?;
            self.memory.lock().await.insert(url.to_string(), fresh);
        }
        Ok(changed)
    }

    async fn fetch_fresh(&self, url: &str) -> Result<Arc<Value>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TessellaError::Network(format!("{url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TessellaError::Network(format!("{url}: HTTP {status}")));
        }
        let value: Value = response
            .json()
            .await
            .map_err(|e| TessellaError::Network(format!("{url}: {e}")))?;
        Ok(Arc::new(value))
    }
}

/// Stable content fingerprint of a JSON document.
pub fn fingerprint(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
