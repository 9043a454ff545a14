//! Deferred, load-once JSON values.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::warn;

/// A JSON file read lazily, at most once per pipeline run.
///
/// Each resource gets fresh `LazyJson` values per stage — the memoization
/// is scoped to the value, never shared across resources or runs. A
/// missing or unparseable file resolves to `T::default()` rather than
/// failing; corrupt cache state is always recoverable by recomputation.
#[derive(Debug)]
pub struct LazyJson<T> {
    path: PathBuf,
    cell: OnceCell<T>,
}

impl<T> LazyJson<T>
where
    T: DeserializeOwned + Default,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cell: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and memoize the value.
    pub async fn get(&self) -> &T {
        self.cell
            .get_or_init(|| async {
                let bytes = match tokio::fs::read(&self.path).await {
                    Ok(bytes) => bytes,
                    Err(_) => return T::default(),
                };
                match serde_json::from_slice(&bytes) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(path = %self.path.display(), error = %e, "unparseable cache file, treating as empty");
                        T::default()
                    }
                }
            })
            .await
    }

    /// Owned copy of the value.
    pub async fn cloned(&self) -> T
    where
        T: Clone,
    {
        self.get().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use tessella_shared::JsonObject;

    use super::*;

    #[tokio::test]
    async fn missing_file_resolves_to_empty() {
        let lazy: LazyJson<JsonObject> = LazyJson::new("/nonexistent/meta.json");
        assert!(lazy.get().await.is_empty());
    }

    #[tokio::test]
    async fn unparseable_file_resolves_to_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta.json");
        std::fs::write(&path, "{ not json").expect("write");

        let lazy: LazyJson<JsonObject> = LazyJson::new(&path);
        assert!(lazy.get().await.is_empty());
    }

    #[tokio::test]
    async fn reads_at_most_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("meta.json");
        std::fs::write(&path, r#"{"label":"one"}"#).expect("write");

        let lazy: LazyJson<JsonObject> = LazyJson::new(&path);
        assert_eq!(lazy.get().await["label"], "one");

        // A later write is not observed within the same run.
        std::fs::write(&path, r#"{"label":"two"}"#).expect("write");
        assert_eq!(lazy.get().await["label"], "one");
    }
}
