//! File fingerprints used as load-invalidation keys.

use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use tessella_shared::{Result, TessellaError};

/// mtime + size key for one file. Cheap, and stable between builds that
/// did not touch the file.
pub fn file_key(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path).map_err(|e| TessellaError::io(path, e))?;
    let mtime = meta
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|duration| format!("{}.{:09}", duration.as_secs(), duration.subsec_nanos()))
        .unwrap_or_else(|| "0".to_string());
    Ok(format!("{mtime}-{}", meta.len()))
}

/// Combined key for a file plus its grouped sidecar files.
pub fn group_key(path: &Path, sub_files: &[std::path::PathBuf]) -> Result<String> {
    let mut key = file_key(path)?;
    if !sub_files.is_empty() {
        let mut hasher = Sha256::new();
        for sub in sub_files {
            hasher.update(sub.to_string_lossy().as_bytes());
            hasher.update(file_key(sub)?.as_bytes());
        }
        key.push_str(&format!("_dir:{:x}", hasher.finalize()));
    }
    Ok(key)
}
