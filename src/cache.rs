//! Transform result cache.
//!
//! Re-encoding is the expensive step of the pipeline, so the worker can keep
//! finished [`TransformResult`]s on disk and replay them on the next build.
//!
//! ## Keys
//!
//! The cache is **content-addressed**: the key is SHA-256 over the resource
//! identifier followed by the input bytes. Either a changed query string or
//! changed content produces a new key; nothing else invalidates an entry.
//! A valid, non-expired entry is trusted as equivalent to a fresh transform —
//! key equality is the only check, the stored bytes are not re-verified.
//!
//! ## Storage
//!
//! One JSON file per entry, `<cache_dir>/result-<key>.json`, holding the
//! result metadata with the output bytes encoded as base64. Freshness is the
//! entry file's mtime age against the configured duration; a stale entry is
//! simply a miss.
//!
//! ## Failsafe
//!
//! The cache must never take a build down. Open, load and store report typed
//! [`CacheError`]s, and the worker downgrades every one of them to a warning,
//! carrying on as if caching were disabled.

use crate::engine::TransformResult;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct ResultCache {
    dir: PathBuf,
    duration: Option<Duration>,
}

impl ResultCache {
    /// Open (and create, if needed) the cache directory.
    pub fn open(dir: &Path, duration: Option<Duration>) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            duration,
        })
    }

    /// Deterministic key over (resource identifier, input bytes).
    pub fn key(resource: &str, input: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(resource.as_bytes());
        hasher.update(input);
        format!("{:x}", hasher.finalize())
    }

    /// Load a cached result. `Ok(None)` on a miss or a stale entry; `Err` on
    /// an unreadable or corrupt one (the caller decides how loudly to care).
    pub fn load(&self, key: &str) -> Result<Option<TransformResult>, CacheError> {
        let path = self.entry_path(key);
        if !self.is_fresh(&path) {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)?;
        let result = serde_json::from_str(&text)?;
        Ok(Some(result))
    }

    /// Persist a result under `key`.
    pub fn store(&self, key: &str, result: &TransformResult) -> Result<(), CacheError> {
        let json = serde_json::to_string(result)?;
        std::fs::write(self.entry_path(key), json)?;
        Ok(())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("result-{key}.json"))
    }

    fn is_fresh(&self, path: &Path) -> bool {
        let Ok(metadata) = std::fs::metadata(path) else {
            return false;
        };
        match self.duration {
            None => true,
            Some(window) => metadata
                .modified()
                .ok()
                .and_then(|mtime| mtime.elapsed().ok())
                .is_some_and(|age| age <= window),
        }
    }
}
