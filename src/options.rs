//! Loader options.
//!
//! Data options deserialize from TOML (the CLI host reads `imgforge.toml`);
//! the engine handle and the `before_fetch` hook can only be supplied
//! programmatically and are skipped by serde.
//!
//! Defaults mirror a plain "optimize in place" run: keep the filename
//! (`[oldname]`), treat `.fetch` files as remote pointers, no caching.

use crate::engine::TransformEngine;
use crate::fetch::{BeforeFetchHook, FetchEngine};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Registry name of the transform engine (`"image"` is built in).
    /// Ignored when [`Options::engine_handle`] is set.
    pub engine: String,

    /// Registry name of the fetch/download-cache engine (`"http"` is built
    /// in). Ignored when [`Options::fetch_engine_handle`] is set.
    pub fetch_engine: String,

    /// Output filename template. Placeholders: `[oldname]`, `[width]`,
    /// `[height]`. The final extension is always appended from the transform
    /// result's format.
    pub rename: String,

    /// Global transform parallelism, applied once at runtime initialization.
    /// The CLI host sizes its worker pool with this.
    pub concurrency: Option<usize>,

    /// Global fetch parallelism, forwarded to the HTTP client's
    /// per-host connection pool.
    pub fetch_concurrency: Option<usize>,

    /// Extension marking a resource as a remote pointer file.
    pub fetch_file_ext: String,

    /// Keep downloaded bytes in the disk cache.
    pub cache_downloads: bool,

    /// Keep transform results in the disk cache.
    pub cache_results: bool,

    /// Directory for both caches.
    pub cache_dir: PathBuf,

    /// Freshness window for cache entries. Absent means entries never expire.
    pub cache_duration_secs: Option<u64>,

    /// Timestamped diagnostic logging on stderr.
    pub debug: bool,

    /// Pre-built engine handle, takes precedence over [`Options::engine`].
    #[serde(skip)]
    pub engine_handle: Option<Arc<dyn TransformEngine>>,

    /// Pre-built fetch engine handle, takes precedence over
    /// [`Options::fetch_engine`].
    #[serde(skip)]
    pub fetch_engine_handle: Option<Arc<dyn FetchEngine>>,

    /// Hook rewriting the fetch URL/options before each download.
    #[serde(skip)]
    pub before_fetch: Option<BeforeFetchHook>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            engine: "image".into(),
            fetch_engine: "http".into(),
            rename: "[oldname]".into(),
            concurrency: None,
            fetch_concurrency: None,
            fetch_file_ext: "fetch".into(),
            cache_downloads: false,
            cache_results: false,
            cache_dir: PathBuf::from(".cache"),
            cache_duration_secs: None,
            debug: false,
            engine_handle: None,
            fetch_engine_handle: None,
            before_fetch: None,
        }
    }
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("engine", &self.engine)
            .field("fetch_engine", &self.fetch_engine)
            .field("rename", &self.rename)
            .field("concurrency", &self.concurrency)
            .field("fetch_concurrency", &self.fetch_concurrency)
            .field("fetch_file_ext", &self.fetch_file_ext)
            .field("cache_downloads", &self.cache_downloads)
            .field("cache_results", &self.cache_results)
            .field("cache_dir", &self.cache_dir)
            .field("cache_duration_secs", &self.cache_duration_secs)
            .field("debug", &self.debug)
            .field("engine_handle", &self.engine_handle.as_ref().map(|_| ".."))
            .field(
                "fetch_engine_handle",
                &self.fetch_engine_handle.as_ref().map(|_| ".."),
            )
            .field("before_fetch", &self.before_fetch.as_ref().map(|_| ".."))
            .finish()
    }
}

impl Options {
    /// Parse options from TOML (the CLI host's `imgforge.toml`).
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Cache freshness window as a [`Duration`], if one is configured.
    pub fn cache_duration(&self) -> Option<Duration> {
        self.cache_duration_secs.map(Duration::from_secs)
    }
}

/// A stock options file with every data option documented.
pub fn stock_options_toml() -> String {
    r##"# imgforge options
#
# Every option is listed with its default. Delete what you don't change.

# Transform engine registry name ("image" is built in). Hosts embedding
# imgforge as a library can inject a pre-built engine handle instead.
engine = "image"

# Fetch/download-cache engine registry name ("http" is built in).
fetch_engine = "http"

# Output filename template. Placeholders: [oldname], [width], [height].
# The extension is always appended from the transform result's format, so
# "[oldname]" turns test.jpg?format=webp into test.webp.
rename = "[oldname]"

# Worker parallelism. Defaults to one worker per CPU core.
#concurrency = 4

# HTTP connection-pool size for remote fetches.
#fetch_concurrency = 4

# Files with this extension are pointer files: JSON bodies with a "url" key
# naming the remote image to download and optimize.
fetch_file_ext = "fetch"

# Keep downloaded bytes on disk so repeated builds skip the network.
cache_downloads = false

# Keep transform results on disk so unchanged inputs skip re-encoding.
cache_results = false

# Directory for both caches.
cache_dir = ".cache"

# Seconds before a cache entry goes stale. Omit to keep entries forever.
#cache_duration_secs = 86400

# Timestamped diagnostic logging on stderr.
debug = false
"##
    .to_string()
}
