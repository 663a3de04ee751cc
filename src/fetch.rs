//! Remote image download with an optional disk download-cache.
//!
//! Downloads go through the [`FetchEngine`] trait; the built-in [`Fetcher`]
//! owns the blocking HTTP client for the whole process. Before a
//! download, the host's `before_fetch` hook (if any) may rewrite the request;
//! the hook returns a [`FetchRewrite`] — a tagged choice of a parsed URL, a
//! plain address string, or a structured request with headers — so there is no
//! runtime shape-sniffing of its result.
//!
//! The download cache stores raw response bytes under
//! `<cache_dir>/fetch-<sha256(url)>` and trusts entries younger than the
//! configured duration. Cache read/write failures never fail a download: the
//! fetcher falls back to the network and reports the problem as a warning.

use crate::options::Options;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FetchError {
    /// The HTTP client could not be constructed. Treated as fatal by the
    /// loader: no fetch can ever succeed without a client.
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("GET {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("invalid fetch url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("download cache read: {0}")]
    CacheRead(#[source] std::io::Error),
    #[error("download cache write: {0}")]
    CacheWrite(#[source] std::io::Error),
}

/// Extra request settings carried by a structured hook rewrite.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Header name/value pairs applied to the GET request.
    pub headers: Vec<(String, String)>,
}

/// What a `before_fetch` hook hands back. Exactly three cases, decided by the
/// hook author at the call site.
#[derive(Debug, Clone)]
pub enum FetchRewrite {
    /// An already-parsed URL.
    Url(Url),
    /// A URL as a string, parsed by the loader.
    Address(String),
    /// A full request: URL string plus fetch options.
    Request { url: String, options: FetchOptions },
}

/// Hook rewriting the fetch request. Receives the pointer URL and the full
/// resource identifier it came from.
pub type BeforeFetchHook = Arc<dyn Fn(&Url, &str) -> FetchRewrite + Send + Sync>;

/// Result of a fetch: the bytes plus any non-fatal cache problems
/// encountered along the way.
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub from_cache: bool,
    pub warnings: Vec<FetchError>,
}

/// The fetch/download-cache capability. [`Fetcher`] is the built-in
/// implementation; hosts can inject another one through
/// [`Options::fetch_engine_handle`](crate::options::Options::fetch_engine_handle).
pub trait FetchEngine: Send + Sync {
    fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<Fetched, FetchError>;
}

/// Built-in fetch engine: blocking HTTP GET plus the disk download-cache.
pub struct Fetcher {
    client: reqwest::blocking::Client,
    cache_downloads: bool,
    cache_dir: PathBuf,
    duration: Option<Duration>,
}

impl Fetcher {
    pub fn new(options: &Options) -> Result<Self, FetchError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(limit) = options.fetch_concurrency {
            builder = builder.pool_max_idle_per_host(limit);
        }
        let client = builder.build().map_err(FetchError::Client)?;

        Ok(Self {
            client,
            cache_downloads: options.cache_downloads,
            cache_dir: options.cache_dir.clone(),
            duration: options.cache_duration(),
        })
    }

    fn entry_path(&self, url: &Url) -> PathBuf {
        let key = format!("{:x}", Sha256::digest(url.as_str().as_bytes()));
        self.cache_dir.join(format!("fetch-{key}"))
    }
}

impl FetchEngine for Fetcher {
    /// Download `url`, consulting and feeding the disk cache when enabled.
    fn fetch(&self, url: &Url, options: &FetchOptions) -> Result<Fetched, FetchError> {
        let mut warnings = Vec::new();

        let entry = self.cache_downloads.then(|| self.entry_path(url));
        if let Some(path) = &entry
            && is_fresh(path, self.duration)
        {
            match std::fs::read(path) {
                Ok(bytes) => {
                    return Ok(Fetched {
                        bytes,
                        from_cache: true,
                        warnings,
                    });
                }
                Err(err) => warnings.push(FetchError::CacheRead(err)),
            }
        }

        let mut request = self.client.get(url.clone());
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().map_err(|source| FetchError::Request {
            url: url.to_string(),
            source,
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|source| FetchError::Request {
                url: url.to_string(),
                source,
            })?
            .to_vec();

        if let Some(path) = &entry
            && let Err(err) = write_entry(path, &bytes)
        {
            warnings.push(FetchError::CacheWrite(err));
        }

        Ok(Fetched {
            bytes,
            from_cache: false,
            warnings,
        })
    }
}

/// Turn a hook's [`FetchRewrite`] into a concrete (URL, options) pair.
///
/// An empty URL is a broken hook ([`RewriteError::Empty`], escalated to a
/// fatal error by the worker); a non-empty string that merely fails to parse
/// is an ordinary per-resource fetch failure.
pub fn apply_rewrite(rewrite: FetchRewrite) -> Result<(Url, FetchOptions), RewriteError> {
    match rewrite {
        FetchRewrite::Url(url) => Ok((url, FetchOptions::default())),
        FetchRewrite::Address(address) => parse_address(address, FetchOptions::default()),
        FetchRewrite::Request { url, options } => parse_address(url, options),
    }
}

fn parse_address(
    address: String,
    options: FetchOptions,
) -> Result<(Url, FetchOptions), RewriteError> {
    if address.trim().is_empty() {
        return Err(RewriteError::Empty);
    }
    match Url::parse(&address) {
        Ok(url) => Ok((url, options)),
        Err(source) => Err(RewriteError::Invalid(FetchError::InvalidUrl {
            url: address,
            source,
        })),
    }
}

/// Failure modes of a hook rewrite. `Empty` means the hook itself is broken
/// (fatal); `Invalid` is an ordinary per-resource fetch failure.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("has an empty \"url\" value")]
    Empty,
    #[error(transparent)]
    Invalid(FetchError),
}

fn is_fresh(path: &std::path::Path, duration: Option<Duration>) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    match duration {
        None => true,
        Some(window) => metadata
            .modified()
            .ok()
            .and_then(|mtime| mtime.elapsed().ok())
            .is_some_and(|age| age <= window),
    }
}

fn write_entry(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrite_url_passes_through() {
        let url = Url::parse("https://example.com/a.jpg").unwrap();
        let (out, options) = apply_rewrite(FetchRewrite::Url(url.clone())).unwrap();
        assert_eq!(out, url);
        assert!(options.headers.is_empty());
    }

    #[test]
    fn rewrite_address_parses() {
        let (out, _) =
            apply_rewrite(FetchRewrite::Address("https://example.com/b.png?lock=2".into()))
                .unwrap();
        assert_eq!(out.query(), Some("lock=2"));
    }

    #[test]
    fn rewrite_request_keeps_options() {
        let (out, options) = apply_rewrite(FetchRewrite::Request {
            url: "https://example.com/c.webp".into(),
            options: FetchOptions {
                headers: vec![("accept".into(), "image/webp".into())],
            },
        })
        .unwrap();
        assert_eq!(out.path(), "/c.webp");
        assert_eq!(options.headers.len(), 1);
    }

    #[test]
    fn empty_address_is_a_broken_hook() {
        let err = apply_rewrite(FetchRewrite::Address("  ".into())).unwrap_err();
        assert!(matches!(err, RewriteError::Empty));
    }

    #[test]
    fn unparseable_address_is_a_fetch_error() {
        let err = apply_rewrite(FetchRewrite::Address("not a url".into())).unwrap_err();
        assert!(matches!(
            err,
            RewriteError::Invalid(FetchError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn freshness_without_duration_never_expires() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("entry");
        std::fs::write(&path, b"x").unwrap();
        assert!(is_fresh(&path, None));
        assert!(is_fresh(&path, Some(Duration::from_secs(3600))));
    }

    #[test]
    fn missing_entry_is_never_fresh() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(!is_fresh(&tmp.path().join("absent"), None));
    }

    #[test]
    fn zero_duration_expires_immediately() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("entry");
        std::fs::write(&path, b"x").unwrap();
        // mtime age is nonzero by the time we check
        std::thread::sleep(Duration::from_millis(5));
        assert!(!is_fresh(&path, Some(Duration::ZERO)));
    }
}
