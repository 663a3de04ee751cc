//! The orchestration worker: one run per matched resource.
//!
//! A worker owns nothing shared — it borrows the process-scoped
//! [`Runtime`](crate::runtime::Runtime) and walks a strict forward sequence
//! with no branching back:
//!
//! ```text
//! descriptor → acquire bytes → cache lookup → transform → cache write
//!            → output path → module patch
//! ```
//!
//! "Acquire bytes" is the original content, or for pointer files a download
//! through the pre-fetch hook and the fetcher. The cache steps are failsafe:
//! any cache failure becomes a warning in [`LoaderOutput::warnings`] and the
//! run continues uncached. Everything else fails the resource.
//!
//! The worker never touches the host's module graph. It returns a
//! [`ModulePatch`] — a declarative rename-plus-re-encode instruction — and
//! the host applies it wherever its metadata lives.

use crate::cache::ResultCache;
use crate::engine::{TransformRequest, TransformResult};
use crate::error::LoaderError;
use crate::fetch::{self, FetchOptions, RewriteError};
use crate::options::Options;
use crate::pointer::FetchPointer;
use crate::resource::ResourceInfo;
use crate::runtime::Runtime;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

const LOADER_NAME: &str = "imgforge";

/// Start of the process, for the running-total stamp in debug logs.
static PROCESS_EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);
/// Whether anything has been logged yet (the first line gets a leading blank).
static LOG_STARTED: AtomicBool = AtomicBool::new(false);

/// Result metadata without the bytes — what the host records as build meta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultInfo {
    pub format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub source_type: String,
}

/// Declarative instruction for the host: emit the asset under `new_path`,
/// record `info` as its build metadata.
#[derive(Debug, Clone)]
pub struct ModulePatch {
    pub new_path: PathBuf,
    pub info: ResultInfo,
}

/// A successful run: the transformed bytes, the patch to apply, and any
/// non-fatal warnings collected along the way.
#[derive(Debug)]
pub struct LoaderOutput {
    pub buffer: Vec<u8>,
    pub patch: ModulePatch,
    pub warnings: Vec<LoaderError>,
}

impl LoaderOutput {
    /// Base64 of the output buffer, for hosts that keep an inline content
    /// encoding on the module. Computed on demand.
    pub fn encoded_content(&self) -> String {
        BASE64.encode(&self.buffer)
    }
}

pub struct LoaderWorker<'a> {
    info: ResourceInfo,
    content: Vec<u8>,
    options: &'a Options,
    runtime: &'a Runtime,
    started: Instant,
    warnings: Vec<LoaderError>,
}

impl<'a> LoaderWorker<'a> {
    pub fn new(
        resource: &str,
        content: Vec<u8>,
        options: &'a Options,
        runtime: &'a Runtime,
    ) -> Self {
        LazyLock::force(&PROCESS_EPOCH);
        Self {
            info: ResourceInfo::new(resource, options),
            content,
            options,
            runtime,
            started: Instant::now(),
            warnings: Vec::new(),
        }
    }

    /// Descriptor for the resource this worker is processing.
    pub fn info(&self) -> &ResourceInfo {
        &self.info
    }

    /// Run the pipeline to completion.
    pub fn run(mut self) -> Result<LoaderOutput, LoaderError> {
        let input = self.acquire_input()?;

        let cache = self.open_cache();
        let key = cache
            .as_ref()
            .map(|_| ResultCache::key(self.info.resource(), &input));

        let mut cache_note = "";
        let mut cached = None;
        if let (Some(cache), Some(key)) = (&cache, &key) {
            match cache.load(key) {
                Ok(Some(result)) => {
                    cache_note = "from cache";
                    cached = Some(result);
                }
                Ok(None) => {}
                Err(err) => self.warn(err.into()),
            }
        }

        let result = match cached {
            Some(result) => result,
            None => {
                let result = self.transform(&input)?;
                if let (Some(cache), Some(key)) = (&cache, &key) {
                    match cache.store(key, &result) {
                        Ok(()) => cache_note = "saved to cache",
                        Err(err) => self.warn(err.into()),
                    }
                }
                result
            }
        };

        let new_path = self.info.final_path(&result)?;
        self.debug_done(&new_path, cache_note);

        let info = ResultInfo {
            format: result.format.clone(),
            width: result.width,
            height: result.height,
            source_type: result.source_type.clone(),
        };
        Ok(LoaderOutput {
            buffer: result.buffer,
            patch: ModulePatch { new_path, info },
            warnings: self.warnings,
        })
    }

    /// The bytes to transform: the original content, or for pointer files
    /// the downloaded remote image.
    fn acquire_input(&mut self) -> Result<Vec<u8>, LoaderError> {
        if !self.info.is_fetch_pointer() {
            return Ok(std::mem::take(&mut self.content));
        }

        let pointer = FetchPointer::parse(&self.content)?;
        let (url, fetch_options) = match &self.options.before_fetch {
            Some(hook) => {
                let rewrite = hook(&pointer.url, self.info.resource());
                fetch::apply_rewrite(rewrite).map_err(|err| match err {
                    RewriteError::Empty => LoaderError::HookRewrite(err.to_string()),
                    RewriteError::Invalid(fetch_err) => LoaderError::Fetch(fetch_err),
                })?
            }
            None => (pointer.url.clone(), FetchOptions::default()),
        };

        self.debug(
            "download",
            &format!("{} -> {url}", self.info.resource()),
        );

        let fetched = self.runtime.fetcher().fetch(&url, &fetch_options)?;
        for warning in fetched.warnings {
            self.warn(warning.into());
        }
        if fetched.from_cache {
            self.debug("download", "served from download cache");
        }
        Ok(fetched.bytes)
    }

    /// Failsafe cache handle. Open failures degrade to a warning.
    fn open_cache(&mut self) -> Option<ResultCache> {
        if !self.options.cache_results {
            return None;
        }
        match ResultCache::open(&self.options.cache_dir, self.options.cache_duration()) {
            Ok(cache) => Some(cache),
            Err(err) => {
                self.warn(err.into());
                None
            }
        }
    }

    /// One engine invocation for one (width, format) pair; the first variant
    /// of the result set is the transform result.
    fn transform(&self, input: &[u8]) -> Result<TransformResult, LoaderError> {
        let request = self.transform_request()?;
        let mut results = self.runtime.engine().transform(input, &request)?;
        if results.is_empty() {
            return Err(LoaderError::EmptyResult);
        }
        Ok(results.swap_remove(0))
    }

    fn transform_request(&self) -> Result<TransformRequest, LoaderError> {
        let width = match self.info.to_width() {
            Some(raw) => Some(
                raw.parse::<u32>()
                    .ok()
                    .filter(|w| *w > 0)
                    .ok_or_else(|| LoaderError::InvalidDimension {
                        name: "width",
                        value: raw.to_string(),
                    })?,
            ),
            None => None,
        };
        Ok(TransformRequest {
            width,
            format: self.info.to_format(),
        })
    }

    fn warn(&mut self, err: LoaderError) {
        self.debug("warning", &err.to_string());
        self.warnings.push(err);
    }

    fn debug(&self, topic: &str, message: &str) {
        if !self.options.debug {
            return;
        }
        let lead = if LOG_STARTED.swap(true, Ordering::Relaxed) {
            ""
        } else {
            "\n"
        };
        eprintln!("{lead}[{LOADER_NAME}] {topic} {message}");
    }

    fn debug_done(&self, path: &Path, cache_note: &str) {
        if !self.options.debug {
            return;
        }
        let total = PROCESS_EPOCH.elapsed().as_secs_f64();
        let elapsed = self.started.elapsed().as_secs_f64();
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let note = if cache_note.is_empty() {
            String::new()
        } else {
            format!(" - {cache_note}")
        };
        self.debug(
            "done",
            &format!("+{total:.3}s -> {basename} ({elapsed:.3}s){note}"),
        );
    }
}
