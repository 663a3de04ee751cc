//! Process-scoped runtime: engine resolution and the shared fetch engine.
//!
//! The host initializes a [`Runtime`] once at startup and passes it into
//! every worker — explicit dependency injection instead of a lazily-resolved
//! global. After construction the runtime is read-only, so workers on
//! different threads share it freely.
//!
//! Two external capabilities are resolved here: the transform engine and the
//! fetch/download-cache engine. Each takes an explicit pre-built handle when
//! the options carry one, otherwise a registry name (`"image"` and `"http"`
//! are the built-ins). An unknown name is a fatal error: nothing can be
//! processed without both capabilities, so the host should abort the run
//! rather than report it per resource. Global concurrency settings are
//! applied here, exactly once: the fetch limit goes into the HTTP client's
//! pool, the transform limit is exposed through [`Runtime::worker_threads`]
//! for the host's pool.

use crate::engine::{ImageEngine, TransformEngine};
use crate::error::LoaderError;
use crate::fetch::{FetchEngine, Fetcher};
use crate::options::Options;
use std::fmt;
use std::sync::Arc;

pub struct Runtime {
    engine: Arc<dyn TransformEngine>,
    fetcher: Arc<dyn FetchEngine>,
    worker_threads: Option<usize>,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("worker_threads", &self.worker_threads)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Resolve both engines. Call once per process, before any worker runs.
    pub fn initialize(options: &Options) -> Result<Arc<Self>, LoaderError> {
        let engine: Arc<dyn TransformEngine> = match &options.engine_handle {
            Some(handle) => Arc::clone(handle),
            None => match options.engine.as_str() {
                "image" => Arc::new(ImageEngine::new()),
                name => {
                    return Err(LoaderError::EngineUnresolved {
                        kind: "transform",
                        name: name.to_string(),
                    });
                }
            },
        };

        let fetcher: Arc<dyn FetchEngine> = match &options.fetch_engine_handle {
            Some(handle) => Arc::clone(handle),
            None => match options.fetch_engine.as_str() {
                "http" => Arc::new(Fetcher::new(options)?),
                name => {
                    return Err(LoaderError::EngineUnresolved {
                        kind: "fetch",
                        name: name.to_string(),
                    });
                }
            },
        };

        Ok(Arc::new(Self {
            engine,
            fetcher,
            worker_threads: options.concurrency,
        }))
    }

    pub fn engine(&self) -> &dyn TransformEngine {
        self.engine.as_ref()
    }

    pub fn fetcher(&self) -> &dyn FetchEngine {
        self.fetcher.as_ref()
    }

    /// Transform parallelism requested in the options, for the host to size
    /// its worker pool with. `None` means "host default".
    pub fn worker_threads(&self) -> Option<usize> {
        self.worker_threads
    }
}
