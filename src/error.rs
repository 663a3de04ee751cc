//! Loader-level error taxonomy.
//!
//! Module-specific failures ([`PointerError`](crate::pointer::PointerError),
//! [`FetchError`](crate::fetch::FetchError),
//! [`EngineError`](crate::engine::EngineError),
//! [`CacheError`](crate::cache::CacheError)) aggregate into [`LoaderError`],
//! which is what workers hand back to the host.
//!
//! Two severities exist:
//!
//! - **Fatal** ([`LoaderError::is_fatal`] returns `true`): the process-level
//!   setup is broken — an unresolvable engine name, an HTTP client that cannot
//!   be constructed, or a `before_fetch` hook producing an unusable request.
//!   The host should abort the whole run instead of reporting per resource.
//! - **Per-resource**: everything else. The resource fails, the run continues.
//!
//! Cache failures are special: the worker never returns them as errors at all.
//! It downgrades them to warnings in
//! [`LoaderOutput::warnings`](crate::worker::LoaderOutput) and processes the
//! resource as if caching were disabled.

use crate::cache::CacheError;
use crate::engine::EngineError;
use crate::fetch::FetchError;
use crate::pointer::PointerError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoaderError {
    /// A configured engine name (transform or fetch) is not in the registry
    /// and no handle was injected. Fatal: nothing can be processed without
    /// both capabilities resolved.
    #[error(
        "unable to resolve {kind} engine {name:?}; use a registered name or pass an engine handle in the options"
    )]
    EngineUnresolved { kind: &'static str, name: String },

    /// The `before_fetch` hook produced a request the loader cannot use.
    /// Fatal: a broken hook would fail every fetch the same way.
    #[error("result of the before_fetch hook {0}")]
    HookRewrite(String),

    #[error("error parsing fetch pointer file: {0}")]
    Pointer(#[from] PointerError),

    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("image transform failed: {0}")]
    Engine(#[from] EngineError),

    #[error("cache failure: {0}")]
    Cache(#[from] CacheError),

    /// The transform result carries no format, so no output path can be built.
    #[error("transform result has no format information")]
    MissingFormat,

    /// A `width`/`height` query value that is present but not a positive integer.
    #[error("invalid {name} value {value:?} in resource query")]
    InvalidDimension { name: &'static str, value: String },

    /// The engine returned an empty result set for the requested (width, format).
    #[error("transform engine produced no result")]
    EmptyResult,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LoaderError {
    /// Whether the host should abort the whole run rather than report this
    /// error against a single resource.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EngineUnresolved { .. } | Self::HookRewrite(_) | Self::Fetch(FetchError::Client(_))
        )
    }
}
