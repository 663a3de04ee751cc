//! # imgforge
//!
//! Image loader core for build pipelines. A host bundler hands each matched
//! resource — a path plus an optional `?width=&height=&format=` query — to a
//! [`worker::LoaderWorker`], which optimizes or converts the image and
//! returns the transformed bytes together with a declarative
//! [`worker::ModulePatch`] the host applies to its module metadata.
//!
//! # Architecture: One Pass Per Resource
//!
//! ```text
//! resource id ─► descriptor ─► fetch? ─► cache? ─► engine ─► patch
//! ```
//!
//! Every step is a pure forward hand-off; nothing loops back. The host
//! controls parallelism by running workers concurrently — workers share only
//! the read-only [`runtime::Runtime`] and the disk caches.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`resource`] | Resource descriptor: query parsing, format normalization, output path templating |
//! | [`pointer`] | Pointer files: JSON bodies naming a remote image to fetch |
//! | [`fetch`] | HTTP download with disk download-cache and the `before_fetch` rewrite hook |
//! | [`cache`] | Disk cache of transform results, keyed by resource + content |
//! | [`engine`] | `TransformEngine` trait and the built-in `image`-crate engine |
//! | [`worker`] | The per-resource orchestration pipeline |
//! | [`runtime`] | Process-scoped engine resolution and shared fetcher |
//! | [`options`] | Recognized options and their defaults |
//! | [`error`] | Error taxonomy: fatal vs per-resource vs warning |
//!
//! # Design Decisions
//!
//! ## Engine Behind a Trait
//!
//! The loader never touches pixels. All transcoding goes through
//! [`engine::TransformEngine`]; the built-in engine delegates to the `image`
//! crate, and hosts can inject any other implementation through
//! [`options::Options::engine_handle`]. Tests run the whole pipeline against
//! a mock engine without decoding a single image.
//!
//! ## Explicit Runtime, No Globals
//!
//! Engine resolution happens exactly once, in
//! [`runtime::Runtime::initialize`], and the handle is passed into every
//! worker. There is no lazily-initialized global state to poison a process
//! when resolution fails — an unresolvable engine is a fatal error before
//! the first resource is touched.
//!
//! ## Declarative Patch-Back
//!
//! Instead of reaching into the host's module graph, a worker returns a
//! [`worker::ModulePatch`]: the new output path and the result metadata.
//! The host decides how to apply it. This keeps the core independent of any
//! particular bundler's internals.
//!
//! ## Failsafe Caching
//!
//! Both caches are best-effort. A missing cache directory, a corrupt entry,
//! a failed write — each becomes a warning on the worker's output and the
//! run continues as if caching were off. Only the resource's own pipeline
//! (pointer parsing, download, transform) can fail it.

pub mod cache;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod options;
pub mod pointer;
pub mod resource;
pub mod runtime;
pub mod worker;
