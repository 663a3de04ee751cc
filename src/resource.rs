//! Resource descriptor: parsing of `path?query` identifiers and output path
//! templating.
//!
//! A bundler hands the loader resource identifiers like
//! `/site/images/test.jpg?format=webp&width=800`. This module splits them into
//! semantic fields — source extension, requested width/height/format, a
//! stable content-derived id — and renders the final output path from the
//! rename template once the transform result is known.
//!
//! ## Query parameters
//!
//! `width`, `height` and `format` are the recognized parameters. An absent
//! parameter and an empty one (`?format=`) are treated identically: no value.
//! Formats are normalized on read: lowercased, with the `jpg` spelling
//! rewritten to `jpeg` (the canonical name engines report).
//!
//! ## Output path templating
//!
//! The rename template supports `[oldname]`, `[width]` and `[height]`.
//! Substitution is single-pass and replaces only the first occurrence of each
//! placeholder; a template repeating `[width]` keeps the second occurrence
//! literal. The result format is appended as the new extension and the
//! original directory is preserved:
//!
//! ```text
//! /img/test.jpg?format=webp&width=800  +  "[oldname]-[width]w"
//!     → /img/test-800w.webp
//! ```

use crate::engine::TransformResult;
use crate::error::LoaderError;
use crate::options::Options;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Parsed resource identifier. Immutable once constructed; every accessor is
/// a pure function of the identifier and the options it was built with.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    resource: String,
    path: PathBuf,
    query: Vec<(String, String)>,
    fetch_file_ext: String,
    rename: String,
}

impl ResourceInfo {
    pub fn new(resource: &str, options: &Options) -> Self {
        // Fragments never reach the filesystem or the engine; drop them the
        // way a URL parser would.
        let without_fragment = resource.split('#').next().unwrap_or_default();
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, query),
            None => (without_fragment, ""),
        };

        let query = url::form_urlencoded::parse(query.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        Self {
            resource: resource.to_string(),
            path: PathBuf::from(path),
            query,
            fetch_file_ext: options.fetch_file_ext.clone(),
            rename: options.rename.clone(),
        }
    }

    /// The full identifier as the host passed it, query included.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Filesystem path portion of the identifier.
    pub fn from_path(&self) -> &Path {
        &self.path
    }

    /// Last dot-segment of the path, case preserved. Empty when the file has
    /// no extension.
    pub fn from_ext(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }

    /// First query value for `name`. Absent and empty collapse to `None`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    /// Stable content-derived identifier: SHA-256 of the full resource
    /// identifier string, hex encoded.
    pub fn resource_id(&self) -> String {
        format!("{:x}", Sha256::digest(self.resource.as_bytes()))
    }

    /// Whether this resource is a remote pointer file (extension matches the
    /// configured fetch marker, case-insensitively).
    pub fn is_fetch_pointer(&self) -> bool {
        self.from_ext().eq_ignore_ascii_case(&self.fetch_file_ext)
    }

    /// Requested output width, as given in the query.
    pub fn to_width(&self) -> Option<&str> {
        self.param("width")
    }

    /// Requested output height, as given in the query.
    pub fn to_height(&self) -> Option<&str> {
        self.param("height")
    }

    /// Requested output format, normalized: lowercased, `jpg` → `jpeg`.
    /// `None` means "preserve the original format" — the engine decides.
    pub fn to_format(&self) -> Option<String> {
        self.param("format").map(|f| {
            let format = f.to_lowercase();
            if format == "jpg" { "jpeg".into() } else { format }
        })
    }

    /// Render the output path for a transform result.
    ///
    /// Substitutes `[oldname]`, `[width]` and `[height]` into the rename
    /// template (first occurrence only; absent dimensions become the empty
    /// string), appends the result format as the extension, and keeps the
    /// original directory.
    ///
    /// Fails when the result carries no format — without it there is no
    /// extension to emit.
    pub fn final_path(&self, result: &TransformResult) -> Result<PathBuf, LoaderError> {
        if result.format.is_empty() {
            return Err(LoaderError::MissingFormat);
        }

        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("");
        let width = result.width.map(|w| w.to_string()).unwrap_or_default();
        let height = result.height.map(|h| h.to_string()).unwrap_or_default();

        let name = self
            .rename
            .replacen("[oldname]", stem, 1)
            .replacen("[width]", &width, 1)
            .replacen("[height]", &height, 1);

        let file = format!("{name}.{}", result.format);
        Ok(match self.path.parent() {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        })
    }
}
