//! Fetch pointer files.
//!
//! A pointer file stands in for a remote image: its content is a small JSON
//! body naming the URL to download, and the loader optimizes the downloaded
//! bytes as if they were the file's own content.
//!
//! ```json
//! { "url": "https://picsum.photos/800/600.jpg" }
//! ```
//!
//! Only `url` is required; extra fields are ignored. Parsing fails hard —
//! invalid JSON, a missing or empty `url`, or a value that does not parse as
//! a URL all abort the resource's processing. There is nothing sensible to
//! fall back to when the pointer itself is broken.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum PointerError {
    #[error("content is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty or missing \"url\" key")]
    MissingUrl,
    #[error("\"url\" value {url:?} is not a valid url: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

/// Validated pointer-file content.
#[derive(Debug, Clone)]
pub struct FetchPointer {
    pub url: Url,
}

impl FetchPointer {
    /// Parse and validate raw pointer-file content.
    pub fn parse(content: &[u8]) -> Result<Self, PointerError> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            url: Option<String>,
        }

        let raw: Raw = serde_json::from_slice(content)?;
        let url = raw
            .url
            .filter(|u| !u.is_empty())
            .ok_or(PointerError::MissingUrl)?;
        let parsed = Url::parse(&url).map_err(|source| PointerError::InvalidUrl { url, source })?;

        Ok(Self { url: parsed })
    }
}
