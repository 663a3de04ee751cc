//! Transform engine seam and the built-in `image`-crate engine.
//!
//! The [`TransformEngine`] trait is the boundary between the loader pipeline
//! and the pixel work. The worker asks for exactly one target width and one
//! target format per run — either may be absent, meaning "engine decides" —
//! and accepts the first element of the returned result set.
//!
//! [`ImageEngine`] is the built-in production engine. Everything is delegated
//! to the `image` crate:
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Detect input format | `image::guess_format` |
//! | Decode | `image::load_from_memory_with_format` |
//! | Resize | `image::DynamicImage::resize` (Lanczos3) |
//! | Encode | `write_to` / `PngEncoder` at best compression |
//!
//! Hosts can swap the engine for any other implementation (a libvips sidecar,
//! a remote service) by injecting a handle through
//! [`Options::engine_handle`](crate::options::Options::engine_handle).

use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("could not detect input image format: {0}")]
    UnknownInput(#[source] image::ImageError),
    #[error("decode failed: {0}")]
    Decode(#[source] image::ImageError),
    #[error("unsupported output format {format:?}")]
    UnsupportedFormat { format: String },
    #[error("encode to {format} failed: {source}")]
    Encode {
        format: String,
        #[source]
        source: image::ImageError,
    },
}

/// One (width, format) pair. `None` means "engine decides": keep the source
/// width, keep the source format.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransformRequest {
    pub width: Option<u32>,
    pub format: Option<String>,
}

/// The output of one transform: final format, final dimensions, MIME type and
/// the raw bytes. Serializable so the result cache can persist it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformResult {
    pub format: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// MIME type, e.g. `image/webp`.
    pub source_type: String,
    #[serde(with = "base64_buffer")]
    pub buffer: Vec<u8>,
}

/// Boundary between the loader pipeline and the pixel work.
pub trait TransformEngine: Send + Sync {
    /// Transform `input` in memory for one (width, format) request.
    ///
    /// Returns the engine's result set; callers accept the first element.
    /// Nothing is written to disk.
    fn transform(
        &self,
        input: &[u8],
        request: &TransformRequest,
    ) -> Result<Vec<TransformResult>, EngineError>;
}

/// Built-in engine backed by the `image` crate.
///
/// Resizing never upscales: a requested width at or above the source width
/// leaves the image at its source dimensions.
pub struct ImageEngine;

impl ImageEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ImageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformEngine for ImageEngine {
    fn transform(
        &self,
        input: &[u8],
        request: &TransformRequest,
    ) -> Result<Vec<TransformResult>, EngineError> {
        let input_format = image::guess_format(input).map_err(EngineError::UnknownInput)?;
        let decoded = image::load_from_memory_with_format(input, input_format)
            .map_err(EngineError::Decode)?;

        let output_format = match &request.format {
            Some(name) => ImageFormat::from_extension(name)
                .ok_or_else(|| EngineError::UnsupportedFormat {
                    format: name.clone(),
                })?,
            None => input_format,
        };

        let image = match request.width {
            Some(width) if width < decoded.width() => {
                decoded.resize(width, u32::MAX, FilterType::Lanczos3)
            }
            _ => decoded,
        };

        let buffer = encode(&image, output_format)?;

        Ok(vec![TransformResult {
            format: format_name(output_format).to_string(),
            width: Some(image.width()),
            height: Some(image.height()),
            source_type: output_format.to_mime_type().to_string(),
            buffer,
        }])
    }
}

/// Encode to an in-memory buffer. PNG goes through the encoder at best
/// compression; JPEG needs the alpha channel stripped first.
fn encode(image: &DynamicImage, format: ImageFormat) -> Result<Vec<u8>, EngineError> {
    let mut buffer = Vec::new();
    let result = match format {
        ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buffer,
                CompressionType::Best,
                PngFilterType::Adaptive,
            );
            image.write_with_encoder(encoder)
        }
        ImageFormat::Jpeg if image.color().has_alpha() => DynamicImage::ImageRgb8(image.to_rgb8())
            .write_to(&mut Cursor::new(&mut buffer), format),
        _ => image.write_to(&mut Cursor::new(&mut buffer), format),
    };

    result.map_err(|source| EngineError::Encode {
        format: format_name(format).to_string(),
        source,
    })?;
    Ok(buffer)
}

/// Canonical format name for result metadata and output extensions.
/// JPEG reports as `jpeg`, never `jpg`.
fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "jpeg",
        ImageFormat::Png => "png",
        ImageFormat::WebP => "webp",
        ImageFormat::Gif => "gif",
        ImageFormat::Tiff => "tiff",
        other => other.extensions_str().first().copied().unwrap_or("bin"),
    }
}

mod base64_buffer {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}
