//! End-to-end loader runs: real engine, real files, mock HTTP server.

use httpmock::prelude::*;
use image::{DynamicImage, ImageFormat};
use imgforge::engine::{EngineError, ImageEngine, TransformEngine, TransformRequest, TransformResult};
use imgforge::error::LoaderError;
use imgforge::fetch::{FetchOptions, FetchRewrite};
use imgforge::options::Options;
use imgforge::runtime::Runtime;
use imgforge::worker::LoaderWorker;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

fn encoded_image(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
        width,
        height,
        image::Rgb([90, 120, 150]),
    ));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format).unwrap();
    buf
}

/// Write `content` as `name` into `dir` and return a resource identifier
/// with the given query appended.
fn resource_in(dir: &TempDir, name: &str, content: &[u8], query: &str) -> (PathBuf, String) {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    let resource = if query.is_empty() {
        path.display().to_string()
    } else {
        format!("{}?{query}", path.display())
    };
    (path, resource)
}

fn run(resource: &str, options: &Options) -> Result<imgforge::worker::LoaderOutput, LoaderError> {
    let runtime = Runtime::initialize(options).unwrap();
    let content = {
        let path = resource.split('?').next().unwrap();
        std::fs::read(path).unwrap()
    };
    LoaderWorker::new(resource, content, options, &runtime).run()
}

fn basename(output: &imgforge::worker::LoaderOutput) -> String {
    output
        .patch
        .new_path
        .file_name()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string()
}

// =========================================================================
// Local images
// =========================================================================

#[test]
fn local_optimization_without_query_params() {
    let tmp = TempDir::new().unwrap();
    let (_, resource) = resource_in(&tmp, "test.jpg", &encoded_image(64, 48, ImageFormat::Jpeg), "");

    let output = run(&resource, &Options::default()).unwrap();

    // jpg sources re-emit as jpeg under the default [oldname] template
    assert_eq!(basename(&output), "test.jpeg");
    assert_eq!(output.patch.info.source_type, "image/jpeg");
    assert_eq!(output.patch.info.width, Some(64));
    assert_eq!(output.patch.info.height, Some(48));
    assert_eq!(
        image::guess_format(&output.buffer).unwrap(),
        ImageFormat::Jpeg
    );
}

#[test]
fn local_convert_jpg_to_webp() {
    let tmp = TempDir::new().unwrap();
    let (_, resource) = resource_in(
        &tmp,
        "test.jpg",
        &encoded_image(64, 48, ImageFormat::Jpeg),
        "format=webp",
    );

    let output = run(&resource, &Options::default()).unwrap();

    assert_eq!(basename(&output), "test.webp");
    assert_eq!(output.patch.info.source_type, "image/webp");
    assert_eq!(
        image::guess_format(&output.buffer).unwrap(),
        ImageFormat::WebP
    );
}

#[test]
fn local_convert_resize_and_rename() {
    let tmp = TempDir::new().unwrap();
    let (_, resource) = resource_in(
        &tmp,
        "test.jpg",
        &encoded_image(1000, 600, ImageFormat::Jpeg),
        "format=webp&width=800",
    );

    let options = Options {
        rename: "[oldname]-[width]w".into(),
        ..Options::default()
    };
    let output = run(&resource, &options).unwrap();

    assert_eq!(basename(&output), "test-800w.webp");
    assert_eq!(output.patch.info.source_type, "image/webp");
    assert_eq!(output.patch.info.width, Some(800));
    assert_eq!(output.patch.info.height, Some(480));
    assert_eq!(
        image::guess_format(&output.buffer).unwrap(),
        ImageFormat::WebP
    );
}

#[test]
fn directory_is_preserved_in_the_patch() {
    let tmp = TempDir::new().unwrap();
    let (path, resource) = resource_in(&tmp, "test.png", &encoded_image(8, 8, ImageFormat::Png), "");

    let options = Options {
        rename: "[oldname]-opt".into(),
        ..Options::default()
    };
    let output = run(&resource, &options).unwrap();

    assert_eq!(output.patch.new_path, path.with_file_name("test-opt.png"));
    assert_eq!(output.patch.new_path.parent(), path.parent());
}

// =========================================================================
// Remote images (pointer files)
// =========================================================================

#[test]
fn remote_image_convert_resize_and_rename() {
    let server = MockServer::start();
    let remote = server.mock(|when, then| {
        when.method(GET).path("/img.png");
        then.status(200)
            .header("content-type", "image/png")
            .body(encoded_image(400, 300, ImageFormat::Png));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/img.png") }).to_string();
    let (_, resource) = resource_in(
        &tmp,
        "remote.fetch",
        pointer.as_bytes(),
        "format=webp&width=320",
    );

    let options = Options {
        rename: "test-[oldname]-[width]w".into(),
        ..Options::default()
    };
    let output = run(&resource, &options).unwrap();

    remote.assert();
    assert_eq!(basename(&output), "test-remote-320w.webp");
    assert_eq!(output.patch.info.width, Some(320));
    assert_eq!(output.patch.info.height, Some(240));
    assert_eq!(output.patch.info.source_type, "image/webp");
}

#[test]
fn custom_fetch_marker_extension() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/img.jpg");
        then.status(200).body(encoded_image(32, 32, ImageFormat::Jpeg));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/img.jpg") }).to_string();
    let (_, resource) = resource_in(&tmp, "remote.rimg", pointer.as_bytes(), "format=jpeg");

    let options = Options {
        fetch_file_ext: "rimg".into(),
        ..Options::default()
    };
    let output = run(&resource, &options).unwrap();

    assert_eq!(basename(&output), "remote.jpeg");
    assert_eq!(output.patch.info.source_type, "image/jpeg");
}

#[test]
fn pointer_without_url_key_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, resource) = resource_in(&tmp, "remote.fetch", br#"{"href": "nope"}"#, "");

    let err = run(&resource, &Options::default()).unwrap_err();
    assert!(matches!(err, LoaderError::Pointer(_)));
    assert!(!err.is_fatal());
}

#[test]
fn failing_download_fails_the_resource() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/gone.png");
        then.status(404);
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/gone.png") }).to_string();
    let (_, resource) = resource_in(&tmp, "remote.fetch", pointer.as_bytes(), "");

    let err = run(&resource, &Options::default()).unwrap_err();
    assert!(matches!(err, LoaderError::Fetch(_)));
    assert!(!err.is_fatal());
}

// =========================================================================
// before_fetch hook
// =========================================================================

#[test]
fn before_fetch_url_rewrite() {
    let server = MockServer::start();
    let locked = server.mock(|when, then| {
        when.method(GET).path("/img.png").query_param("lock", "1");
        then.status(200).body(encoded_image(16, 16, ImageFormat::Png));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/img.png") }).to_string();
    let (_, resource) = resource_in(&tmp, "hooked.fetch", pointer.as_bytes(), "format=jpeg");

    let options = Options {
        before_fetch: Some(Arc::new(|url, _resource| {
            let mut rewritten = url.clone();
            rewritten.query_pairs_mut().append_pair("lock", "1");
            FetchRewrite::Url(rewritten)
        })),
        ..Options::default()
    };
    let output = run(&resource, &options).unwrap();

    locked.assert();
    assert_eq!(basename(&output), "hooked.jpeg");
}

#[test]
fn before_fetch_string_rewrite() {
    let server = MockServer::start();
    let locked = server.mock(|when, then| {
        when.method(GET).path("/img.png").query_param("lock", "2");
        then.status(200).body(encoded_image(16, 16, ImageFormat::Png));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/img.png") }).to_string();
    let (_, resource) = resource_in(&tmp, "hooked.fetch", pointer.as_bytes(), "");

    let options = Options {
        before_fetch: Some(Arc::new(|url, _| FetchRewrite::Address(format!("{url}?lock=2")))),
        ..Options::default()
    };
    run(&resource, &options).unwrap();

    locked.assert();
}

#[test]
fn before_fetch_structured_request_sends_headers() {
    let server = MockServer::start();
    let authed = server.mock(|when, then| {
        when.method(GET)
            .path("/img.png")
            .header("x-api-key", "secret");
        then.status(200).body(encoded_image(16, 16, ImageFormat::Png));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/img.png") }).to_string();
    let (_, resource) = resource_in(&tmp, "hooked.fetch", pointer.as_bytes(), "");

    let options = Options {
        before_fetch: Some(Arc::new(|url, _| FetchRewrite::Request {
            url: url.to_string(),
            options: FetchOptions {
                headers: vec![("x-api-key".into(), "secret".into())],
            },
        })),
        ..Options::default()
    };
    run(&resource, &options).unwrap();

    authed.assert();
}

#[test]
fn before_fetch_empty_url_is_fatal() {
    let tmp = TempDir::new().unwrap();
    let (_, resource) = resource_in(
        &tmp,
        "hooked.fetch",
        br#"{"url": "https://example.com/a.png"}"#,
        "",
    );

    let options = Options {
        before_fetch: Some(Arc::new(|_, _| FetchRewrite::Address(String::new()))),
        ..Options::default()
    };
    let err = run(&resource, &options).unwrap_err();

    assert!(matches!(err, LoaderError::HookRewrite(_)));
    assert!(err.is_fatal());
}

// =========================================================================
// Caching
// =========================================================================

/// Engine wrapper counting invocations, for cache assertions.
struct CountingEngine {
    inner: ImageEngine,
    calls: AtomicUsize,
}

impl CountingEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ImageEngine::new(),
            calls: AtomicUsize::new(0),
        })
    }
}

impl TransformEngine for CountingEngine {
    fn transform(
        &self,
        input: &[u8],
        request: &TransformRequest,
    ) -> Result<Vec<TransformResult>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.transform(input, request)
    }
}

#[test]
fn result_cache_round_trip_is_byte_identical() {
    let tmp = TempDir::new().unwrap();
    let cache_dir = tmp.path().join("cache");
    let engine = CountingEngine::new();

    let options = Options {
        cache_results: true,
        cache_dir: cache_dir.clone(),
        engine_handle: Some(Arc::clone(&engine) as Arc<dyn TransformEngine>),
        ..Options::default()
    };
    let (_, resource) = resource_in(
        &tmp,
        "test.png",
        &encoded_image(100, 80, ImageFormat::Png),
        "format=webp&width=50",
    );

    let fresh = run(&resource, &options).unwrap();
    let replayed = run(&resource, &options).unwrap();

    assert_eq!(engine.calls.load(Ordering::SeqCst), 1);
    assert_eq!(fresh.buffer, replayed.buffer);
    assert_eq!(fresh.patch.new_path, replayed.patch.new_path);
    assert_eq!(fresh.patch.info, replayed.patch.info);
}

#[test]
fn download_cache_skips_the_network() {
    let server = MockServer::start();
    let remote = server.mock(|when, then| {
        when.method(GET).path("/cached.png");
        then.status(200).body(encoded_image(24, 24, ImageFormat::Png));
    });

    let tmp = TempDir::new().unwrap();
    let pointer = serde_json::json!({ "url": server.url("/cached.png") }).to_string();
    let (_, resource) = resource_in(&tmp, "cache.fetch", pointer.as_bytes(), "format=webp");

    let options = Options {
        cache_downloads: true,
        cache_dir: tmp.path().join("cache"),
        ..Options::default()
    };

    let first = run(&resource, &options).unwrap();
    let second = run(&resource, &options).unwrap();

    remote.assert_hits(1);
    assert_eq!(first.buffer, second.buffer);
}

// =========================================================================
// Fatal setup errors
// =========================================================================

#[test]
fn unknown_engine_name_fails_initialization() {
    let options = Options {
        engine: "sharp".into(),
        ..Options::default()
    };
    let err = Runtime::initialize(&options).unwrap_err();
    assert!(err.is_fatal());
}
