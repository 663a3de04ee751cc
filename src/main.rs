use clap::{Parser, Subcommand};
use imgforge::error::LoaderError;
use imgforge::options::{Options, stock_options_toml};
use imgforge::runtime::Runtime;
use imgforge::worker::LoaderWorker;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Extensions picked up by `--source` scans, next to the configured
/// fetch-pointer extension.
const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "gif", "tif", "tiff", "webp"];

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup — trivial, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "imgforge")]
#[command(about = "Optimize, convert and rename image assets for build pipelines")]
#[command(long_about = "\
Optimize, convert and rename image assets for build pipelines

Each resource is a path with an optional query string naming the requested
output: width, height and format. Files with the fetch-pointer extension
(default .fetch) are JSON bodies naming a remote image to download first.

  imgforge process 'photos/test.jpg?format=webp&width=800'
  imgforge process --source content/images --query 'format=webp' --out dist

Run 'imgforge gen-options' to generate a documented imgforge.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Options file (stock defaults apply when it does not exist)
    #[arg(long, default_value = "imgforge.toml", global = true)]
    options: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run resources through the loader pipeline
    Process(ProcessArgs),
    /// Print a stock imgforge.toml with all options documented
    GenOptions,
}

#[derive(clap::Args)]
struct ProcessArgs {
    /// Resources: image paths with an optional ?width=&height=&format= query
    resources: Vec<String>,

    /// Process every image file under this directory as well
    #[arg(long)]
    source: Option<PathBuf>,

    /// Query string applied to every file found under --source
    #[arg(long)]
    query: Option<String>,

    /// Output directory
    #[arg(long, default_value = "dist")]
    out: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Process(args) => {
            let options = load_options(&cli.options)?;
            process(args, options)
        }
        Command::GenOptions => {
            print!("{}", stock_options_toml());
            Ok(())
        }
    }
}

fn load_options(path: &Path) -> Result<Options, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Ok(Options::default());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(Options::from_toml(&text)?)
}

fn process(args: ProcessArgs, options: Options) -> Result<(), Box<dyn std::error::Error>> {
    // Fatal setup errors (unknown engine, broken client) surface here,
    // before any resource is touched.
    let runtime = Runtime::initialize(&options)?;
    init_thread_pool(runtime.worker_threads());

    let mut resources = args.resources;
    if let Some(source) = &args.source {
        resources.extend(scan_source(source, &options, args.query.as_deref())?);
    }
    if resources.is_empty() {
        return Err("nothing to process: pass resources or --source".into());
    }

    std::fs::create_dir_all(&args.out)?;
    println!("==> Processing {} resources", resources.len());

    let outcomes: Vec<(String, Result<String, LoaderError>)> = resources
        .into_par_iter()
        .map(|resource| {
            let outcome = run_one(&resource, &options, &runtime, &args.out);
            (resource, outcome)
        })
        .collect();

    // A fatal error means every remaining resource would have failed the
    // same way; report it as the run's failure.
    if let Some((resource, err)) = outcomes
        .iter()
        .find_map(|(r, o)| o.as_ref().err().filter(|e| e.is_fatal()).map(|e| (r, e)))
    {
        return Err(format!("fatal while processing {resource}: {err}").into());
    }

    let mut failed = 0;
    for (resource, outcome) in &outcomes {
        match outcome {
            Ok(line) => println!("  {line}"),
            Err(err) => {
                failed += 1;
                eprintln!("  error: {resource}: {err}");
            }
        }
    }

    println!(
        "==> {} optimized, {} failed",
        outcomes.len() - failed,
        failed
    );
    if failed > 0 {
        return Err(format!("{failed} resources failed").into());
    }
    Ok(())
}

fn run_one(
    resource: &str,
    options: &Options,
    runtime: &Runtime,
    out: &Path,
) -> Result<String, LoaderError> {
    let path = resource.split(['?', '#']).next().unwrap_or_default();
    let content = std::fs::read(path)?;

    let output = LoaderWorker::new(resource, content, options, runtime).run()?;
    for warning in &output.warnings {
        eprintln!("  warning: {resource}: {warning}");
    }

    let file_name = output
        .patch
        .new_path
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("out"));
    let target = out.join(file_name);
    std::fs::write(&target, &output.buffer)?;

    let info = &output.patch.info;
    let dims = match (info.width, info.height) {
        (Some(w), Some(h)) => format!("{w}x{h} "),
        _ => String::new(),
    };
    Ok(format!(
        "{path} -> {} ({dims}{})",
        target.display(),
        info.source_type
    ))
}

/// Collect image and pointer files under `source`, appending the shared
/// query string to each.
fn scan_source(
    source: &Path,
    options: &Options,
    query: Option<&str>,
) -> Result<Vec<String>, walkdir::Error> {
    let mut resources = Vec::new();
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let ext = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        let wanted = IMAGE_EXTS.iter().any(|e| ext.eq_ignore_ascii_case(e))
            || ext.eq_ignore_ascii_case(&options.fetch_file_ext);
        if !wanted {
            continue;
        }

        let mut resource = entry.path().display().to_string();
        if let Some(query) = query {
            resource.push('?');
            resource.push_str(query);
        }
        resources.push(resource);
    }
    Ok(resources)
}

/// Initialize the rayon pool from the transform-concurrency option.
///
/// Caps only downward — without the option, rayon's core-count default wins.
fn init_thread_pool(threads: Option<usize>) {
    if let Some(threads) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .ok();
    }
}
