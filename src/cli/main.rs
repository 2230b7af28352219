//! Visual search CLI
//!
//! Searches one video (local path or http(s) URL) for a text query and prints
//! the JSON response.

use super::config::CliConfigBuilder;
use crate::{
    api::VisualSearchService,
    cache::{format_size, ModelCache, CACHE_DIR_ENV, DEFAULT_MODEL_URL},
    config::{DetectorConfig, SearchConfig},
    detector::Detector,
    download::{validate_model_url, ModelDownloader},
    models::ModelSource,
    orchestrator::SearchOrchestrator,
    services::create_cli_progress_reporter,
    tracing_config::init_cli_tracing,
    types::{SearchRequest, SearchResponse},
    video::VideoSource,
};
use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

/// Visual object search over video
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "evidence-vsearch")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Video file path or http(s) URL
    #[arg(value_name = "VIDEO", required_unless_present_any = &["show_providers", "download_model", "list_models", "clear_cache", "show_cache_dir"])]
    pub input: Option<String>,

    /// Free-text description of the object to find
    #[arg(short, long, required_unless_present_any = &["show_providers", "download_model", "list_models", "clear_cache", "show_cache_dir"])]
    pub query: Option<String>,

    /// Keyframe sampling policy [default: interval]
    #[arg(long, value_enum)]
    pub policy: Option<CliKeyframePolicy>,

    /// Sampling window for the interval policy in seconds [default: 60]
    #[arg(long, value_name = "SECONDS")]
    pub interval_seconds: Option<f64>,

    /// Correlation below which the histogram policy selects a frame [default: 0.6]
    #[arg(long, value_name = "CORRELATION")]
    pub histogram_threshold: Option<f64>,

    /// Minimum detection confidence [default: 0.15]
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Write annotated frames with detections to this directory
    #[arg(long, value_name = "DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Image format for annotated frames [default: jpeg]
    #[arg(long, value_enum)]
    pub artifact_format: Option<CliArtifactFormat>,

    /// Stop after this many candidate frames
    #[arg(long)]
    pub max_candidates: Option<u64>,

    /// Cancel the search after this many seconds and report partial results
    #[arg(long, value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// JSON search configuration file; flags override its values
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the JSON response to this file ("-" for stdout)
    #[arg(short, long, value_name = "OUTPUT")]
    pub output: Option<String>,

    /// Model id, URL or path to model folder [default: cached default model]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Model variant (fp32, fp16, quantized)
    #[arg(long)]
    pub variant: Option<String>,

    /// Execution provider (auto, cpu, cuda, coreml)
    #[arg(short, long, default_value = "auto")]
    pub execution_provider: String,

    /// Number of inference threads (0 = auto)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Show a progress bar while searching
    #[arg(long)]
    pub progress: bool,

    /// Show execution provider diagnostics and exit
    #[arg(long)]
    pub show_providers: bool,

    /// Download a model and exit [default: https://huggingface.co/Xenova/owlv2-base-patch16-ensemble]
    #[arg(long, value_name = "URL", num_args = 0..=1, default_missing_value = DEFAULT_MODEL_URL)]
    pub download_model: Option<String>,

    /// List cached models and exit
    #[arg(long)]
    pub list_models: bool,

    /// Clear cached models (combine with --model to clear one model)
    #[arg(long)]
    pub clear_cache: bool,

    /// Show the model cache directory and exit
    #[arg(long)]
    pub show_cache_dir: bool,

    /// Use a custom cache directory
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliKeyframePolicy {
    /// First frame of every interval
    Interval,
    /// Frames whose histogram differs from the last keyframe
    Histogram,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliArtifactFormat {
    Jpeg,
    Png,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing = init_cli_tracing(cli.verbose).context("Failed to initialize tracing")?;

    if let Some(dir) = &cli.cache_dir {
        std::env::set_var(CACHE_DIR_ENV, dir);
    }

    if cli.show_providers {
        show_provider_diagnostics();
        return Ok(());
    }
    if cli.list_models {
        return list_cached_models();
    }
    if let Some(url) = &cli.download_model {
        return download_model(url).await;
    }
    if cli.clear_cache {
        return clear_cache_models(&cli);
    }
    if cli.show_cache_dir {
        return show_current_cache_dir();
    }

    let (Some(input), Some(query)) = (cli.input.clone(), cli.query.clone()) else {
        anyhow::bail!("A video and --query are required");
    };

    let search_config = CliConfigBuilder::search_config(&cli)?;
    let detector_config = CliConfigBuilder::detector_config(&cli)?;
    info!("Searching {} for '{}'", input, query);
    info!(
        "Policy: {}, threshold: {}, provider: {}",
        search_config.keyframe_policy, search_config.detection_threshold, detector_config.execution_provider
    );

    ensure_model_available(&detector_config).await?;
    let detector = create_detector(&detector_config)?;
    let source = create_video_source(&search_config)?;

    let orchestrator = SearchOrchestrator::new(search_config, source, detector)
        .context("Failed to create search orchestrator")?
        .with_progress_reporter(create_cli_progress_reporter(cli.progress, cli.verbose > 0));
    let mut service = VisualSearchService::new(orchestrator).context("Failed to create search service")?;
    if let Some(seconds) = cli.timeout_seconds {
        service = service.with_deadline(Duration::from_secs(seconds));
    }

    let response = service
        .search(SearchRequest::new(query, input))
        .await
        .context("Search failed")?;

    for warning in &response.warnings {
        warn!("{:?}: {}", warning.kind, warning.message);
    }
    info!(
        "Found {} detections in {} keyframes ({:.2}s)",
        response.detections.len(),
        response.total_frames_processed,
        response.processing_time
    );
    write_response(&response, cli.output.as_deref())?;

    if service.shutdown().is_err() {
        warn!("Search service still in use at exit");
    }
    Ok(())
}

#[cfg(feature = "onnx")]
fn create_detector(config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    let detector = crate::detector::ZeroShotDetector::from_config(config).context("Failed to load detector")?;
    Ok(Box::new(detector))
}

#[cfg(not(feature = "onnx"))]
fn create_detector(_config: &DetectorConfig) -> Result<Box<dyn Detector>> {
    anyhow::bail!("No detector available. Rebuild with --features onnx")
}

#[cfg(feature = "video-support")]
fn create_video_source(config: &SearchConfig) -> Result<Box<dyn VideoSource>> {
    Ok(Box::new(crate::video::FfmpegVideoSource::new().with_fallback_fps(config.fallback_fps)))
}

#[cfg(not(feature = "video-support"))]
fn create_video_source(_config: &SearchConfig) -> Result<Box<dyn VideoSource>> {
    anyhow::bail!("No video decoder available. Rebuild with --features video-support")
}

/// Download the default model on first use; other models must be downloaded explicitly
async fn ensure_model_available(config: &DetectorConfig) -> Result<()> {
    let ModelSource::Downloaded(model_id) = &config.model_spec.source else {
        return Ok(());
    };

    let default_id = ModelCache::get_default_model_id();
    let model_id = if model_id.is_empty() { &default_id } else { model_id };
    let cache = ModelCache::new().context("Failed to create model cache")?;
    if cache.is_model_cached(model_id) {
        return Ok(());
    }

    if *model_id != default_id {
        anyhow::bail!(
            "Model '{}' not found in cache. Use --download-model URL to download it first, or --list-models to see available models.",
            model_id
        );
    }

    eprintln!("📦 Model not cached. Downloading default model...");
    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    downloader
        .download_model(DEFAULT_MODEL_URL, true)
        .await
        .context("Failed to download default model")?;
    Ok(())
}

fn write_response(response: &SearchResponse, output: Option<&str>) -> Result<()> {
    let json = serde_json::to_string_pretty(response).context("Failed to serialize response")?;
    match output {
        None | Some("-") => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}").context("Failed to write response to stdout")?;
        },
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write response to {path}"))?;
            info!("Response written to {}", path);
        },
    }
    Ok(())
}

/// Display execution provider diagnostics
fn show_provider_diagnostics() {
    println!("🔍 Execution Provider Diagnostics");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let cpu_count = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    println!("💻 System: {cpu_count} CPU cores detected");

    #[cfg(feature = "onnx")]
    {
        println!("\n🚀 Execution Providers:");
        for (name, available, description) in crate::backends::OnnxBackend::list_providers() {
            let status = if available { "✅ Available" } else { "❌ Not Available" };
            println!("  • {name}: {status} - {description}");
        }
    }
    #[cfg(not(feature = "onnx"))]
    println!("\n⚠️  Built without the onnx feature; no detector available");

    #[cfg(feature = "video-support")]
    println!("\n🎞️  Video decoding: FFmpeg");
    #[cfg(not(feature = "video-support"))]
    println!("\n⚠️  Built without the video-support feature; no video decoder available");

    println!("\n💡 Usage Examples:");
    println!("  --execution-provider auto    # Best available provider (default)");
    println!("  --execution-provider cuda    # NVIDIA CUDA");
    println!("  --execution-provider coreml  # Apple CoreML (macOS)");
    println!("  --execution-provider cpu     # Force CPU execution");
}

/// List cached models
fn list_cached_models() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    let models = cache
        .scan_cached_models()
        .context("Failed to list cached models")?;

    println!("📦 Cached Models");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if models.is_empty() {
        println!("No cached models found.");
        println!("\n💡 To download the default model, use:");
        println!("  evidence-vsearch --download-model");
        return Ok(());
    }

    let default_id = ModelCache::get_default_model_id();
    for model in models {
        let marker = if model.model_id == default_id { " (default)" } else { "" };
        println!("📁 Model ID: {}{}", model.model_id, marker);
        println!("  └─ Cache location: {}", model.path.display());
        if !model.variants.is_empty() {
            println!("  └─ Variants: {}", model.variants.join(", "));
        }
        if model.size_bytes > 0 {
            println!("  └─ Size: {}", format_size(model.size_bytes));
        }
        println!();
    }

    println!("💡 To use a cached model:");
    println!("  evidence-vsearch --model MODEL_ID video.mp4 --query \"red car\"");
    Ok(())
}

/// Download a model and exit
async fn download_model(url: &str) -> Result<()> {
    validate_model_url(url).context("Invalid model URL")?;

    let downloader = ModelDownloader::new().context("Failed to create model downloader")?;
    let model_id = downloader
        .download_model(url, true)
        .await
        .context("Failed to download model")?;

    println!("✅ Model downloaded: {model_id}");
    println!("  └─ Location: {}", downloader.cache().get_model_path(&model_id).display());
    Ok(())
}

/// Clear all cached models, or only the one named by --model
fn clear_cache_models(cli: &Cli) -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;

    let targets: Vec<String> = match &cli.model {
        Some(model) => match super::config::parse_model_spec(model).source {
            ModelSource::Downloaded(model_id) => vec![model_id],
            ModelSource::External(path) => {
                anyhow::bail!("{} is not a cached model", path.display())
            },
        },
        None => cache
            .scan_cached_models()
            .context("Failed to list cached models")?
            .into_iter()
            .map(|model| model.model_id)
            .collect(),
    };

    if targets.is_empty() {
        println!("No cached models to clear.");
        return Ok(());
    }

    for model_id in targets {
        if cache
            .clear_specific_model(&model_id)
            .with_context(|| format!("Failed to clear model '{model_id}'"))?
        {
            println!("🗑️  Removed {model_id}");
        } else {
            println!("⚠️  Model '{model_id}' not found in cache");
        }
    }
    Ok(())
}

fn show_current_cache_dir() -> Result<()> {
    let cache = ModelCache::new().context("Failed to initialize model cache")?;
    println!("📂 Model cache directory: {}", cache.cache_dir().display());
    if std::env::var_os(CACHE_DIR_ENV).is_some() {
        println!("  └─ Set by {CACHE_DIR_ENV}");
    }
    Ok(())
}
