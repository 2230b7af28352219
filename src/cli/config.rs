//! Conversion of CLI arguments into library configuration

use crate::cache::ModelCache;
use crate::cli::main_impl::{Cli, CliArtifactFormat, CliKeyframePolicy};
use crate::config::{
    ArtifactFormat, DetectorConfig, ExecutionProvider, KeyframePolicy, SearchConfig,
    DEFAULT_HISTOGRAM_THRESHOLD, DEFAULT_INTERVAL_SECONDS,
};
use crate::download::is_remote_location;
use crate::models::{ModelSource, ModelSpec};
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Builds library configuration from CLI arguments
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Search configuration: `--config` file (or defaults) with flags applied on top
    pub(crate) fn search_config(cli: &Cli) -> Result<SearchConfig> {
        let mut config = match &cli.config {
            Some(path) => SearchConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => SearchConfig::default(),
        };

        config.keyframe_policy = Self::keyframe_policy(cli, config.keyframe_policy);
        if let Some(threshold) = cli.threshold {
            config.detection_threshold = threshold;
        }
        if let Some(max) = cli.max_candidates {
            config.max_candidates = Some(max);
        }
        if let Some(dir) = &cli.artifacts_dir {
            config.artifacts.enabled = true;
            config.artifacts.output_dir.clone_from(dir);
        }
        if let Some(format) = cli.artifact_format {
            config.artifacts.format = match format {
                CliArtifactFormat::Jpeg => ArtifactFormat::Jpeg,
                CliArtifactFormat::Png => ArtifactFormat::Png,
            };
        }

        config.validate().context("Invalid search configuration")?;
        Ok(config)
    }

    /// Resolve the policy; parameters given without `--policy` adjust the base policy
    fn keyframe_policy(cli: &Cli, base: KeyframePolicy) -> KeyframePolicy {
        let interval = |fallback: f64| KeyframePolicy::interval(cli.interval_seconds.unwrap_or(fallback));
        let histogram = |fallback: f64| KeyframePolicy::histogram_change(cli.histogram_threshold.unwrap_or(fallback));

        match (cli.policy, base) {
            (Some(CliKeyframePolicy::Interval), KeyframePolicy::Interval { interval_seconds })
            | (None, KeyframePolicy::Interval { interval_seconds }) => interval(interval_seconds),
            (Some(CliKeyframePolicy::Interval), KeyframePolicy::HistogramChange { .. }) => {
                interval(DEFAULT_INTERVAL_SECONDS)
            },
            (Some(CliKeyframePolicy::Histogram), KeyframePolicy::HistogramChange { threshold })
            | (None, KeyframePolicy::HistogramChange { threshold }) => histogram(threshold),
            (Some(CliKeyframePolicy::Histogram), KeyframePolicy::Interval { .. }) => {
                histogram(DEFAULT_HISTOGRAM_THRESHOLD)
            },
        }
    }

    /// Detector configuration from `--model`, `--variant`, `--execution-provider` and `--threads`
    pub(crate) fn detector_config(cli: &Cli) -> Result<DetectorConfig> {
        let provider = parse_execution_provider(&cli.execution_provider)?;
        let mut model_spec = cli
            .model
            .as_deref()
            .map_or_else(ModelSpec::default, parse_model_spec);
        if cli.variant.is_some() {
            model_spec.variant.clone_from(&cli.variant);
        }

        Ok(DetectorConfig::new(model_spec)
            .with_execution_provider(provider)
            .with_threads(cli.threads))
    }
}

/// Parse `auto|cpu|cuda|coreml`, optionally prefixed with `onnx:`
pub(crate) fn parse_execution_provider(value: &str) -> Result<ExecutionProvider> {
    let name = value.strip_prefix("onnx:").unwrap_or(value);
    match name.to_ascii_lowercase().as_str() {
        "" | "onnx" | "auto" => Ok(ExecutionProvider::Auto),
        "cpu" => Ok(ExecutionProvider::Cpu),
        "cuda" => Ok(ExecutionProvider::Cuda),
        "coreml" => Ok(ExecutionProvider::CoreMl),
        other => anyhow::bail!("Unknown execution provider '{other}' (expected auto, cpu, cuda or coreml)"),
    }
}

/// Interpret `--model` as a URL, an existing folder or a cached model id
pub(crate) fn parse_model_spec(value: &str) -> ModelSpec {
    let source = if is_remote_location(value) {
        ModelSource::Downloaded(ModelCache::url_to_model_id(value))
    } else {
        let path = PathBuf::from(value);
        if path.is_dir() {
            ModelSource::External(path)
        } else {
            ModelSource::Downloaded(value.to_string())
        }
    };
    ModelSpec {
        source,
        variant: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["evidence-vsearch", "video.mp4", "--query", "red car"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = CliConfigBuilder::search_config(&cli(&[])).unwrap();
        assert_eq!(config, SearchConfig::default());
        assert!(!config.artifacts.enabled);
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = CliConfigBuilder::search_config(&cli(&[
            "--policy",
            "histogram",
            "--histogram-threshold",
            "0.4",
            "--threshold",
            "0.3",
            "--artifacts-dir",
            "out",
            "--artifact-format",
            "png",
            "--max-candidates",
            "12",
        ]))
        .unwrap();

        assert_eq!(config.keyframe_policy, KeyframePolicy::histogram_change(0.4));
        assert!((config.detection_threshold - 0.3).abs() < f32::EPSILON);
        assert!(config.artifacts.enabled);
        assert_eq!(config.artifacts.output_dir, PathBuf::from("out"));
        assert_eq!(config.artifacts.format, ArtifactFormat::Png);
        assert_eq!(config.max_candidates, Some(12));
    }

    #[test]
    fn test_interval_seconds_without_policy() {
        let config = CliConfigBuilder::search_config(&cli(&["--interval-seconds", "5"])).unwrap();
        assert_eq!(config.keyframe_policy, KeyframePolicy::interval(5.0));
    }

    #[test]
    fn test_config_file_is_base() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("search.json");
        std::fs::write(
            &path,
            r#"{"keyframe_policy": {"type": "histogram_change", "threshold": 0.8}, "detection_threshold": 0.25}"#,
        )
        .unwrap();

        let config = CliConfigBuilder::search_config(&cli(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(config.keyframe_policy, KeyframePolicy::histogram_change(0.8));
        assert!((config.detection_threshold - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(CliConfigBuilder::search_config(&cli(&["--interval-seconds", "0"])).is_err());
        assert!(CliConfigBuilder::search_config(&cli(&["--threshold", "1.5"])).is_err());
    }

    #[test]
    fn test_execution_provider_parsing() {
        assert_eq!(parse_execution_provider("auto").unwrap(), ExecutionProvider::Auto);
        assert_eq!(parse_execution_provider("onnx:cuda").unwrap(), ExecutionProvider::Cuda);
        assert_eq!(parse_execution_provider("CoreML").unwrap(), ExecutionProvider::CoreMl);
        assert!(parse_execution_provider("tract:cpu").is_err());
    }

    #[test]
    fn test_model_spec_parsing() {
        let spec = parse_model_spec("https://huggingface.co/google/owlv2-base-patch16");
        assert_eq!(
            spec.source,
            ModelSource::Downloaded("google--owlv2-base-patch16".to_string())
        );

        let dir = tempfile::tempdir().unwrap();
        let spec = parse_model_spec(dir.path().to_str().unwrap());
        assert_eq!(spec.source, ModelSource::External(dir.path().to_path_buf()));

        let spec = parse_model_spec("my-model");
        assert_eq!(spec.source, ModelSource::Downloaded("my-model".to_string()));
    }

    #[test]
    fn test_detector_config() {
        let config = CliConfigBuilder::detector_config(&cli(&[
            "--model",
            "my-model",
            "--variant",
            "fp16",
            "--execution-provider",
            "cpu",
            "--threads",
            "4",
        ]))
        .unwrap();
        assert_eq!(config.model_spec.variant.as_deref(), Some("fp16"));
        assert_eq!(config.execution_provider, ExecutionProvider::Cpu);
        assert_eq!((config.intra_threads, config.inter_threads), (4, 2));
    }
}
