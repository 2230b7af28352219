//! Detector model resolution
//!
//! Models are `HuggingFace`-layout folders:
//!
//! ```text
//! config.json
//! preprocessor_config.json
//! vocab.json
//! merges.txt
//! onnx/model.onnx          (fp32)
//! onnx/model_fp16.onnx     (fp16, optional)
//! onnx/model_<variant>.onnx
//! ```
//!
//! A [`ModelSpec`] names either a cached download or an external folder;
//! [`ModelManager`] resolves it into concrete file paths and preprocessing
//! parameters.

use crate::cache::ModelCache;
use crate::config::ExecutionProvider;
use crate::error::{Result, SearchError};
use std::fs;
use std::path::{Path, PathBuf};

/// Default maximum prompt length in tokens for OWL-style text encoders
pub const DEFAULT_MAX_TEXT_TOKENS: usize = 16;

/// Model source specification
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ModelSource {
    /// External model from filesystem path
    External(PathBuf),
    /// Downloaded model from cache by model ID; empty means the default model
    Downloaded(String),
}

impl ModelSource {
    /// Get a display name for tracing and logging
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            ModelSource::External(path) => {
                format!(
                    "external:{}",
                    path.file_name().unwrap_or_default().to_string_lossy()
                )
            },
            ModelSource::Downloaded(model_id) if model_id.is_empty() => "cached:default".to_string(),
            ModelSource::Downloaded(model_id) => format!("cached:{model_id}"),
        }
    }
}

/// Complete model specification including source and optional variant
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModelSpec {
    pub source: ModelSource,
    pub variant: Option<String>,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            source: ModelSource::Downloaded(String::new()),
            variant: None,
        }
    }
}

/// Image preprocessing parameters read from `preprocessor_config.json`
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Model input size as `[height, width]`
    pub target_size: [u32; 2],
    /// Per-channel mean in the 0-1 range
    pub normalization_mean: [f32; 3],
    /// Per-channel standard deviation in the 0-1 range
    pub normalization_std: [f32; 3],
    /// Fill value (0-1 range) for padding the frame to a square
    pub pad_value: f32,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            target_size: [960, 960],
            normalization_mean: [0.481_454_66, 0.457_827_5, 0.408_210_73],
            normalization_std: [0.268_629_54, 0.261_302_6, 0.275_777_1],
            pad_value: 0.5,
        }
    }
}

/// Resolved files and parameters of one model variant
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// Display name, `<model_type>-<variant>`
    pub name: String,
    /// Model folder
    pub root: PathBuf,
    /// ONNX graph for the selected variant
    pub model_path: PathBuf,
    /// BPE vocabulary
    pub vocab_path: PathBuf,
    /// BPE merge rules
    pub merges_path: PathBuf,
    /// Selected variant (fp32, fp16, ...)
    pub variant: String,
    /// Image preprocessing
    pub preprocessing: PreprocessingConfig,
    /// Maximum prompt length in tokens
    pub max_text_tokens: usize,
}

/// Resolves a [`ModelSpec`] into model files
#[derive(Debug, Clone)]
pub struct ModelManager {
    files: ModelFiles,
}

impl ModelManager {
    /// Resolve a model specification
    ///
    /// # Errors
    /// - Cached model not found
    /// - Model folder missing required files
    /// - Invalid JSON in model configuration
    /// - Requested variant not available
    pub fn from_spec(spec: &ModelSpec, execution_provider: Option<ExecutionProvider>) -> Result<Self> {
        let root = match &spec.source {
            ModelSource::External(path) => path.clone(),
            ModelSource::Downloaded(model_id) => {
                let cache = ModelCache::new()?;
                let model_id = if model_id.is_empty() {
                    ModelCache::get_default_model_id()
                } else {
                    model_id.clone()
                };
                if !cache.is_model_cached(&model_id) {
                    return Err(SearchError::model(format!(
                        "Model '{model_id}' not found in cache. Download it with --download-model"
                    )));
                }
                cache.get_model_path(&model_id)
            },
        };

        Self::from_folder(&root, spec.variant.clone(), execution_provider)
    }

    /// Resolve a model folder directly
    ///
    /// # Errors
    /// - Path missing or not a directory
    /// - Missing `config.json`, `preprocessor_config.json`, `vocab.json` or `merges.txt`
    /// - No ONNX graph in `onnx/`
    /// - Requested variant not available
    pub fn from_folder(
        root: &Path,
        variant: Option<String>,
        execution_provider: Option<ExecutionProvider>,
    ) -> Result<Self> {
        if !root.is_dir() {
            return Err(SearchError::invalid_config(format!(
                "Model path must be an existing directory: {}",
                root.display()
            )));
        }

        let model_config = read_json(&root.join("config.json"))?;
        let preprocessor_config = read_json(&root.join("preprocessor_config.json"))?;

        let vocab_path = root.join("vocab.json");
        let merges_path = root.join("merges.txt");
        for required in [&vocab_path, &merges_path] {
            if !required.is_file() {
                return Err(SearchError::invalid_config(format!(
                    "Missing tokenizer file: {}",
                    required.display()
                )));
            }
        }

        let available = scan_variants(&root.join("onnx"))?;
        let variant = resolve_variant(&available, variant, execution_provider)?;
        let model_path = variant_file(root, &variant);

        let model_type = model_config
            .get("model_type")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("unknown");

        let max_text_tokens = model_config
            .get("text_config")
            .and_then(|text| text.get("max_position_embeddings"))
            .and_then(serde_json::Value::as_u64)
            .map_or(DEFAULT_MAX_TEXT_TOKENS, |n| n as usize);

        let files = ModelFiles {
            name: format!("{model_type}-{variant}"),
            root: root.to_path_buf(),
            model_path,
            vocab_path,
            merges_path,
            variant,
            preprocessing: parse_preprocessing(&preprocessor_config)?,
            max_text_tokens,
        };

        log::debug!(
            "Resolved model {} at {}",
            files.name,
            files.model_path.display()
        );

        Ok(Self { files })
    }

    /// Resolved model files
    #[must_use]
    pub fn files(&self) -> &ModelFiles {
        &self.files
    }

    /// Read the ONNX graph
    ///
    /// # Errors
    /// - File I/O errors when reading model data
    pub fn load_model(&self) -> Result<Vec<u8>> {
        fs::read(&self.files.model_path)
            .map_err(|e| SearchError::file_io_error("read model file", &self.files.model_path, &e))
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = fs::read_to_string(path).map_err(|e| {
        SearchError::invalid_config(format!("Failed to read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        SearchError::invalid_config(format!("Failed to parse {}: {e}", path.display()))
    })
}

/// Variant name for an ONNX file name in the `onnx/` folder
pub(crate) fn variant_from_file_name(file_name: &str) -> Option<String> {
    match file_name {
        "model.onnx" => Some("fp32".to_string()),
        _ => file_name
            .strip_prefix("model_")
            .and_then(|s| s.strip_suffix(".onnx"))
            .map(ToString::to_string),
    }
}

fn variant_file(root: &Path, variant: &str) -> PathBuf {
    let onnx_dir = root.join("onnx");
    match variant {
        "fp32" => onnx_dir.join("model.onnx"),
        other => onnx_dir.join(format!("model_{other}.onnx")),
    }
}

fn scan_variants(onnx_dir: &Path) -> Result<Vec<String>> {
    let entries = fs::read_dir(onnx_dir).map_err(|e| {
        SearchError::invalid_config(format!(
            "onnx directory not readable in model folder: {} ({e})",
            onnx_dir.display()
        ))
    })?;

    let mut variants: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(variant_from_file_name))
        .collect();
    variants.sort();

    if variants.is_empty() {
        return Err(SearchError::invalid_config(format!(
            "No ONNX model files found in: {}",
            onnx_dir.display()
        )));
    }
    Ok(variants)
}

fn resolve_variant(
    available: &[String],
    requested: Option<String>,
    execution_provider: Option<ExecutionProvider>,
) -> Result<String> {
    if let Some(variant) = requested {
        if available.contains(&variant) {
            return Ok(variant);
        }
        return Err(SearchError::invalid_config(format!(
            "Requested variant '{variant}' not available. Available variants: {available:?}"
        )));
    }

    // Half precision only on CUDA; everything else runs the full-precision graph
    let preference: &[&str] = match execution_provider {
        Some(ExecutionProvider::Cuda) => &["fp16", "fp32"],
        _ => &["fp32", "fp16"],
    };

    for candidate in preference {
        if available.iter().any(|v| v == candidate) {
            return Ok((*candidate).to_string());
        }
    }

    available
        .first()
        .cloned()
        .ok_or_else(|| SearchError::invalid_config("No model variants available"))
}

fn parse_preprocessing(preprocessor: &serde_json::Value) -> Result<PreprocessingConfig> {
    let defaults = PreprocessingConfig::default();

    let target_size = match preprocessor.get("size") {
        Some(size) => {
            let height = size.get("height").and_then(serde_json::Value::as_u64);
            let width = size.get("width").and_then(serde_json::Value::as_u64);
            match (height, width) {
                (Some(h), Some(w)) => [to_u32(h, "height")?, to_u32(w, "width")?],
                _ => {
                    return Err(SearchError::invalid_config(
                        "preprocessor size must have height and width",
                    ))
                },
            }
        },
        None => defaults.target_size,
    };

    Ok(PreprocessingConfig {
        target_size,
        normalization_mean: parse_channel_triplet(preprocessor, "image_mean")?
            .unwrap_or(defaults.normalization_mean),
        normalization_std: parse_channel_triplet(preprocessor, "image_std")?
            .unwrap_or(defaults.normalization_std),
        pad_value: defaults.pad_value,
    })
}

fn to_u32(value: u64, field: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| SearchError::invalid_config(format!("{field} too large for u32")))
}

/// Parse a 3-value channel array, converting 0-255 values to the 0-1 range
fn parse_channel_triplet(preprocessor: &serde_json::Value, key: &str) -> Result<Option<[f32; 3]>> {
    let Some(values) = preprocessor.get(key) else {
        return Ok(None);
    };

    let values: Vec<f64> = values
        .as_array()
        .map(|arr| arr.iter().filter_map(serde_json::Value::as_f64).collect())
        .unwrap_or_default();

    let [a, b, c] = values.as_slice() else {
        return Err(SearchError::invalid_config(format!(
            "{key} must have exactly 3 numeric values"
        )));
    };

    let scale = if values.iter().any(|v| *v > 1.0) { 255.0 } else { 1.0 };
    Ok(Some([
        (a / scale) as f32,
        (b / scale) as f32,
        (c / scale) as f32,
    ]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Write a minimal model folder with the given ONNX files
    pub(crate) fn write_model_folder(root: &Path, onnx_files: &[&str]) {
        fs::create_dir_all(root.join("onnx")).unwrap();
        fs::write(
            root.join("config.json"),
            r#"{"model_type": "owlv2", "text_config": {"max_position_embeddings": 16}}"#,
        )
        .unwrap();
        fs::write(
            root.join("preprocessor_config.json"),
            r#"{"size": {"height": 960, "width": 960},
                "image_mean": [0.48145466, 0.4578275, 0.40821073],
                "image_std": [0.26862954, 0.26130258, 0.27577711]}"#,
        )
        .unwrap();
        fs::write(root.join("vocab.json"), "{}").unwrap();
        fs::write(root.join("merges.txt"), "#version: 0.2\n").unwrap();
        for file in onnx_files {
            fs::write(root.join("onnx").join(file), b"onnx").unwrap();
        }
    }

    #[test]
    fn test_from_folder_resolves_files() {
        let dir = tempfile::tempdir().unwrap();
        write_model_folder(dir.path(), &["model.onnx", "model_fp16.onnx"]);

        let manager = ModelManager::from_folder(dir.path(), None, None).unwrap();
        let files = manager.files();
        assert_eq!(files.variant, "fp32");
        assert_eq!(files.name, "owlv2-fp32");
        assert!(files.model_path.ends_with("onnx/model.onnx"));
        assert_eq!(files.preprocessing.target_size, [960, 960]);
        assert_eq!(files.max_text_tokens, 16);
        assert_eq!(manager.load_model().unwrap(), b"onnx");
    }

    #[test]
    fn test_variant_selection() {
        let dir = tempfile::tempdir().unwrap();
        write_model_folder(dir.path(), &["model.onnx", "model_fp16.onnx", "model_quantized.onnx"]);

        let cuda = ModelManager::from_folder(dir.path(), None, Some(ExecutionProvider::Cuda)).unwrap();
        assert_eq!(cuda.files().variant, "fp16");

        let quantized =
            ModelManager::from_folder(dir.path(), Some("quantized".to_string()), None).unwrap();
        assert!(quantized.files().model_path.ends_with("onnx/model_quantized.onnx"));

        assert!(ModelManager::from_folder(dir.path(), Some("int4".to_string()), None).is_err());
    }

    #[test]
    fn test_missing_tokenizer_files_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_model_folder(dir.path(), &["model.onnx"]);
        fs::remove_file(dir.path().join("merges.txt")).unwrap();
        assert!(matches!(
            ModelManager::from_folder(dir.path(), None, None),
            Err(SearchError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_channel_values_in_255_range_are_scaled() {
        let preprocessor = serde_json::json!({
            "image_mean": [127.5, 127.5, 127.5],
            "image_std": [255.0, 255.0, 255.0]
        });
        let config = parse_preprocessing(&preprocessor).unwrap();
        assert!((config.normalization_mean[0] - 0.5).abs() < 1e-6);
        assert!((config.normalization_std[2] - 1.0).abs() < 1e-6);
        assert_eq!(config.target_size, [960, 960]);
    }

    #[test]
    fn test_variant_from_file_name() {
        assert_eq!(variant_from_file_name("model.onnx").as_deref(), Some("fp32"));
        assert_eq!(variant_from_file_name("model_fp16.onnx").as_deref(), Some("fp16"));
        assert_eq!(variant_from_file_name("weights.bin"), None);
    }

    #[test]
    fn test_display_name() {
        assert_eq!(ModelSource::Downloaded(String::new()).display_name(), "cached:default");
        assert_eq!(
            ModelSource::External(PathBuf::from("/models/owlv2")).display_name(),
            "external:owlv2"
        );
    }
}
