//! Detector model cache
//!
//! Downloaded models live in an XDG-compliant cache directory, one folder
//! per model id:
//! - Linux/macOS: `~/.cache/evidence-vsearch/models/`
//! - Windows: `%LOCALAPPDATA%/evidence-vsearch/models/`
//!
//! `EVIDENCE_VSEARCH_CACHE_DIR` overrides the base directory.

use crate::error::{Result, SearchError};
use crate::models::variant_from_file_name;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable overriding the cache base directory
pub const CACHE_DIR_ENV: &str = "EVIDENCE_VSEARCH_CACHE_DIR";

/// Default zero-shot detector repository
pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/Xenova/owlv2-base-patch16-ensemble";

/// Information about a cached model
#[derive(Debug, Clone)]
pub struct CachedModelInfo {
    /// Model identifier (derived from URL)
    pub model_id: String,
    /// Path to the cached model directory
    pub path: PathBuf,
    /// Available ONNX model variants
    pub variants: Vec<String>,
    /// Total size of the model directory in bytes
    pub size_bytes: u64,
}

/// Model cache manager
#[derive(Debug, Clone)]
pub struct ModelCache {
    cache_dir: PathBuf,
}

impl ModelCache {
    /// Open the cache, creating its directory if needed
    ///
    /// # Errors
    /// - Failed to determine cache directory
    /// - Failed to create cache directory
    pub fn new() -> Result<Self> {
        let cache_dir = Self::get_cache_dir()?;
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    /// Open a cache rooted at `base_dir/models`
    ///
    /// # Errors
    /// - Failed to create cache directory
    pub fn with_custom_cache_dir(base_dir: &Path) -> Result<Self> {
        let cache_dir = base_dir.join("models");
        Self::ensure_dir(&cache_dir)?;
        Ok(Self { cache_dir })
    }

    fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .map_err(|e| SearchError::file_io_error("create cache directory", dir, &e))?;
        }
        Ok(())
    }

    /// Cache directory path, honouring the environment override
    ///
    /// # Errors
    /// - No user cache directory on this platform and no override set
    pub fn get_cache_dir() -> Result<PathBuf> {
        if let Ok(cache_override) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(cache_override).join("models"));
        }

        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                SearchError::invalid_config(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV} environment variable."
                ))
            })?
            .join("evidence-vsearch")
            .join("models"))
    }

    /// Generate a cache-safe model ID from a URL
    ///
    /// `HuggingFace` repositories map `owner/name` to `owner--name`; other
    /// URLs get a short SHA-256 based id.
    ///
    /// # Examples
    /// ```
    /// use evidence_vsearch::cache::ModelCache;
    ///
    /// let id = ModelCache::url_to_model_id("https://huggingface.co/google/owlv2-base-patch16");
    /// assert_eq!(id, "google--owlv2-base-patch16");
    /// ```
    #[must_use]
    pub fn url_to_model_id(url: &str) -> String {
        let prefix = "https://huggingface.co/";
        if let Some(repo) = url.strip_prefix(prefix) {
            repo.trim_end_matches('/').replace('/', "--")
        } else {
            use sha2::{Digest, Sha256};
            let digest = format!("{:x}", Sha256::digest(url.as_bytes()));
            format!("url-{}", digest.get(..12).unwrap_or(&digest))
        }
    }

    /// Whether a complete model folder exists for `model_id`
    #[must_use]
    pub fn is_model_cached(&self, model_id: &str) -> bool {
        Self::validate_model_directory(&self.cache_dir.join(model_id))
    }

    /// Path of the folder for `model_id` (may not exist)
    #[must_use]
    pub fn get_model_path(&self, model_id: &str) -> PathBuf {
        self.cache_dir.join(model_id)
    }

    /// Cache directory in use
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// List complete cached models, sorted by id
    ///
    /// # Errors
    /// - Failed to read cache directory
    pub fn scan_cached_models(&self) -> Result<Vec<CachedModelInfo>> {
        if !self.cache_dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.cache_dir)
            .map_err(|e| SearchError::file_io_error("read cache directory", &self.cache_dir, &e))?;

        let mut models: Vec<CachedModelInfo> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| Self::analyze_model_directory(&path))
            .collect();

        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        Ok(models)
    }

    /// Remove a cached model; returns whether it existed
    ///
    /// # Errors
    /// - Failed to remove model directory
    pub fn clear_specific_model(&self, model_id: &str) -> Result<bool> {
        let model_path = self.get_model_path(model_id);
        if !model_path.exists() {
            return Ok(false);
        }

        log::info!("Removing cached model: {}", model_id);
        fs::remove_dir_all(&model_path)
            .map_err(|e| SearchError::file_io_error("remove cached model", &model_path, &e))?;
        Ok(true)
    }

    /// Default model ID
    #[must_use]
    pub fn get_default_model_id() -> String {
        Self::url_to_model_id(DEFAULT_MODEL_URL)
    }

    fn validate_model_directory(model_path: &Path) -> bool {
        ["config.json", "preprocessor_config.json", "vocab.json", "merges.txt"]
            .iter()
            .all(|file| model_path.join(file).is_file())
            && model_path.join("onnx").is_dir()
    }

    fn analyze_model_directory(model_path: &Path) -> Option<CachedModelInfo> {
        if !Self::validate_model_directory(model_path) {
            log::debug!("Skipping incomplete model directory: {}", model_path.display());
            return None;
        }

        let model_id = model_path.file_name()?.to_str()?.to_string();

        let mut variants: Vec<String> = fs::read_dir(model_path.join("onnx"))
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.file_name().to_str().and_then(variant_from_file_name))
                    .collect()
            })
            .unwrap_or_default();
        variants.sort();

        Some(CachedModelInfo {
            model_id,
            path: model_path.to_path_buf(),
            variants,
            size_bytes: directory_size(model_path),
        })
    }
}

fn directory_size(dir: &Path) -> u64 {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| {
                    let path = entry.path();
                    if path.is_dir() {
                        directory_size(&path)
                    } else {
                        entry.metadata().map(|m| m.len()).unwrap_or(0)
                    }
                })
                .sum()
        })
        .unwrap_or(0)
}

/// Format file size in human-readable format
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{bytes} B")
    } else {
        format!("{:.1} {}", size, UNITS.get(unit_index).unwrap_or(&"B"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::write_model_folder;
    use tempfile::TempDir;

    #[test]
    fn test_url_to_model_id() {
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/Xenova/owlv2-base-patch16-ensemble"),
            "Xenova--owlv2-base-patch16-ensemble"
        );
        assert_eq!(
            ModelCache::url_to_model_id("https://huggingface.co/google/owlv2-base-patch16/"),
            "google--owlv2-base-patch16"
        );

        let id = ModelCache::url_to_model_id("https://example.com/model.onnx");
        assert!(id.starts_with("url-"));
        assert_eq!(id.len(), 16);
    }

    #[test]
    fn test_default_model_id() {
        assert_eq!(
            ModelCache::get_default_model_id(),
            "Xenova--owlv2-base-patch16-ensemble"
        );
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(1024 * 1024), "1.0 MB");
    }

    #[test]
    fn test_custom_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        assert_eq!(cache.cache_dir(), temp_dir.path().join("models"));
        assert!(cache.cache_dir().exists());
    }

    #[test]
    fn test_scan_skips_incomplete_models() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();

        write_model_folder(&cache.get_model_path("b--complete"), &["model.onnx", "model_fp16.onnx"]);
        fs::create_dir_all(cache.get_model_path("a--partial")).unwrap();

        let models = cache.scan_cached_models().unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "b--complete");
        assert_eq!(models[0].variants, vec!["fp16".to_string(), "fp32".to_string()]);
        assert!(models[0].size_bytes > 0);

        assert!(cache.is_model_cached("b--complete"));
        assert!(!cache.is_model_cached("a--partial"));
    }

    #[test]
    fn test_clear_specific_model() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ModelCache::with_custom_cache_dir(temp_dir.path()).unwrap();
        let path = cache.get_model_path("test-model");
        fs::create_dir_all(&path).unwrap();

        assert!(cache.clear_specific_model("test-model").unwrap());
        assert!(!path.exists());
        assert!(!cache.clear_specific_model("test-model").unwrap());
    }
}
