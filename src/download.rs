//! Downloads over HTTP
//!
//! Two users share one streaming path:
//! - [`ModelDownloader`] fetches detector model folders from `HuggingFace`
//!   into the [`ModelCache`], staging them in a temp directory first
//! - [`HttpVideoFetcher`] resolves remote video references into temporary
//!   local files that are removed when the [`FetchedVideo`] is dropped

use crate::cache::ModelCache;
use crate::error::{Result, SearchError};
use crate::video::VideoFormat;
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::StreamReader;
use tracing::Instrument;

/// Configuration files every model folder needs
const REQUIRED_FILES: &[&str] = &[
    "config.json",
    "preprocessor_config.json",
    "vocab.json",
    "merges.txt",
];

/// ONNX model files to attempt downloading
const ONNX_FILES: &[(&str, &str)] = &[
    ("onnx/model.onnx", "fp32"),
    ("onnx/model_fp16.onnx", "fp16"),
];

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Create an indicator, a real bar when the CLI feature is enabled
    #[must_use]
    pub fn new(show: bool) -> Self {
        #[cfg(feature = "cli")]
        {
            if show {
                let pb = ProgressBar::new(0);
                if let Ok(style) = ProgressStyle::default_bar().template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                ) {
                    pb.set_style(style.progress_chars("#>-"));
                }
                return Self::Indicatif(pb);
            }
        }
        let _ = show;
        Self::NoOp
    }

    pub fn set_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_message(msg),
            Self::NoOp => {},
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_with_message(&self, msg: String) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_with_message(msg),
            Self::NoOp => {},
        }
    }
}

/// Result of streaming one response body
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamedBody {
    bytes: u64,
    sha256: String,
}

/// Copy `reader` into `writer`, hashing as it goes
async fn copy_hashed<R, W>(
    reader: &mut R,
    writer: &mut W,
    total: Option<u64>,
    progress: &ProgressIndicator,
) -> std::io::Result<StreamedBody>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(total) = total {
        progress.set_length(total);
    }

    let mut hasher = Sha256::new();
    let mut downloaded = 0u64;
    let mut buffer = vec![0; 64 * 1024];

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        let chunk = buffer.get(..bytes_read).unwrap_or(&[]);
        hasher.update(chunk);
        writer.write_all(chunk).await?;
        downloaded += bytes_read as u64;
        progress.set_position(downloaded);
    }
    writer.flush().await?;

    Ok(StreamedBody {
        bytes: downloaded,
        sha256: format!("{:x}", hasher.finalize()),
    })
}

/// GET `url` and stream the body into `writer`
async fn download_to<W: AsyncWrite + Unpin>(
    client: &Client,
    url: &str,
    writer: &mut W,
    progress: &ProgressIndicator,
) -> Result<StreamedBody> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| SearchError::network_error(format!("Failed to download {url}"), e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(SearchError::network_error(
            format!("Failed to download {url}"),
            format!("HTTP status {status}"),
        ));
    }

    let total = response.content_length();
    let mut reader = StreamReader::new(
        response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );

    copy_hashed(&mut reader, writer, total, progress)
        .await
        .map_err(|e| SearchError::network_error(format!("Failed to read {url}"), e))
}

/// Model downloader with progress reporting
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache: ModelCache,
}

impl ModelDownloader {
    /// Create a downloader writing into the default cache
    ///
    /// # Errors
    /// - Failed to create HTTP client
    /// - Failed to initialize model cache
    pub fn new() -> Result<Self> {
        Self::with_cache(ModelCache::new()?)
    }

    /// Create a downloader writing into `cache`
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_cache(cache: ModelCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| SearchError::network_error("Failed to create HTTP client", e))?;
        Ok(Self { client, cache })
    }

    /// Download a model repository into the cache, returning its model id
    ///
    /// Files are staged in a temporary directory and moved into the cache
    /// only when every required file and at least one ONNX variant arrived.
    ///
    /// # Errors
    /// - Unsupported URL
    /// - Network errors during download
    /// - File system errors while staging or moving the model
    pub async fn download_model(&self, url: &str, show_progress: bool) -> Result<String> {
        validate_model_url(url)?;
        self.download_validated(url, show_progress)
            .instrument(crate::tracing_config::spans::download(url))
            .await
    }

    async fn download_validated(&self, url: &str, show_progress: bool) -> Result<String> {
        let model_id = ModelCache::url_to_model_id(url);
        if self.cache.is_model_cached(&model_id) {
            log::info!("Model already cached: {}", model_id);
            return Ok(model_id);
        }

        log::info!("Downloading model {} from {}", model_id, url);
        let staging = tempfile::Builder::new()
            .prefix("evidence-vsearch-model-")
            .tempdir()
            .map_err(|e| SearchError::file_io_error("create staging directory", std::env::temp_dir(), &e))?;

        let progress = ProgressIndicator::new(show_progress);
        match self.download_model_files(url, staging.path(), &progress).await {
            Ok(()) => {
                let final_dir = self.cache.get_model_path(&model_id);
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        SearchError::file_io_error("remove existing model directory", &final_dir, &e)
                    })?;
                }
                move_dir(staging.path(), &final_dir)?;
                progress.finish_with_message(format!("Downloaded {model_id}"));
                log::info!("Successfully downloaded model: {}", model_id);
                Ok(model_id)
            },
            Err(e) => {
                progress.finish_with_message("Download failed".to_string());
                Err(e)
            },
        }
    }

    async fn download_model_files(
        &self,
        base_url: &str,
        download_dir: &Path,
        progress: &ProgressIndicator,
    ) -> Result<()> {
        let raw_base = format!("{}/resolve/main/", base_url.trim_end_matches('/'));

        for file_name in REQUIRED_FILES {
            progress.set_message(format!("Downloading {file_name}"));
            self.download_file(&format!("{raw_base}{file_name}"), &download_dir.join(file_name), progress)
                .await?;
        }

        let mut downloaded_models = 0;
        for (file_path, variant) in ONNX_FILES {
            progress.set_message(format!("Downloading {variant} model"));
            match self
                .download_file(&format!("{raw_base}{file_path}"), &download_dir.join(file_path), progress)
                .await
            {
                Ok(()) => {
                    downloaded_models += 1;
                    log::info!("Downloaded {} model variant", variant);
                },
                Err(e) => log::warn!("Failed to download {} variant: {}", variant, e),
            }
        }

        if downloaded_models == 0 {
            return Err(SearchError::network_error(
                "Failed to download any ONNX model variants",
                "no model files found",
            ));
        }
        Ok(())
    }

    async fn download_file(&self, url: &str, local_path: &Path, progress: &ProgressIndicator) -> Result<()> {
        log::debug!("Downloading: {} -> {}", url, local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SearchError::file_io_error("create directory", parent, &e))?;
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| SearchError::file_io_error("create file", local_path, &e))?;

        let body = download_to(&self.client, url, &mut file, progress).await?;
        log::debug!(
            "Downloaded {} bytes to {} (sha256 {})",
            body.bytes,
            local_path.display(),
            body.sha256
        );
        Ok(())
    }

    /// The cache models are written into
    #[must_use]
    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }
}

/// Move a directory, falling back to copy + delete across file systems
fn move_dir(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_dir(from, to)?;
    fs::remove_dir_all(from).map_err(|e| SearchError::file_io_error("remove staging directory", from, &e))
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| SearchError::file_io_error("create directory", to, &e))?;
    let entries = fs::read_dir(from).map_err(|e| SearchError::file_io_error("read directory", from, &e))?;
    for entry in entries.flatten() {
        let source = entry.path();
        let target = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir(&source, &target)?;
        } else {
            fs::copy(&source, &target).map_err(|e| SearchError::file_io_error("copy file", &source, &e))?;
        }
    }
    Ok(())
}

/// Validate that a URL is a supported model repository
///
/// # Errors
/// - Empty URL
/// - Not a `https://huggingface.co/<owner>/<repo>` URL
pub fn validate_model_url(url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(SearchError::invalid_config("Model URL cannot be empty"));
    }

    let Some(repo_path) = url.strip_prefix("https://huggingface.co/") else {
        return Err(SearchError::invalid_config(format!(
            "Unsupported URL format: {url}. Only HuggingFace repositories are supported (https://huggingface.co/...)"
        )));
    };

    let mut parts = repo_path.trim_end_matches('/').split('/');
    match (parts.next(), parts.next()) {
        (Some(owner), Some(repo)) if !owner.is_empty() && !repo.is_empty() => Ok(()),
        _ => Err(SearchError::invalid_config(format!(
            "Invalid HuggingFace repository URL: {url}. Expected format: https://huggingface.co/owner/repo-name"
        ))),
    }
}

/// Whether a video location refers to a remote resource
#[must_use]
pub fn is_remote_location(location: &str) -> bool {
    let lower = location.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// A remote video materialised as a local temporary file
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct FetchedVideo {
    path: tempfile::TempPath,
    /// Source URL
    pub url: String,
    /// Bytes downloaded
    pub bytes: u64,
    /// Hex SHA-256 digest of the content
    pub sha256: String,
}

impl FetchedVideo {
    /// Local path of the downloaded video
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolves a remote video reference into a local file
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    /// Download `url` into a temporary file
    ///
    /// # Errors
    /// - `SearchError::Network` when the resource cannot be retrieved
    async fn fetch(&self, url: &str) -> Result<FetchedVideo>;
}

/// [`RemoteFetcher`] over HTTP(S)
#[derive(Debug, Clone)]
pub struct HttpVideoFetcher {
    client: Client,
    temp_dir: Option<PathBuf>,
}

impl HttpVideoFetcher {
    /// Create a fetcher with a ten-minute request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| SearchError::network_error("Failed to create HTTP client", e))?;
        Ok(Self {
            client,
            temp_dir: None,
        })
    }

    /// Place temporary files in `dir` instead of the system temp directory
    #[must_use]
    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    fn suffix_for(url: &str) -> String {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let extension = Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(VideoFormat::from_extension)
            .unwrap_or(VideoFormat::Mp4)
            .extension();
        format!(".{extension}")
    }
}

#[async_trait]
impl RemoteFetcher for HttpVideoFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedVideo> {
        if !is_remote_location(url) {
            return Err(SearchError::invalid_config(format!("Not an http(s) URL: {url}")));
        }

        let suffix = Self::suffix_for(url);
        let mut builder = tempfile::Builder::new();
        builder.prefix("evidence-vsearch-").suffix(&suffix);
        let named = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| SearchError::file_io_error("create temporary video file", std::env::temp_dir(), &e))?;

        let std_file = named
            .reopen()
            .map_err(|e| SearchError::file_io_error("open temporary video file", named.path(), &e))?;
        let path = named.into_temp_path();
        let mut file = tokio::fs::File::from_std(std_file);

        log::info!("Fetching remote video {}", url);
        let body = download_to(&self.client, url, &mut file, &ProgressIndicator::NoOp).await?;
        drop(file);

        log::info!(
            "Fetched {} bytes from {} (sha256 {})",
            body.bytes,
            url,
            body.sha256
        );

        Ok(FetchedVideo {
            path,
            url: url.to_string(),
            bytes: body.bytes,
            sha256: body.sha256,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Serve one HTTP response on a local port, returning the base URL
    async fn serve_once(status_line: &'static str, body: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await;
            let header = format!(
                "{status_line}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_validate_model_url() {
        assert!(validate_model_url("https://huggingface.co/Xenova/owlv2-base-patch16-ensemble").is_ok());
        assert!(validate_model_url("https://huggingface.co/google/owlv2-base-patch16/").is_ok());

        assert!(validate_model_url("").is_err());
        assert!(validate_model_url("https://github.com/user/repo").is_err());
        assert!(validate_model_url("http://huggingface.co/user/repo").is_err());
        assert!(validate_model_url("https://huggingface.co/").is_err());
        assert!(validate_model_url("https://huggingface.co/single-part").is_err());
    }

    #[test]
    fn test_is_remote_location() {
        assert!(is_remote_location("https://bucket.s3.amazonaws.com/case/video.mp4"));
        assert!(is_remote_location("HTTP://example.com/v.mkv"));
        assert!(!is_remote_location("/var/evidence/video.mp4"));
        assert!(!is_remote_location("file:///tmp/video.mp4"));
    }

    #[test]
    fn test_suffix_from_url() {
        assert_eq!(HttpVideoFetcher::suffix_for("https://h/a/b.mov?sig=abc"), ".mov");
        assert_eq!(HttpVideoFetcher::suffix_for("https://h/a/b"), ".mp4");
        assert_eq!(HttpVideoFetcher::suffix_for("https://h/a/b.exe"), ".mp4");
    }

    #[tokio::test]
    async fn test_copy_hashed_digest() {
        let mut reader: &[u8] = b"abc";
        let mut out = Vec::new();
        let body = copy_hashed(&mut reader, &mut out, Some(3), &ProgressIndicator::NoOp)
            .await
            .unwrap();
        assert_eq!(out, b"abc");
        assert_eq!(body.bytes, 3);
        assert_eq!(
            body.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_temp_file_and_cleans_up() {
        let base = serve_once("HTTP/1.1 200 OK", b"fake video bytes").await;
        let dir = tempfile::tempdir().unwrap();
        let fetcher = HttpVideoFetcher::new().unwrap().with_temp_dir(dir.path());

        let fetched = fetcher.fetch(&format!("{base}/evidence/clip.mp4")).await.unwrap();
        let path = fetched.path().to_path_buf();
        assert_eq!(std::fs::read(&path).unwrap(), b"fake video bytes");
        assert_eq!(fetched.bytes, 16);
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp4"));

        drop(fetched);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_fetch_http_error_is_network_error() {
        let base = serve_once("HTTP/1.1 404 Not Found", b"").await;
        let fetcher = HttpVideoFetcher::new().unwrap();
        let result = fetcher.fetch(&format!("{base}/missing.mp4")).await;
        assert!(matches!(result, Err(SearchError::Network(_))));
    }

    #[tokio::test]
    async fn test_fetch_rejects_local_paths() {
        let fetcher = HttpVideoFetcher::new().unwrap();
        assert!(matches!(
            fetcher.fetch("/tmp/video.mp4").await,
            Err(SearchError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_download_model_rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::with_custom_cache_dir(dir.path()).unwrap();
        let downloader = ModelDownloader::with_cache(cache).unwrap();
        assert!(downloader
            .download_model("https://example.com/model", false)
            .await
            .is_err());
    }
}
