//! Tracing configuration for structured logging
//!
//! Library code only emits events (through both `log` and `tracing`);
//! applications decide where they go. Span and event helpers are always
//! available, subscriber setup requires the `cli` feature.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output (default for CLI)
    Console,
    /// Compact output without colours for CI environments
    Compact,
    /// JSON structured logging for log shippers
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Configuration for tracing output destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TracingOutput {
    /// Output to stderr (default)
    Console,
    /// Output to a file
    #[cfg(feature = "tracing-files")]
    File(std::path::PathBuf),
    /// Output to both stderr and a file
    #[cfg(feature = "tracing-files")]
    Both(std::path::PathBuf),
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level (maps to log levels)
    pub verbosity: u8,
    pub format: TracingFormat,
    pub output: TracingOutput,
    /// Environment filter string (overrides verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            output: TracingOutput::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-2+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_output(mut self, output: TracingOutput) -> Self {
        self.output = output;
        self
    }

    /// Use an explicit `EnvFilter` directive instead of the verbosity mapping
    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Convert verbosity level to tracing filter string
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Install the global subscriber
    ///
    /// `log` records are forwarded into the subscriber. Keep the returned
    /// guard alive for as long as file output should be flushed.
    ///
    /// # Errors
    /// - Invalid filter directive
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<TracingGuard> {
        let filter = match &self.env_filter {
            Some(directive) => EnvFilter::try_new(directive)?,
            None => EnvFilter::try_new(self.verbosity_to_filter())?,
        };

        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
        #[allow(unused_mut)]
        let mut guard = TracingGuard::default();

        match &self.output {
            TracingOutput::Console => layers.push(console_layer(self.format)),
            #[cfg(feature = "tracing-files")]
            TracingOutput::File(path) => {
                let (layer, file_guard) = file_layer(self.format, path);
                layers.push(layer);
                guard.file = Some(file_guard);
            },
            #[cfg(feature = "tracing-files")]
            TracingOutput::Both(path) => {
                layers.push(console_layer(self.format));
                let (layer, file_guard) = file_layer(self.format, path);
                layers.push(layer);
                guard.file = Some(file_guard);
            },
        }

        Registry::default().with(layers).with(filter).try_init()?;

        if let Some(session_id) = &self.session_id {
            tracing::info!(session_id = %session_id, "Visual search session started");
        }

        Ok(guard)
    }
}

/// Keeps background log writers alive
#[cfg(feature = "cli")]
#[derive(Debug, Default)]
pub struct TracingGuard {
    #[cfg(feature = "tracing-files")]
    file: Option<tracing_appender::non_blocking::WorkerGuard>,
}

#[cfg(feature = "cli")]
fn console_layer(format: TracingFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    use tracing_subscriber::fmt;

    match format {
        TracingFormat::Console => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .boxed(),
        TracingFormat::Compact => fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .with_writer(std::io::stderr)
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    }
}

#[cfg(all(feature = "cli", feature = "tracing-files"))]
fn file_layer(
    format: TracingFormat,
    path: &std::path::Path,
) -> (
    Box<dyn Layer<Registry> + Send + Sync>,
    tracing_appender::non_blocking::WorkerGuard,
) {
    use tracing_subscriber::fmt;

    let file_appender = tracing_appender::rolling::never(
        path.parent().unwrap_or_else(|| std::path::Path::new(".")),
        path.file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("evidence-vsearch.log")),
    );
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let layer = match format {
        TracingFormat::Console | TracingFormat::Compact => fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .compact()
            .boxed(),
        #[cfg(feature = "tracing-json")]
        TracingFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
    };
    (layer, guard)
}

/// Initialize tracing with CLI-friendly defaults and a fresh session id
///
/// # Errors
/// - A global subscriber is already installed
#[cfg(feature = "cli")]
pub fn init_cli_tracing(verbosity: u8) -> anyhow::Result<TracingGuard> {
    TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(TracingFormat::Console)
        .with_session_id(uuid::Uuid::new_v4().to_string())
        .init()
}

/// Span creation helpers
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one search request
    pub fn search(query: &str, location: &str, policy: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "search",
            query = %query,
            location = %location,
            policy = %policy
        )
    }

    /// Span covering detection on one candidate frame
    pub fn candidate(frame_index: u64, timestamp: f64) -> Span {
        tracing::span!(
            Level::DEBUG,
            "candidate",
            frame_index = frame_index,
            timestamp = timestamp
        )
    }

    /// Span for model loading
    pub fn model_loading(model_name: &str, provider: &str) -> Span {
        tracing::span!(
            Level::INFO,
            "model_loading",
            model_name = %model_name,
            provider = %provider
        )
    }

    /// Span for one model invocation
    pub fn inference(model_name: &str, dimensions: (u32, u32)) -> Span {
        tracing::span!(
            Level::DEBUG,
            "inference",
            model_name = %model_name,
            width = dimensions.0,
            height = dimensions.1
        )
    }

    /// Span for model or video downloads
    pub fn download(url: &str) -> Span {
        tracing::span!(Level::INFO, "download", url = %url)
    }
}

/// Event helpers for common logging patterns
pub mod events {
    use crate::types::SearchWarning;
    use tracing::{debug, warn};

    /// Record an error absorbed by the pipeline
    pub fn absorbed(warning: &SearchWarning) {
        warn!(
            kind = ?warning.kind,
            frame_id = ?warning.frame_id,
            message = %warning.message,
            "Absorbed non-fatal error"
        );
    }

    /// Log a timing measurement
    pub fn performance_metric(operation: &str, duration_ms: u64) {
        debug!(
            operation = %operation,
            duration_ms = duration_ms,
            "Performance metric"
        );
    }
}
