//! ONNX Runtime backend for OWL-style zero-shot detectors
//!
//! Runs an exported OWLv2 graph with inputs `input_ids`, `pixel_values` and
//! `attention_mask` and outputs `logits` (`[1, patches, prompts]`) and
//! `pred_boxes` (`[1, patches, 4]`, centre format relative to the padded
//! square). Each patch yields one raw detection for its best prompt.

use crate::config::{DetectorConfig, ExecutionProvider};
use crate::error::{Result, SearchError};
use crate::inference::{InferenceBackend, RawDetection};
use crate::models::ModelManager;
use crate::utils::{ClipTokenizer, EncodedPrompts, ImagePreprocessor, PaddedGeometry};
use image::RgbImage;
use instant::Duration;
use ndarray::{ArrayViewD, Ix3};
use ort::execution_providers::{
    CUDAExecutionProvider, CoreMLExecutionProvider, ExecutionProvider as OrtExecutionProvider,
};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Value;

/// ONNX Runtime backend for zero-shot detection models
pub struct OnnxBackend {
    session: Option<Session>,
    tokenizer: Option<ClipTokenizer>,
    model_manager: ModelManager,
    execution_provider: ExecutionProvider,
    intra_threads: usize,
    inter_threads: usize,
    /// Last encoded prompt batch; a search reuses the same query for every frame
    encoded_prompts: Option<(Vec<String>, EncodedPrompts)>,
}

impl OnnxBackend {
    /// List all ONNX Runtime execution providers with availability status and descriptions
    ///
    /// Returns `(name, available, description)` tuples.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use evidence_vsearch::backends::OnnxBackend;
    ///
    /// for (name, available, description) in OnnxBackend::list_providers() {
    ///     println!("{}: {} - {}", name, if available { "yes" } else { "no" }, description);
    /// }
    /// ```
    #[must_use]
    pub fn list_providers() -> Vec<(String, bool, String)> {
        log::debug!("System hardware analysis:");
        log::debug!("  - Platform: {os}", os = std::env::consts::OS);
        log::debug!("  - Architecture: {arch}", arch = std::env::consts::ARCH);
        log::debug!("  - CPU cores: {cores}", cores = available_cores());

        let cuda_available =
            OrtExecutionProvider::is_available(&CUDAExecutionProvider::default()).unwrap_or(false);
        let coreml_available =
            OrtExecutionProvider::is_available(&CoreMLExecutionProvider::default())
                .unwrap_or(false);
        log::debug!("CUDA available: {cuda_available}, CoreML available: {coreml_available}");

        vec![
            (
                "CPU".to_string(),
                true,
                "Always available, uses CPU for inference".to_string(),
            ),
            (
                "CUDA".to_string(),
                cuda_available,
                "NVIDIA GPU acceleration (requires CUDA toolkit and compatible GPU)".to_string(),
            ),
            (
                "CoreML".to_string(),
                coreml_available,
                "Apple Silicon GPU acceleration (macOS only)".to_string(),
            ),
        ]
    }

    /// Create a backend for a resolved model
    #[must_use]
    pub fn with_model_manager(model_manager: ModelManager) -> Self {
        Self {
            session: None,
            tokenizer: None,
            model_manager,
            execution_provider: ExecutionProvider::Auto,
            intra_threads: 0,
            inter_threads: 0,
            encoded_prompts: None,
        }
    }

    /// Resolve the configured model and create an uninitialized backend
    ///
    /// # Errors
    /// - Model not cached or folder incomplete
    pub fn from_config(config: &DetectorConfig) -> Result<Self> {
        let manager = ModelManager::from_spec(&config.model_spec, Some(config.execution_provider))?;
        let mut backend = Self::with_model_manager(manager);
        backend.execution_provider = config.execution_provider;
        backend.intra_threads = config.intra_threads;
        backend.inter_threads = config.inter_threads;
        Ok(backend)
    }

    fn configure_providers(&self, builder: SessionBuilder) -> Result<SessionBuilder> {
        let cuda = CUDAExecutionProvider::default();
        let coreml = CoreMLExecutionProvider::default();
        let cuda_available = OrtExecutionProvider::is_available(&cuda).unwrap_or(false);
        let coreml_available = OrtExecutionProvider::is_available(&coreml).unwrap_or(false);

        let providers = match self.execution_provider {
            ExecutionProvider::Auto => {
                let mut providers = Vec::new();
                if cuda_available {
                    log::info!("CUDA execution provider is available and will be used");
                    providers.push(cuda.build());
                }
                if coreml_available {
                    log::info!("CoreML execution provider is available and will be used");
                    providers.push(coreml.with_subgraphs(true).build());
                }
                if providers.is_empty() {
                    log::info!("No hardware acceleration available, using CPU");
                }
                providers
            },
            ExecutionProvider::Cpu => {
                log::info!("Using CPU execution provider");
                Vec::new()
            },
            ExecutionProvider::Cuda if cuda_available => {
                log::info!("Using CUDA execution provider");
                vec![cuda.build()]
            },
            ExecutionProvider::CoreMl if coreml_available => {
                log::info!("Using CoreML execution provider");
                vec![coreml.with_subgraphs(true).build()]
            },
            requested => {
                log::warn!("{requested} execution provider requested but not available, falling back to CPU");
                Vec::new()
            },
        };

        if providers.is_empty() {
            return Ok(builder);
        }
        builder.with_execution_providers(providers).map_err(|e| {
            SearchError::inference(format!("Failed to set execution providers: {e}"))
        })
    }

    /// Load and initialize the ONNX model and tokenizer
    fn load_model(&mut self) -> Result<std::time::Duration> {
        let model_load_start = std::time::Instant::now();
        let files = self.model_manager.files().clone();
        let span = crate::tracing_config::spans::model_loading(
            &files.name,
            &self.execution_provider.to_string(),
        );
        let _guard = span.enter();

        let tokenizer =
            ClipTokenizer::from_files(&files.vocab_path, &files.merges_path, files.max_text_tokens)?;
        let model_data = self.model_manager.load_model()?;

        let builder = Session::builder()
            .map_err(|e| SearchError::inference(format!("Failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| SearchError::inference(format!("Failed to set optimization level: {e}")))?;
        let builder = self.configure_providers(builder)?;

        let intra_threads = if self.intra_threads > 0 {
            self.intra_threads
        } else {
            available_cores()
        };
        let inter_threads = if self.inter_threads > 0 {
            self.inter_threads
        } else {
            (available_cores() / 4).max(1)
        };

        let session = builder
            .with_intra_threads(intra_threads)
            .map_err(|e| SearchError::inference(format!("Failed to set intra threads: {e}")))?
            .with_inter_threads(inter_threads)
            .map_err(|e| SearchError::inference(format!("Failed to set inter threads: {e}")))?
            .commit_from_memory(&model_data)
            .map_err(|e| SearchError::model(format!("Failed to create session from model data: {e}")))?;

        log::debug!("ONNX Runtime session created");
        log::debug!("  - Requested provider: {}", self.execution_provider);
        log::debug!("  - Threading: {intra_threads} intra-op, {inter_threads} inter-op");
        log::debug!(
            "  - Model: {} ({:.2} MB)",
            files.name,
            model_data.len() as f64 / (1024.0 * 1024.0)
        );

        self.session = Some(session);
        self.tokenizer = Some(tokenizer);

        let model_load_time = model_load_start.elapsed();
        crate::tracing_config::events::performance_metric(
            "model_loading",
            model_load_time.as_millis() as u64,
        );
        Ok(model_load_time)
    }

    fn encode_prompts(&mut self, prompts: &[String]) -> Result<EncodedPrompts> {
        if let Some((cached, encoded)) = &self.encoded_prompts {
            if cached.as_slice() == prompts {
                return Ok(encoded.clone());
            }
        }
        let tokenizer = self
            .tokenizer
            .as_ref()
            .ok_or_else(|| SearchError::internal("Tokenizer not initialized"))?;
        let encoded = tokenizer.encode_batch(prompts)?;
        self.encoded_prompts = Some((prompts.to_vec(), encoded.clone()));
        Ok(encoded)
    }
}

impl std::fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackend")
            .field("model", &self.model_manager.files().name)
            .field("execution_provider", &self.execution_provider)
            .field("initialized", &self.session.is_some())
            .finish()
    }
}

impl InferenceBackend for OnnxBackend {
    fn initialize(&mut self) -> Result<Option<Duration>> {
        if self.session.is_some() {
            return Ok(None);
        }
        self.load_model().map(Some)
    }

    fn infer(&mut self, image: &RgbImage, prompts: &[String]) -> Result<Vec<RawDetection>> {
        let inference_start = std::time::Instant::now();
        let encoded = self.encode_prompts(prompts)?;
        let (pixels, geometry) =
            ImagePreprocessor::preprocess(image, &self.model_manager.files().preprocessing)?;

        let session = self
            .session
            .as_mut()
            .ok_or_else(|| SearchError::internal("Backend not initialized"))?;

        let to_value = |e: ort::Error| SearchError::processing(format!("Failed to convert input tensor: {e}"));
        let input_ids = Value::from_array(encoded.input_ids).map_err(to_value)?;
        let attention_mask = Value::from_array(encoded.attention_mask).map_err(to_value)?;
        let pixel_values = Value::from_array(pixels).map_err(to_value)?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "pixel_values" => pixel_values,
                "attention_mask" => attention_mask
            ])
            .map_err(|e| SearchError::inference(format!("ONNX inference failed: {e}")))?;

        let extract = |name: &str| -> Result<ArrayViewD<'_, f32>> {
            outputs
                .get(name)
                .ok_or_else(|| SearchError::inference(format!("Model has no '{name}' output")))?
                .try_extract_array::<f32>()
                .map_err(|e| SearchError::inference(format!("Failed to extract '{name}': {e}")))
        };
        let detections = decode_outputs(extract("logits")?, extract("pred_boxes")?, geometry)?;

        log::debug!(
            "Inference complete: {} patches in {:.2}ms",
            detections.len(),
            inference_start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(detections)
    }

    fn model_name(&self) -> &str {
        &self.model_manager.files().name
    }

    fn is_initialized(&self) -> bool {
        self.session.is_some()
    }
}

/// Turn `logits` and `pred_boxes` into one raw detection per patch
fn decode_outputs(
    logits: ArrayViewD<'_, f32>,
    boxes: ArrayViewD<'_, f32>,
    geometry: PaddedGeometry,
) -> Result<Vec<RawDetection>> {
    let logits = logits
        .into_dimensionality::<Ix3>()
        .map_err(|e| SearchError::inference(format!("Unexpected logits shape: {e}")))?;
    let boxes = boxes
        .into_dimensionality::<Ix3>()
        .map_err(|e| SearchError::inference(format!("Unexpected pred_boxes shape: {e}")))?;

    let (_, patches, _) = logits.dim();
    if boxes.dim().1 != patches || boxes.dim().2 != 4 {
        return Err(SearchError::inference(format!(
            "pred_boxes shape {:?} does not match logits shape {:?}",
            boxes.dim(),
            logits.dim()
        )));
    }

    let detections = (0..patches)
        .filter_map(|patch| {
            let (prompt_index, logit) = logits
                .slice(ndarray::s![0, patch, ..])
                .iter()
                .copied()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(&b.1))?;
            let b = boxes.slice(ndarray::s![0, patch, ..]);
            let center_box = [b[0_usize], b[1_usize], b[2_usize], b[3_usize]];
            Some(RawDetection::new(
                geometry.to_frame_normalized(center_box),
                sigmoid(logit),
                prompt_index,
            ))
        })
        .collect();
    Ok(detections)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(8)
}
