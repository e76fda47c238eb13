//! Florence-2 pipeline orchestrator
//!
//! ```text
//! image ──> ImagePreprocessor ──> vision encoder ──┐
//!                                                   ├─> fusion ─> encoder ─> greedy decoder ─> decode ─> parse
//! query ──> <s> prompt </s> ──> token embedder ────┘
//! ```
//!
//! Every stage output is a return value threaded into the next stage; the
//! pipeline itself only holds the loaded models and the last profiling record.

use crate::config::Florence2Config;
use crate::error::{Florence2Error, Result};
use crate::models::{Florence2Backend, GenerationOptions, GreedyDecoder, OnnxBackend};
use crate::postprocess::{parse_output, Florence2Result};
use crate::preprocessing::{canvas_size, ImagePreprocessor, MultimodalFusion};
use crate::tasks::Florence2Query;
use crate::tokenizer::BartTokenizer;
use image::{DynamicImage, GenericImageView};
use ndarray::Array2;
use std::path::Path;
use std::time::{Duration, Instant};

/// Per-stage timing of the last [`Florence2Pipeline::process`] call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineProfiling {
    /// Resize and normalization
    pub preprocess_duration: Duration,
    /// Prompt tokenization
    pub tokenize_duration: Duration,
    /// Vision encoder inference
    pub vision_encoder_duration: Duration,
    /// Prompt token embedding
    pub embed_duration: Duration,
    /// Concatenation and mask construction
    pub fusion_duration: Duration,
    /// Fusion encoder inference
    pub encoder_duration: Duration,
    /// Autoregressive decode loop
    pub generation_duration: Duration,
    /// Id-to-text decoding and output parsing
    pub postprocess_duration: Duration,
    /// Ids produced by the decode loop
    pub generated_tokens: usize,
}

impl PipelineProfiling {
    #[inline]
    #[must_use = "returns the total duration sum"]
    pub fn total(&self) -> Duration {
        self.preprocess_duration
            + self.tokenize_duration
            + self.vision_encoder_duration
            + self.embed_duration
            + self.fusion_duration
            + self.encoder_duration
            + self.generation_duration
            + self.postprocess_duration
    }

    /// Mean decode step time, if any token was generated
    #[must_use = "returns the mean time per generated token"]
    pub fn per_token(&self) -> Option<Duration> {
        u32::try_from(self.generated_tokens)
            .ok()
            .filter(|&n| n > 0)
            .map(|n| self.generation_duration / n)
    }

    fn log(&self) {
        log::debug!(
            "Florence-2 timing: total={:?} preprocess={:?} tokenize={:?} vision={:?} embed={:?} \
             fusion={:?} encoder={:?} generation={:?} ({} tokens) postprocess={:?}",
            self.total(),
            self.preprocess_duration,
            self.tokenize_duration,
            self.vision_encoder_duration,
            self.embed_duration,
            self.fusion_duration,
            self.encoder_duration,
            self.generation_duration,
            self.generated_tokens,
            self.postprocess_duration
        );
    }
}

/// Loaded Florence-2 model plus tokenizer
///
/// One inference runs at a time (`&mut self`); use one pipeline per concurrent
/// worker.
pub struct Florence2Pipeline {
    backend: Box<dyn Florence2Backend>,
    tokenizer: BartTokenizer,
    preprocessor: ImagePreprocessor,
    fusion: MultimodalFusion,
    decoder: GreedyDecoder,
    config: Florence2Config,
    last_profiling: PipelineProfiling,
}

impl std::fmt::Debug for Florence2Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Florence2Pipeline")
            .field("backend", &"<Florence2Backend>")
            .field("tokenizer", &self.tokenizer)
            .field("preprocessor", &self.preprocessor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Florence2Pipeline {
    /// Load the tokenizer and the four ONNX graphs named by `config`
    ///
    /// # Errors
    ///
    /// [`Florence2Error::ConfigError`] for invalid settings or missing artifacts,
    /// [`Florence2Error::ModelLoadError`] when ONNX Runtime rejects a graph.
    pub async fn create(config: Florence2Config) -> Result<Self> {
        config.validate()?;
        log::info!(
            "Loading Florence-2 from {} (metadata: {}, device: {})",
            config.model_dir.display(),
            config.metadata_dir.display(),
            config.device
        );

        let tokenizer = BartTokenizer::load(&config.metadata_dir).await?;

        let session_config = config.clone();
        let backend = tokio::task::spawn_blocking(move || OnnxBackend::load(&session_config))
            .await
            .map_err(|e| Florence2Error::model_load("Florence2", e))??;

        log::info!("Florence-2 loaded: {:?}", backend);
        Ok(Self::with_backend(backend, tokenizer, config))
    }

    /// Assemble a pipeline from an already-loaded backend and tokenizer
    #[must_use = "returns the assembled pipeline"]
    pub fn with_backend<B: Florence2Backend + 'static>(
        backend: B,
        tokenizer: BartTokenizer,
        config: Florence2Config,
    ) -> Self {
        let special = tokenizer.special_ids();
        Self {
            backend: Box::new(backend),
            preprocessor: ImagePreprocessor::new(config.resize_mode),
            fusion: MultimodalFusion::new(special.pad),
            // Florence-2 starts decoding from </s>
            decoder: GreedyDecoder::new(special.eos, special.eos),
            tokenizer,
            config,
            last_profiling: PipelineProfiling::default(),
        }
    }

    /// Override the image preprocessor (e.g. a smaller input size for tests)
    #[must_use = "returns the pipeline with the preprocessor replaced"]
    pub fn with_preprocessor(mut self, preprocessor: ImagePreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Run `query` on `image` with the configured generation cap
    pub fn process(&mut self, image: &DynamicImage, query: &Florence2Query) -> Result<Florence2Result> {
        let options = GenerationOptions::with_max_length(self.config.max_length);
        self.process_with_options(image, query, &options)
    }

    /// Load the image at `path` and run `query` on it
    pub fn process_path<P: AsRef<Path>>(
        &mut self,
        path: P,
        query: &Florence2Query,
    ) -> Result<Florence2Result> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| Florence2Error::PreprocessingError {
            reason: format!("Failed to load image {}: {e}", path.display()),
        })?;
        self.process(&image, query)
    }

    /// Run `query` on `image` with explicit generation options
    ///
    /// # Errors
    ///
    /// - [`Florence2Error::ArgumentError`] for an empty or whitespace-only prompt
    /// - [`Florence2Error::Cancelled`] when `options.cancel` is set
    /// - [`Florence2Error::InferenceError`] from any graph
    pub fn process_with_options(
        &mut self,
        image: &DynamicImage,
        query: &Florence2Query,
        options: &GenerationOptions,
    ) -> Result<Florence2Result> {
        if query.prompt().trim().is_empty() {
            return Err(Florence2Error::argument(format!(
                "Prompt for task {} is empty",
                query.task()
            )));
        }

        let mut profiling = PipelineProfiling::default();

        let start = Instant::now();
        let pixel_values = self.preprocessor.process_image(image)?;
        let (width, height) = image.dimensions();
        let canvas = canvas_size(width, height, self.preprocessor.mode());
        profiling.preprocess_duration = start.elapsed();

        let start = Instant::now();
        let ids = self.tokenizer.encode_prompt(query.prompt());
        let prompt_ids = Array2::from_shape_vec((1, ids.len()), ids)
            .map_err(|e| Florence2Error::argument(format!("Invalid prompt ids: {e}")))?;
        profiling.tokenize_duration = start.elapsed();
        log::debug!("Task {}: {} prompt tokens", query.task(), prompt_ids.ncols());

        let start = Instant::now();
        let vision_features = self.backend.run_vision_encoder(pixel_values.view())?;
        profiling.vision_encoder_duration = start.elapsed();

        let start = Instant::now();
        let text_features = self.backend.embed_tokens(prompt_ids.view())?;
        profiling.embed_duration = start.elapsed();

        let start = Instant::now();
        let fused = self.fusion.process(
            vision_features.view(),
            text_features.view(),
            prompt_ids.view(),
        );
        profiling.fusion_duration = start.elapsed();

        let start = Instant::now();
        let hidden = self
            .backend
            .run_encoder(fused.inputs_embeds.view(), fused.attention_mask.view())?;
        profiling.encoder_duration = start.elapsed();

        let start = Instant::now();
        let generated = self.decoder.run_decoder(
            self.backend.as_mut(),
            hidden.view(),
            fused.attention_mask.view(),
            options,
        )?;
        profiling.generation_duration = start.elapsed();
        profiling.generated_tokens = generated.len();

        let start = Instant::now();
        let text = self.tokenizer.decode(&generated, false);
        log::debug!("Decoded output: {text:?}");
        let result = parse_output(query.task(), &text, canvas)?;
        profiling.postprocess_duration = start.elapsed();

        profiling.log();
        self.last_profiling = profiling;
        Ok(result)
    }

    /// Timing of the last successful call
    #[inline]
    #[must_use = "returns the last profiling record"]
    pub const fn last_profiling(&self) -> &PipelineProfiling {
        &self.last_profiling
    }

    #[inline]
    #[must_use = "returns the tokenizer"]
    pub const fn tokenizer(&self) -> &BartTokenizer {
        &self.tokenizer
    }

    #[inline]
    #[must_use = "returns the configuration"]
    pub const fn config(&self) -> &Florence2Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiling_total_and_per_token() {
        let profiling = PipelineProfiling {
            preprocess_duration: Duration::from_millis(5),
            encoder_duration: Duration::from_millis(10),
            generation_duration: Duration::from_millis(40),
            generated_tokens: 4,
            ..Default::default()
        };
        assert_eq!(profiling.total(), Duration::from_millis(55));
        assert_eq!(profiling.per_token(), Some(Duration::from_millis(10)));
        assert_eq!(PipelineProfiling::default().per_token(), None);
    }

    /// Backend that must never be reached
    struct UnreachableBackend;

    impl Florence2Backend for UnreachableBackend {
        fn run_vision_encoder(
            &mut self,
            _: ndarray::ArrayView4<'_, f32>,
        ) -> Result<ndarray::Array3<f32>> {
            panic!("vision encoder called")
        }

        fn embed_tokens(&mut self, _: ndarray::ArrayView2<'_, i64>) -> Result<ndarray::Array3<f32>> {
            panic!("embedder called")
        }

        fn run_encoder(
            &mut self,
            _: ndarray::ArrayView3<'_, f32>,
            _: ndarray::ArrayView2<'_, i64>,
        ) -> Result<ndarray::Array3<f32>> {
            panic!("encoder called")
        }

        fn run_decoder_step(
            &mut self,
            _: crate::models::DecoderStepInput<'_>,
        ) -> Result<crate::models::DecoderStepOutput> {
            panic!("decoder called")
        }

        fn geometry(&self) -> crate::config::DecoderGeometry {
            crate::config::DecoderGeometry::default()
        }
    }

    fn special_only_tokenizer() -> BartTokenizer {
        use crate::tokenizer::{MergeRanks, Vocabulary};
        let base = [("<s>", 0), ("<pad>", 1), ("</s>", 2), ("<unk>", 3), ("<mask>", 4)]
            .into_iter()
            .map(|(t, id)| (t.to_string(), id))
            .collect();
        let vocab = Vocabulary::new(base, std::collections::HashMap::new()).unwrap();
        BartTokenizer::from_parts(vocab, MergeRanks::default()).unwrap()
    }

    #[test]
    fn test_blank_prompt_rejected_before_inference() {
        let config = crate::config::Florence2ConfigBuilder::new()
            .skip_validation(true)
            .build()
            .unwrap();
        let mut pipeline =
            Florence2Pipeline::with_backend(UnreachableBackend, special_only_tokenizer(), config);
        let image = DynamicImage::new_rgb8(4, 4);

        for prompt in ["", "  \t\n"] {
            let query = Florence2Query::from_parts(crate::tasks::TaskType::Caption, prompt);
            let err = pipeline.process(&image, &query).unwrap_err();
            assert!(err.is_argument_error());
            assert!(err.to_string().contains("<CAPTION>"));
        }
    }

    #[tokio::test]
    async fn test_create_reports_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::config::Florence2ConfigBuilder::new()
            .model_dir(dir.path())
            .metadata_dir(dir.path())
            .skip_validation(true)
            .build()
            .unwrap();
        // Validation skipped, so the tokenizer load is the first failure
        let err = Florence2Pipeline::create(config).await.unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("vocab.json"));
    }
}
