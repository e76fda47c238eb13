//! Pipeline configuration
//!
//! [`Florence2Config`] names the model-graph directory and the tokenizer metadata
//! directory plus the runtime knobs of the ONNX sessions. Use
//! [`Florence2ConfigBuilder`] for a validated configuration, or load one from JSON
//! with [`Florence2Config::from_json_file`].

use crate::error::{Florence2Error, Result};
use crate::preprocessing::ResizeMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default vision encoder graph file name
pub const VISION_ENCODER_FILE: &str = "vision_encoder.onnx";
/// Default token embedding graph file name
pub const EMBED_TOKENS_FILE: &str = "embed_tokens.onnx";
/// Default fusion encoder graph file name
pub const ENCODER_FILE: &str = "encoder_model.onnx";
/// Default merged decoder graph file name
pub const DECODER_FILE: &str = "decoder_model_merged.onnx";

/// Vocabulary file inside the metadata directory
pub const VOCAB_FILE: &str = "vocab.json";
/// Merge rules file inside the metadata directory
pub const MERGES_FILE: &str = "merges.txt";
/// Optional added-tokens file inside the metadata directory
pub const ADDED_TOKENS_FILE: &str = "added_tokens.json";

/// Default generation cap in decode steps
pub const DEFAULT_MAX_LENGTH: usize = 1024;

/// Execution device for ONNX Runtime sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// CPU inference
    #[default]
    Cpu,
    /// CUDA GPU inference (device index)
    Cuda(usize),
    /// Apple CoreML (Neural Engine / GPU)
    CoreMl,
}

impl std::fmt::Display for Device {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Cuda(idx) => write!(f, "cuda:{idx}"),
            Self::CoreMl => write!(f, "coreml"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "cpu" => Ok(Self::Cpu),
            "coreml" | "ane" => Ok(Self::CoreMl),
            "cuda" | "gpu" => Ok(Self::Cuda(0)),
            other => other
                .strip_prefix("cuda:")
                .and_then(|idx| idx.parse().ok())
                .map(Self::Cuda)
                .ok_or_else(|| {
                    format!("Unknown device '{s}'. Expected: cpu, cuda, cuda:N, coreml")
                }),
        }
    }
}

/// Attention geometry of the decoder graph
///
/// The number of layers is discovered from the decoder's cache inputs at load time;
/// heads and head size shape the empty first-step cache placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderGeometry {
    /// Decoder layers (Florence-2 base: 6, large: 12)
    pub num_layers: usize,
    /// Attention heads per layer (base: 12, large: 16)
    pub num_heads: usize,
    /// Size of one attention head
    pub head_dim: usize,
}

impl Default for DecoderGeometry {
    #[inline]
    fn default() -> Self {
        Self {
            num_layers: 6,
            num_heads: 12,
            head_dim: 64,
        }
    }
}

/// Graph file names inside the model directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelFiles {
    pub vision_encoder: String,
    pub embed_tokens: String,
    pub encoder: String,
    pub decoder: String,
}

impl Default for ModelFiles {
    fn default() -> Self {
        Self {
            vision_encoder: VISION_ENCODER_FILE.to_string(),
            embed_tokens: EMBED_TOKENS_FILE.to_string(),
            encoder: ENCODER_FILE.to_string(),
            decoder: DECODER_FILE.to_string(),
        }
    }
}

/// Configuration for [`Florence2Pipeline`](crate::Florence2Pipeline)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Florence2Config {
    /// Directory holding the four ONNX graphs
    pub model_dir: PathBuf,

    /// Directory holding `vocab.json`, `merges.txt` and `added_tokens.json`
    pub metadata_dir: PathBuf,

    /// Graph file names inside `model_dir`
    pub model_files: ModelFiles,

    /// Execution device for all four sessions
    pub device: Device,

    /// Intra-op threads per session (defaults to the number of logical CPUs)
    pub intra_threads: usize,

    /// How images are fitted to the square model input
    pub resize_mode: ResizeMode,

    /// Maximum number of generated tokens
    pub max_length: usize,

    /// Decoder attention geometry
    pub decoder: DecoderGeometry,

    /// Skip artifact existence checks (unit tests with custom backends)
    #[serde(skip)]
    pub skip_validation: bool,
}

impl Default for Florence2Config {
    #[inline]
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models/florence2"),
            metadata_dir: PathBuf::from("models/florence2"),
            model_files: ModelFiles::default(),
            device: Device::Cpu,
            intra_threads: num_cpus::get(),
            resize_mode: ResizeMode::Stretch,
            max_length: DEFAULT_MAX_LENGTH,
            decoder: DecoderGeometry::default(),
            skip_validation: false,
        }
    }
}

impl Florence2Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Florence2Error::config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            Florence2Error::config(format!("Failed to parse config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this configuration as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    #[inline]
    #[must_use = "returns the path of the vision encoder graph"]
    pub fn vision_encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_files.vision_encoder)
    }

    #[inline]
    #[must_use = "returns the path of the token embedding graph"]
    pub fn embed_tokens_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_files.embed_tokens)
    }

    #[inline]
    #[must_use = "returns the path of the fusion encoder graph"]
    pub fn encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_files.encoder)
    }

    #[inline]
    #[must_use = "returns the path of the decoder graph"]
    pub fn decoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_files.decoder)
    }

    /// Check value ranges and, unless `skip_validation` is set, artifact presence
    pub fn validate(&self) -> Result<()> {
        if self.max_length == 0 {
            return Err(Florence2Error::config("max_length must be at least 1"));
        }
        if self.intra_threads == 0 {
            return Err(Florence2Error::config("intra_threads must be at least 1"));
        }
        if self.decoder.num_heads == 0 || self.decoder.head_dim == 0 {
            return Err(Florence2Error::config(format!(
                "decoder geometry must be non-zero, got {:?}",
                self.decoder
            )));
        }
        if self.skip_validation {
            return Ok(());
        }

        for path in [
            self.vision_encoder_path(),
            self.embed_tokens_path(),
            self.encoder_path(),
            self.decoder_path(),
            self.metadata_dir.join(VOCAB_FILE),
            self.metadata_dir.join(MERGES_FILE),
        ] {
            if !path.exists() {
                return Err(Florence2Error::config(format!(
                    "Required artifact not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`Florence2Config`]
///
/// # Examples
///
/// ```no_run
/// use florence2::{Device, Florence2ConfigBuilder, ResizeMode};
///
/// # fn main() -> florence2::Result<()> {
/// let config = Florence2ConfigBuilder::new()
///     .model_dir("models/florence2-base/onnx")
///     .metadata_dir("models/florence2-base")
///     .device(Device::Cuda(0))
///     .resize_mode(ResizeMode::Pad)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Florence2ConfigBuilder {
    config: Florence2Config,
}

impl Florence2ConfigBuilder {
    /// Create a builder holding the default configuration
    #[inline]
    #[must_use = "returns a new builder with default settings"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory containing the four ONNX graphs
    #[inline]
    #[must_use = "returns the builder with the model directory configured"]
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    /// Set the tokenizer metadata directory
    #[inline]
    #[must_use = "returns the builder with the metadata directory configured"]
    pub fn metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.metadata_dir = dir.into();
        self
    }

    /// Override the graph file names
    #[inline]
    #[must_use = "returns the builder with model file names configured"]
    pub fn model_files(mut self, files: ModelFiles) -> Self {
        self.config.model_files = files;
        self
    }

    #[inline]
    #[must_use = "returns the builder with device configured"]
    pub const fn device(mut self, device: Device) -> Self {
        self.config.device = device;
        self
    }

    #[inline]
    #[must_use = "returns the builder with thread count configured"]
    pub const fn intra_threads(mut self, threads: usize) -> Self {
        self.config.intra_threads = threads;
        self
    }

    #[inline]
    #[must_use = "returns the builder with resize mode configured"]
    pub const fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.config.resize_mode = mode;
        self
    }

    #[inline]
    #[must_use = "returns the builder with generation cap configured"]
    pub const fn max_length(mut self, max_length: usize) -> Self {
        self.config.max_length = max_length;
        self
    }

    #[inline]
    #[must_use = "returns the builder with decoder geometry configured"]
    pub const fn decoder(mut self, geometry: DecoderGeometry) -> Self {
        self.config.decoder = geometry;
        self
    }

    /// Skip artifact existence checks in [`build`](Self::build)
    #[inline]
    #[must_use = "returns the builder with validation toggled"]
    pub const fn skip_validation(mut self, skip: bool) -> Self {
        self.config.skip_validation = skip;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<Florence2Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
