//! Error types for the Florence-2 inference core
//!
//! All public APIs use the [`Result<T>`] alias which wraps [`Florence2Error`].
//!
//! # Examples
//!
//! ```no_run
//! use florence2::{Florence2Error, Florence2Pipeline, Florence2Config, TaskType, create_query};
//!
//! # async fn example() -> florence2::Result<()> {
//! let mut pipeline = Florence2Pipeline::create(Florence2Config::default()).await?;
//! let image = image::open("photo.jpg").map_err(|e| Florence2Error::PreprocessingError {
//!     reason: e.to_string(),
//! })?;
//!
//! match pipeline.process(&image, &create_query(TaskType::Caption)?) {
//!     Ok(result) => log::debug!("{result:?}"),
//!     Err(Florence2Error::InferenceError { model_name, .. }) => {
//!         log::warn!("Inference failed for {model_name}");
//!     }
//!     Err(e) => log::warn!("Other error: {e}"),
//! }
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

/// Boxed error carried by model loading and inference failures.
pub type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while loading or running the Florence-2 pipeline
///
/// # Error Categories
///
/// - **Configuration errors** ([`ConfigError`]): missing artifacts, unsupported task
///   output combinations, batch sizes other than one
/// - **Argument errors** ([`ArgumentError`]): empty prompts, task/argument mismatches
/// - **Model errors** ([`ModelLoadError`], [`InferenceError`]): ONNX Runtime failures or
///   graphs that do not produce the expected outputs
/// - **Preprocessing errors** ([`PreprocessingError`]): image decoding problems
/// - **Cancellation** ([`Cancelled`]): generation aborted by the caller
///
/// [`ConfigError`]: Florence2Error::ConfigError
/// [`ArgumentError`]: Florence2Error::ArgumentError
/// [`ModelLoadError`]: Florence2Error::ModelLoadError
/// [`InferenceError`]: Florence2Error::InferenceError
/// [`PreprocessingError`]: Florence2Error::PreprocessingError
/// [`Cancelled`]: Florence2Error::Cancelled
#[derive(Debug, Error)]
pub enum Florence2Error {
    /// A model graph failed to load
    ///
    /// Common causes:
    /// - Model file not found in the model directory
    /// - Corrupted or incompatible ONNX file
    /// - Execution provider not available
    #[error("Failed to load {model_name} model: {source}")]
    ModelLoadError {
        /// Name of the graph (e.g. "`VisionEncoder`", "`Decoder`")
        model_name: String,
        /// The underlying error
        source: BoxedSource,
    },

    /// A model graph failed while running
    #[error("Inference failed for {model_name}: {source}")]
    InferenceError {
        /// Name of the graph that failed
        model_name: String,
        /// The underlying error
        source: BoxedSource,
    },

    /// Image preprocessing failed
    #[error("Image preprocessing failed: {reason}")]
    PreprocessingError {
        /// Description of what went wrong
        reason: String,
    },

    /// Invalid configuration or missing artifacts
    #[error("Invalid configuration: {reason}")]
    ConfigError {
        /// Description of what is invalid
        reason: String,
    },

    /// A query or call argument does not satisfy the task requirements
    #[error("Invalid argument: {reason}")]
    ArgumentError {
        /// Description of the offending argument
        reason: String,
    },

    /// Generation was cancelled through its cancel flag
    #[error("Generation cancelled after {step} decode steps")]
    Cancelled {
        /// Number of completed decode steps
        step: usize,
    },

    /// IO error (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Florence2Error {
    /// Build a [`Florence2Error::ConfigError`] from anything displayable.
    #[inline]
    pub fn config(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Build a [`Florence2Error::ArgumentError`] from anything displayable.
    #[inline]
    pub fn argument(reason: impl Into<String>) -> Self {
        Self::ArgumentError {
            reason: reason.into(),
        }
    }

    /// Build a [`Florence2Error::InferenceError`] for `model_name`.
    #[inline]
    pub fn inference(model_name: &str, source: impl Into<BoxedSource>) -> Self {
        Self::InferenceError {
            model_name: model_name.to_string(),
            source: source.into(),
        }
    }

    /// Build a [`Florence2Error::ModelLoadError`] for `model_name`.
    #[inline]
    pub fn model_load(model_name: &str, source: impl Into<BoxedSource>) -> Self {
        Self::ModelLoadError {
            model_name: model_name.to_string(),
            source: source.into(),
        }
    }

    /// Returns true if this error is a configuration error (user-fixable)
    #[inline]
    #[must_use = "this method returns a boolean, not modifying the error"]
    pub const fn is_config_error(&self) -> bool {
        matches!(self, Self::ConfigError { .. })
    }

    /// Returns true if this error is an argument error
    #[inline]
    #[must_use = "this method returns a boolean, not modifying the error"]
    pub const fn is_argument_error(&self) -> bool {
        matches!(self, Self::ArgumentError { .. })
    }

    /// Returns true if this error is a model loading error
    #[inline]
    #[must_use = "this method returns a boolean, not modifying the error"]
    pub const fn is_model_load_error(&self) -> bool {
        matches!(self, Self::ModelLoadError { .. })
    }

    /// Returns true if this error occurred during inference
    #[inline]
    #[must_use = "this method returns a boolean, not modifying the error"]
    pub const fn is_inference_error(&self) -> bool {
        matches!(self, Self::InferenceError { .. })
    }

    /// Returns true if generation was cancelled
    #[inline]
    #[must_use = "this method returns a boolean, not modifying the error"]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

impl From<serde_json::Error> for Florence2Error {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::ConfigError {
            reason: format!("JSON error: {err}"),
        }
    }
}

/// Type alias for Result with [`Florence2Error`]
pub type Result<T> = std::result::Result<T, Florence2Error>;
