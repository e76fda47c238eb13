//! # florence2 - Florence-2 vision-language inference on ONNX Runtime
//!
//! Runs the Florence-2 encoder-decoder model as four ONNX graphs (vision
//! encoder, token embedder, fusion encoder, merged decoder) and turns its
//! output into structured results: captions, OCR text, labelled boxes,
//! quadrilaterals and polygons.
//!
//! ## Features
//!
//! - **Tokenizer**: byte-level BPE compatible with the BART vocabulary and
//!   Florence-2's `<loc_N>` location tokens
//! - **Greedy decoding** with a past key/value cache, length cap and cancellation
//! - **15 tasks** described by one table ([`tasks::TASK_TABLE`]) used both to
//!   build prompts and to parse outputs
//! - **Execution providers**: CPU, CUDA (`cuda` feature) and CoreML (`coreml` feature)
//!
//! ## Quick Start
//!
//! ```no_run
//! use florence2::{create_query, Florence2ConfigBuilder, Florence2Pipeline, TaskType};
//!
//! # async fn run() -> florence2::Result<()> {
//! let config = Florence2ConfigBuilder::new()
//!     .model_dir("models/florence2-base/onnx")
//!     .metadata_dir("models/florence2-base")
//!     .build()?;
//! let mut pipeline = Florence2Pipeline::create(config).await?;
//!
//! let result = pipeline.process_path("photo.jpg", &create_query(TaskType::ObjectDetection)?)?;
//! for (label, rect) in result.labels().iter().zip(result.boxes()) {
//!     println!("{label}: {rect:?}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Model artifacts
//!
//! | Directory | Files |
//! |---|---|
//! | `model_dir` | `vision_encoder.onnx`, `embed_tokens.onnx`, `encoder_model.onnx`, `decoder_model_merged.onnx` |
//! | `metadata_dir` | `vocab.json`, `merges.txt`, `added_tokens.json` (optional) |

pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod postprocess;
pub mod preprocessing;
pub mod tasks;
pub mod tokenizer;

pub use config::{Device, DecoderGeometry, Florence2Config, Florence2ConfigBuilder, ModelFiles};
pub use error::{Florence2Error, Result};
pub use models::{CancelFlag, Florence2Backend, GenerationOptions, OnnxBackend};
pub use pipeline::{Florence2Pipeline, PipelineProfiling};
pub use postprocess::{parse_output, Florence2Result};
pub use preprocessing::{canvas_size, ImagePreprocessor, MultimodalFusion, ResizeMode};
pub use tasks::{
    create_query, create_query_with_region, create_query_with_text, tokens_to_coordinates,
    Florence2Query, NormalizedRect, PointF, RectF, TaskType,
};
pub use tokenizer::BartTokenizer;
