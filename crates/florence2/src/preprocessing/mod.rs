//! Input preparation: image tensors and the fused multimodal sequence
//!
//! - [`ImagePreprocessor`]: RGB image -> `[1, 3, 768, 768]` ImageNet-normalized tensor
//! - [`MultimodalFusion`]: vision features + prompt embeddings -> encoder input and mask

pub mod fusion;
pub mod image;

pub use self::fusion::{FusedInput, MultimodalFusion};
pub use self::image::{canvas_size, ImagePreprocessor, ResizeMode, IMAGENET_MEAN, IMAGENET_STD, IMAGE_SIZE};
