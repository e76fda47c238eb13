//! Model execution engine
//!
//! Florence-2 runs as four ONNX graphs:
//!
//! | Graph | Inputs | Output |
//! |---|---|---|
//! | vision encoder | `pixel_values` | `image_features` |
//! | token embedder | `input_ids` | `inputs_embeds` |
//! | fusion encoder | `inputs_embeds`, `attention_mask` | `last_hidden_state` |
//! | merged decoder | embeds, encoder states/mask, `use_cache_branch`, `past_key_values.*` | `logits`, `present.*` |
//!
//! The graphs sit behind [`Florence2Backend`] so the decode loop in
//! [`generation`] is independent of ONNX Runtime; [`OnnxBackend`] is the
//! production implementation.

pub mod backend;
pub mod cache;
pub mod generation;
pub mod onnx;
pub mod session;

pub use backend::{DecoderStepInput, DecoderStepOutput, Florence2Backend, KvPair, PresentKv};
pub use cache::{CacheTensor, KvCache, LayerCache};
pub use generation::{argmax, CancelFlag, GenerationOptions, GreedyDecoder};
pub use onnx::OnnxBackend;
