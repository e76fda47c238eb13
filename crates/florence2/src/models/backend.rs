// Backend seam between the decode loop and the four inference graphs
//
// Every method takes views and returns caller-owned arrays: nothing returned by
// a backend may borrow from an inference session.

use crate::config::DecoderGeometry;
use crate::error::Result;
use crate::models::cache::KvCache;
use ndarray::{Array3, ArrayD, ArrayView2, ArrayView3, ArrayView4};

/// Key and value tensors of one attention block, `[1, heads, seq, head_dim]`
#[derive(Debug, Clone, PartialEq)]
pub struct KvPair {
    pub key: ArrayD<f32>,
    pub value: ArrayD<f32>,
}

/// `present.*` outputs of one decoder step
#[derive(Debug, Clone, PartialEq)]
pub struct PresentKv {
    /// Self-attention entries, one per layer
    pub decoder: Vec<KvPair>,
    /// Cross-attention entries, one per layer; only needed from the first step
    pub encoder: Option<Vec<KvPair>>,
}

/// Inputs of one decoder step
#[derive(Debug, Clone, Copy)]
pub struct DecoderStepInput<'a> {
    /// Embedding of the current token, `[1, 1, D]`
    pub inputs_embeds: ArrayView3<'a, f32>,
    /// `[1, S, D]`
    pub encoder_hidden_states: ArrayView3<'a, f32>,
    /// `[1, S]`
    pub encoder_attention_mask: ArrayView2<'a, i64>,
    /// False on the first step, true afterward
    pub use_cache_branch: bool,
    pub cache: &'a KvCache,
}

/// Outputs of one decoder step
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderStepOutput {
    /// `[1, seq, vocab]`
    pub logits: Array3<f32>,
    pub present: PresentKv,
}

/// The four Florence-2 graphs
///
/// Implementations must copy every output into owned storage before
/// returning.
pub trait Florence2Backend: Send {
    /// `pixel_values [1, 3, H, W]` -> `image_features [1, Nv, D]`
    fn run_vision_encoder(&mut self, pixel_values: ArrayView4<'_, f32>) -> Result<Array3<f32>>;

    /// `input_ids [1, N]` -> `inputs_embeds [1, N, D]`
    fn embed_tokens(&mut self, input_ids: ArrayView2<'_, i64>) -> Result<Array3<f32>>;

    /// `inputs_embeds [1, S, D]`, `attention_mask [1, S]` -> `last_hidden_state [1, S, D]`
    fn run_encoder(
        &mut self,
        inputs_embeds: ArrayView3<'_, f32>,
        attention_mask: ArrayView2<'_, i64>,
    ) -> Result<Array3<f32>>;

    /// One step of the merged decoder
    fn run_decoder_step(&mut self, input: DecoderStepInput<'_>) -> Result<DecoderStepOutput>;

    /// Decoder geometry, with `num_layers` as the graph declares it
    fn geometry(&self) -> DecoderGeometry;
}
