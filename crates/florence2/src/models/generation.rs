// Greedy autoregressive decoding over the merged decoder
//
// step 0:  token = </s> (decoder start), cache = zero-length placeholders, use_cache_branch = false
// step n:  token = argmax(logits[0, -1, :]), cache = present.* of step n-1, use_cache_branch = true
//
// Stops on </s> (not appended) or after `max_length` generated ids.

use crate::config::DEFAULT_MAX_LENGTH;
use crate::error::{Florence2Error, Result};
use crate::models::backend::{DecoderStepInput, DecoderStepOutput, Florence2Backend};
use crate::models::cache::KvCache;
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView3};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, checked once per decode step
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[inline]
    #[must_use = "returns a new, unset flag"]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; every clone observes it
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[inline]
    #[must_use = "returns whether cancellation was requested"]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-call generation settings
#[derive(Debug, Clone)]
pub struct GenerationOptions {
    /// Maximum number of generated ids
    pub max_length: usize,
    pub cancel: Option<CancelFlag>,
}

impl Default for GenerationOptions {
    #[inline]
    fn default() -> Self {
        Self {
            max_length: DEFAULT_MAX_LENGTH,
            cancel: None,
        }
    }
}

impl GenerationOptions {
    #[inline]
    #[must_use = "returns options with the given generation cap"]
    pub const fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            cancel: None,
        }
    }

    #[inline]
    #[must_use = "returns the options with a cancel flag attached"]
    pub fn cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelFlag::is_cancelled)
    }
}

/// Index of the largest value; the first maximum wins ties
///
/// Returns `None` for an empty slice.
#[must_use = "returns the index of the maximum"]
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best_idx = None;
    let mut best_val = f32::NEG_INFINITY;
    for (idx, &value) in values.iter().enumerate() {
        if best_idx.is_none() || value > best_val {
            best_idx = Some(idx);
            best_val = value;
        }
    }
    best_idx
}

/// Greedy decoder driving a [`Florence2Backend`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreedyDecoder {
    decoder_start_id: i64,
    eos_id: i64,
}

impl GreedyDecoder {
    /// `decoder_start_id` seeds step 0; `eos_id` ends generation
    ///
    /// For Florence-2 both are the `</s>` id.
    #[inline]
    #[must_use = "returns a new decoder"]
    pub const fn new(decoder_start_id: i64, eos_id: i64) -> Self {
        Self {
            decoder_start_id,
            eos_id,
        }
    }

    /// Generate ids from the encoder output
    ///
    /// Returns the generated ids without the start id and without the final
    /// `</s>`. The attention cache lives only inside this call.
    ///
    /// # Errors
    ///
    /// - [`Florence2Error::ConfigError`] for a batch size other than one
    /// - [`Florence2Error::Cancelled`] when the cancel flag is set
    /// - [`Florence2Error::InferenceError`] from the backend
    pub fn run_decoder<B: Florence2Backend + ?Sized>(
        &self,
        backend: &mut B,
        encoder_hidden_states: ArrayView3<'_, f32>,
        encoder_attention_mask: ArrayView2<'_, i64>,
        options: &GenerationOptions,
    ) -> Result<Vec<i64>> {
        let batch = encoder_hidden_states.dim().0;
        if batch != 1 || encoder_attention_mask.nrows() != 1 {
            return Err(Florence2Error::config(format!(
                "Batch size {batch} is not supported, only single-image batches"
            )));
        }

        let geometry = backend.geometry();
        let expected_tensors = geometry.num_layers * 4;
        let mut cache = KvCache::empty(geometry);
        let mut generated = Vec::new();
        let mut token = self.decoder_start_id;

        log::debug!(
            "Starting greedy generation (max_length={}, layers={}, encoder_seq={})",
            options.max_length,
            geometry.num_layers,
            encoder_hidden_states.dim().1
        );

        for step in 0..options.max_length {
            if options.is_cancelled() {
                log::debug!("Generation cancelled at step {step}");
                return Err(Florence2Error::Cancelled { step });
            }

            let input_ids = Array2::from_elem((1, 1), token);
            let inputs_embeds = backend.embed_tokens(input_ids.view())?;

            let DecoderStepOutput { logits, present } =
                backend.run_decoder_step(DecoderStepInput {
                    inputs_embeds: inputs_embeds.view(),
                    encoder_hidden_states: encoder_hidden_states.view(),
                    encoder_attention_mask: encoder_attention_mask.view(),
                    use_cache_branch: step > 0,
                    cache: &cache,
                })?;

            let next = last_position_argmax(&logits)?;
            cache = cache.advance(present)?;
            debug_assert_eq!(cache.tensor_count(), expected_tensors);

            log::trace!("Step {step}: generated token id {next}");

            if next == self.eos_id {
                log::debug!("Generated EOS after {step} tokens");
                break;
            }
            generated.push(next);
            token = next;
        }

        if generated.len() == options.max_length {
            log::debug!("Reached max length {}, stopping generation", options.max_length);
        }
        Ok(generated)
    }
}

fn last_position_argmax(logits: &Array3<f32>) -> Result<i64> {
    let (_, seq_len, vocab_size) = logits.dim();
    if seq_len == 0 || vocab_size == 0 {
        return Err(Florence2Error::inference(
            "Decoder",
            format!("empty logits of shape {:?}", logits.shape()),
        ));
    }
    let last = logits.slice(s![0, seq_len - 1, ..]);
    let best = match last.as_slice() {
        Some(row) => argmax(row),
        None => argmax(&last.to_vec()),
    };
    best.map(|idx| idx as i64).ok_or_else(|| {
        Florence2Error::inference("Decoder", "no valid token found in logits")
    })
}
