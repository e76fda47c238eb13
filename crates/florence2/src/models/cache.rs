// Attention cache for the merged decoder
//
// Per layer:  decoder.key, decoder.value  <- replaced after every step
//             encoder.key, encoder.value  <- produced on the first step, shared afterward
//
// Step 0 starts from zero-length placeholders [1, heads, 0, head_dim].
// `advance` consumes the previous cache, so only one step's cache is alive.

use crate::config::DecoderGeometry;
use crate::error::{Florence2Error, Result};
use crate::models::backend::{KvPair, PresentKv};
use ndarray::{ArrayD, IxDyn};
use std::sync::Arc;

/// Shared, immutable cache tensor
pub type CacheTensor = Arc<ArrayD<f32>>;

/// Cache entries of one decoder layer
#[derive(Debug, Clone)]
pub struct LayerCache {
    pub decoder_key: CacheTensor,
    pub decoder_value: CacheTensor,
    pub encoder_key: CacheTensor,
    pub encoder_value: CacheTensor,
}

/// Past key/values of every decoder layer
#[derive(Debug, Clone)]
pub struct KvCache {
    layers: Vec<LayerCache>,
    /// False until the first step's encoder entries are stored
    encoder_ready: bool,
}

impl KvCache {
    /// Zero-length placeholders for the first decoder step
    #[must_use = "returns the initial cache"]
    pub fn empty(geometry: DecoderGeometry) -> Self {
        let shape = IxDyn(&[1, geometry.num_heads, 0, geometry.head_dim]);
        let placeholder = || Arc::new(ArrayD::<f32>::zeros(shape.clone()));
        let layers = (0..geometry.num_layers)
            .map(|_| LayerCache {
                decoder_key: placeholder(),
                decoder_value: placeholder(),
                encoder_key: placeholder(),
                encoder_value: placeholder(),
            })
            .collect();
        Self {
            layers,
            encoder_ready: false,
        }
    }

    #[inline]
    #[must_use = "returns the per-layer entries"]
    pub fn layers(&self) -> &[LayerCache] {
        &self.layers
    }

    #[inline]
    #[must_use = "returns the number of layers"]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Number of tensors held: four per layer
    #[inline]
    #[must_use = "returns the number of cache tensors"]
    pub fn tensor_count(&self) -> usize {
        self.layers.len() * 4
    }

    /// Whether the cross-attention entries have been produced
    #[inline]
    #[must_use = "returns whether encoder entries are populated"]
    pub const fn encoder_ready(&self) -> bool {
        self.encoder_ready
    }

    /// Build the next step's cache from this step's `present.*` outputs
    ///
    /// Decoder entries always come from `present`. Encoder entries come from
    /// `present` until they have been stored once, then are shared with the
    /// previous cache. `self` is dropped on return.
    pub fn advance(self, present: PresentKv) -> Result<Self> {
        let num_layers = self.layers.len();
        if present.decoder.len() != num_layers {
            return Err(Florence2Error::inference(
                "Decoder",
                format!(
                    "expected {num_layers} present decoder entries, got {}",
                    present.decoder.len()
                ),
            ));
        }

        let encoder: Vec<(CacheTensor, CacheTensor)> = if self.encoder_ready {
            self.layers
                .iter()
                .map(|layer| (Arc::clone(&layer.encoder_key), Arc::clone(&layer.encoder_value)))
                .collect()
        } else {
            let entries = present.encoder.ok_or_else(|| {
                Florence2Error::inference("Decoder", "first step produced no present encoder entries")
            })?;
            if entries.len() != num_layers {
                return Err(Florence2Error::inference(
                    "Decoder",
                    format!(
                        "expected {num_layers} present encoder entries, got {}",
                        entries.len()
                    ),
                ));
            }
            entries
                .into_iter()
                .map(|KvPair { key, value }| (Arc::new(key), Arc::new(value)))
                .collect()
        };

        let layers = present
            .decoder
            .into_iter()
            .zip(encoder)
            .map(|(KvPair { key, value }, (encoder_key, encoder_value))| LayerCache {
                decoder_key: Arc::new(key),
                decoder_value: Arc::new(value),
                encoder_key,
                encoder_value,
            })
            .collect();

        Ok(Self {
            layers,
            encoder_ready: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> DecoderGeometry {
        DecoderGeometry {
            num_layers: 2,
            num_heads: 3,
            head_dim: 4,
        }
    }

    fn pair(seq: usize, fill: f32) -> KvPair {
        let shape = IxDyn(&[1, 3, seq, 4]);
        KvPair {
            key: ArrayD::from_elem(shape.clone(), fill),
            value: ArrayD::from_elem(shape, fill),
        }
    }

    #[test]
    fn test_empty_cache_has_zero_length_placeholders() {
        let cache = KvCache::empty(geometry());
        assert_eq!(cache.num_layers(), 2);
        assert_eq!(cache.tensor_count(), 8);
        assert!(!cache.encoder_ready());
        assert_eq!(cache.layers()[0].decoder_key.shape(), &[1, 3, 0, 4]);
        assert_eq!(cache.layers()[1].encoder_value.shape(), &[1, 3, 0, 4]);
    }

    #[test]
    fn test_encoder_entries_shared_after_first_step() {
        let cache = KvCache::empty(geometry());
        let cache = cache
            .advance(PresentKv {
                decoder: vec![pair(1, 1.0), pair(1, 1.0)],
                encoder: Some(vec![pair(5, 9.0), pair(5, 9.0)]),
            })
            .unwrap();
        assert!(cache.encoder_ready());
        let encoder_key = Arc::clone(&cache.layers()[0].encoder_key);

        // Later steps ignore any encoder output
        let cache = cache
            .advance(PresentKv {
                decoder: vec![pair(2, 2.0), pair(2, 2.0)],
                encoder: Some(vec![pair(5, 0.0), pair(5, 0.0)]),
            })
            .unwrap();
        assert!(Arc::ptr_eq(&cache.layers()[0].encoder_key, &encoder_key));
        assert_eq!(cache.layers()[0].decoder_key.shape(), &[1, 3, 2, 4]);
        assert_eq!(cache.tensor_count(), 8);
    }

    #[test]
    fn test_previous_decoder_entries_released() {
        let cache = KvCache::empty(geometry())
            .advance(PresentKv {
                decoder: vec![pair(1, 1.0), pair(1, 1.0)],
                encoder: Some(vec![pair(5, 9.0), pair(5, 9.0)]),
            })
            .unwrap();
        let old = Arc::downgrade(&cache.layers()[1].decoder_value);
        let cache = cache
            .advance(PresentKv {
                decoder: vec![pair(2, 2.0), pair(2, 2.0)],
                encoder: None,
            })
            .unwrap();
        assert!(old.upgrade().is_none());
        drop(cache);
    }

    #[test]
    fn test_layer_count_mismatch_is_inference_error() {
        let err = KvCache::empty(geometry())
            .advance(PresentKv {
                decoder: vec![pair(1, 1.0)],
                encoder: Some(vec![pair(5, 9.0)]),
            })
            .unwrap_err();
        assert!(err.is_inference_error());
    }

    #[test]
    fn test_first_step_requires_encoder_entries() {
        let err = KvCache::empty(geometry())
            .advance(PresentKv {
                decoder: vec![pair(1, 1.0), pair(1, 1.0)],
                encoder: None,
            })
            .unwrap_err();
        assert!(err.to_string().contains("encoder"));
    }
}
