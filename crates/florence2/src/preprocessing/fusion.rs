// Multimodal fusion: vision tokens first, then prompt tokens
//
// vision_features  [1, Nv, D] \
//                              -> inputs_embeds  [1, Nv + Nt, D]
// text_features    [1, Nt, D] /
// prompt_ids       [1, Nt]    -> attention_mask [1, Nv + Nt]  (vision: 1, text: 0 at <pad>)

use ndarray::{concatenate, Array2, Array3, ArrayView2, ArrayView3, Axis};

/// Fused encoder input
#[derive(Debug, Clone, PartialEq)]
pub struct FusedInput {
    /// `[1, Nv + Nt, D]`
    pub inputs_embeds: Array3<f32>,
    /// `[1, Nv + Nt]`
    pub attention_mask: Array2<i64>,
}

impl FusedInput {
    /// Total sequence length `Nv + Nt`
    #[inline]
    #[must_use = "returns the fused sequence length"]
    pub fn seq_len(&self) -> usize {
        self.attention_mask.ncols()
    }
}

/// Concatenates vision and text embeddings and builds the matching mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultimodalFusion {
    pad_id: i64,
}

impl MultimodalFusion {
    #[inline]
    #[must_use = "returns a new fusion stage"]
    pub const fn new(pad_id: i64) -> Self {
        Self { pad_id }
    }

    /// Fuse one image and one prompt
    ///
    /// # Panics
    ///
    /// On batch sizes other than one, a hidden-size mismatch between the two
    /// feature tensors, or a prompt id count that differs from the text length.
    /// These are wiring bugs, not input errors.
    #[must_use = "returns the fused encoder input"]
    pub fn process(
        &self,
        vision_features: ArrayView3<'_, f32>,
        text_features: ArrayView3<'_, f32>,
        prompt_ids: ArrayView2<'_, i64>,
    ) -> FusedInput {
        let (vb, nv, vd) = vision_features.dim();
        let (tb, nt, td) = text_features.dim();
        assert!(vb == 1 && tb == 1, "fusion expects batch size 1, got {vb} and {tb}");
        assert_eq!(vd, td, "vision hidden size {vd} != text hidden size {td}");
        assert_eq!(
            prompt_ids.dim(),
            (1, nt),
            "prompt ids shape {:?} does not match {nt} text positions",
            prompt_ids.dim()
        );

        let inputs_embeds = concatenate(Axis(1), &[vision_features.view(), text_features.view()])
            .unwrap_or_else(|e| panic!("concatenate checked shapes: {e}"));

        let mut attention_mask = Array2::<i64>::ones((1, nv + nt));
        for (pos, &id) in prompt_ids.iter().enumerate() {
            if id == self.pad_id {
                attention_mask[[0, nv + pos]] = 0;
            }
        }

        debug_assert_eq!(inputs_embeds.dim().1, attention_mask.ncols());
        FusedInput {
            inputs_embeds,
            attention_mask,
        }
    }
}
