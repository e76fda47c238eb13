//! Scripted stand-in for the four Florence-2 graphs
//!
//! The decoder emits the ids of `script` in order, then `fallback` forever.
//! Every decoder step is recorded in the shared [`MockLog`].

use florence2::config::DecoderGeometry;
use florence2::models::{
    CacheTensor, DecoderStepInput, DecoderStepOutput, Florence2Backend, KvPair, PresentKv,
};
use florence2::Result;
use ndarray::{Array3, ArrayD, ArrayView2, ArrayView3, ArrayView4, IxDyn};
use std::sync::{Arc, Mutex, Weak};

pub const HIDDEN: usize = 4;
pub const VISION_TOKENS: usize = 3;

/// What the mock saw on one decoder step
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub use_cache_branch: bool,
    pub cache_tensor_count: usize,
    /// Past self-attention length on input
    pub past_len: usize,
    pub encoder_seq: usize,
    /// Weak handles to every cache tensor handed in on this step
    pub decoder_tensors: Vec<Weak<ArrayD<f32>>>,
    pub encoder_tensors: Vec<Weak<ArrayD<f32>>>,
}

#[derive(Debug, Default)]
pub struct MockLog {
    pub steps: Vec<StepRecord>,
    pub embedded: Vec<Vec<i64>>,
    pub vision_calls: usize,
    pub encoder_calls: usize,
}

pub struct MockBackend {
    pub geometry: DecoderGeometry,
    pub vocab_size: usize,
    pub script: Vec<i64>,
    pub fallback: i64,
    pub log: Arc<Mutex<MockLog>>,
}

impl MockBackend {
    pub fn new(script: Vec<i64>, fallback: i64, vocab_size: usize) -> Self {
        Self {
            geometry: DecoderGeometry {
                num_layers: 2,
                num_heads: 2,
                head_dim: 3,
            },
            vocab_size,
            script,
            fallback,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    pub fn log_handle(&self) -> Arc<Mutex<MockLog>> {
        Arc::clone(&self.log)
    }

    fn kv(&self, seq: usize, fill: f32) -> KvPair {
        let shape = IxDyn(&[1, self.geometry.num_heads, seq, self.geometry.head_dim]);
        KvPair {
            key: ArrayD::from_elem(shape.clone(), fill),
            value: ArrayD::from_elem(shape, fill),
        }
    }
}

fn weak(tensor: &CacheTensor) -> Weak<ArrayD<f32>> {
    Arc::downgrade(tensor)
}

impl Florence2Backend for MockBackend {
    fn run_vision_encoder(&mut self, pixel_values: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
        assert_eq!(pixel_values.dim().1, 3);
        self.log.lock().unwrap().vision_calls += 1;
        Ok(Array3::from_elem((1, VISION_TOKENS, HIDDEN), 1.0))
    }

    fn embed_tokens(&mut self, input_ids: ArrayView2<'_, i64>) -> Result<Array3<f32>> {
        let ids: Vec<i64> = input_ids.iter().copied().collect();
        let mut embeds = Array3::zeros((1, ids.len(), HIDDEN));
        for (pos, &id) in ids.iter().enumerate() {
            embeds[[0, pos, 0]] = id as f32;
        }
        self.log.lock().unwrap().embedded.push(ids);
        Ok(embeds)
    }

    fn run_encoder(
        &mut self,
        inputs_embeds: ArrayView3<'_, f32>,
        attention_mask: ArrayView2<'_, i64>,
    ) -> Result<Array3<f32>> {
        assert_eq!(inputs_embeds.dim().1, attention_mask.ncols());
        self.log.lock().unwrap().encoder_calls += 1;
        Ok(inputs_embeds.to_owned())
    }

    fn run_decoder_step(&mut self, input: DecoderStepInput<'_>) -> Result<DecoderStepOutput> {
        let layers = input.cache.layers();
        let past_len = layers[0].decoder_key.shape()[2];
        let encoder_seq = input.encoder_hidden_states.dim().1;

        let mut log = self.log.lock().unwrap();
        let step = log.steps.len();
        log.steps.push(StepRecord {
            use_cache_branch: input.use_cache_branch,
            cache_tensor_count: input.cache.tensor_count(),
            past_len,
            encoder_seq,
            decoder_tensors: layers
                .iter()
                .flat_map(|l| [weak(&l.decoder_key), weak(&l.decoder_value)])
                .collect(),
            encoder_tensors: layers
                .iter()
                .flat_map(|l| [weak(&l.encoder_key), weak(&l.encoder_value)])
                .collect(),
        });
        drop(log);

        let next = self.script.get(step).copied().unwrap_or(self.fallback);
        let mut logits = Array3::<f32>::zeros((1, 1, self.vocab_size));
        logits[[0, 0, next as usize]] = 1.0;

        let num_layers = self.geometry.num_layers;
        let decoder = (0..num_layers).map(|_| self.kv(past_len + 1, step as f32)).collect();
        let encoder = Some((0..num_layers).map(|_| self.kv(encoder_seq, -1.0)).collect());

        Ok(DecoderStepOutput {
            logits,
            present: PresentKv { decoder, encoder },
        })
    }

    fn geometry(&self) -> DecoderGeometry {
        self.geometry
    }
}
