// ONNX Runtime implementation of the four Florence-2 graphs
//
// Each run copies its outputs into owned ndarray storage before the session
// outputs are dropped.

use crate::config::{DecoderGeometry, Florence2Config};
use crate::error::{Florence2Error, Result};
use crate::models::backend::{
    DecoderStepInput, DecoderStepOutput, Florence2Backend, KvPair, PresentKv,
};
use crate::models::session::{input_names, load_session};
use ndarray::{arr1, Array3, ArrayD, ArrayView, ArrayView2, ArrayView3, ArrayView4, Dimension, Ix3, IxDyn};
use ort::session::{Session, SessionInputValue, SessionOutputs};
use ort::tensor::PrimitiveTensorElementType;
use ort::value::{TensorRef, Value, ValueType};
use std::borrow::Cow;

const VISION_ENCODER: &str = "VisionEncoder";
const EMBED_TOKENS: &str = "EmbedTokens";
const ENCODER: &str = "Encoder";
const DECODER: &str = "Decoder";

/// The four sessions of a loaded Florence-2 model
pub struct OnnxBackend {
    vision_encoder: Session,
    embed_tokens: Session,
    encoder: Session,
    decoder: Session,
    geometry: DecoderGeometry,
}

impl std::fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackend")
            .field("vision_encoder", &"<Session>")
            .field("embed_tokens", &"<Session>")
            .field("encoder", &"<Session>")
            .field("decoder", &"<Session>")
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl OnnxBackend {
    /// Load the four graphs named by `config` (blocking)
    pub fn load(config: &Florence2Config) -> Result<Self> {
        let device = config.device;
        let threads = config.intra_threads;
        Self::from_sessions(
            load_session(VISION_ENCODER, &config.vision_encoder_path(), device, threads)?,
            load_session(EMBED_TOKENS, &config.embed_tokens_path(), device, threads)?,
            load_session(ENCODER, &config.encoder_path(), device, threads)?,
            load_session(DECODER, &config.decoder_path(), device, threads)?,
            config.decoder,
        )
    }

    /// Wrap already-loaded sessions
    ///
    /// The layer count is read from the decoder's `past_key_values.*` inputs.
    /// Heads and head size are read from the static dims of
    /// `past_key_values.0.decoder.key`; dynamic dims fall back to `geometry`.
    pub fn from_sessions(
        vision_encoder: Session,
        embed_tokens: Session,
        encoder: Session,
        decoder: Session,
        geometry: DecoderGeometry,
    ) -> Result<Self> {
        let num_layers = count_decoder_layers(&input_names(&decoder));
        if num_layers == 0 {
            return Err(Florence2Error::model_load(
                DECODER,
                "decoder graph has no past_key_values.*.decoder.key inputs",
            ));
        }
        let (num_heads, head_dim) = decoder
            .inputs
            .iter()
            .find(|input| input.name == past_name(0, "decoder", "key"))
            .map_or((None, None), |input| match &input.input_type {
                ValueType::Tensor { shape, .. } => head_dims_from_shape(shape),
                _ => (None, None),
            });

        let discovered = DecoderGeometry {
            num_layers,
            num_heads: num_heads.unwrap_or(geometry.num_heads),
            head_dim: head_dim.unwrap_or(geometry.head_dim),
        };
        if discovered != geometry {
            log::debug!("Decoder declares {discovered:?} (configured {geometry:?})");
        }

        Ok(Self {
            vision_encoder,
            embed_tokens,
            encoder,
            decoder,
            geometry: discovered,
        })
    }
}

/// Number of decoder layers declared by `past_key_values.{i}.decoder.key` inputs
#[must_use = "returns the layer count"]
pub fn count_decoder_layers<S: AsRef<str>>(input_names: &[S]) -> usize {
    input_names
        .iter()
        .filter(|name| {
            let name = name.as_ref();
            name.starts_with("past_key_values.") && name.ends_with(".decoder.key")
        })
        .count()
}

/// `(num_heads, head_dim)` from a `[batch, heads, seq, head_dim]` cache input shape
///
/// Dynamic (non-positive) dims yield `None`.
#[must_use = "returns the static head dims, if any"]
pub fn head_dims_from_shape(shape: &[i64]) -> (Option<usize>, Option<usize>) {
    if shape.len() != 4 {
        return (None, None);
    }
    let fixed = |d: i64| (d > 0).then_some(d as usize);
    (fixed(shape[1]), fixed(shape[3]))
}

fn past_name(layer: usize, side: &str, kind: &str) -> String {
    format!("past_key_values.{layer}.{side}.{kind}")
}

fn present_name(layer: usize, side: &str, kind: &str) -> String {
    format!("present.{layer}.{side}.{kind}")
}

/// Copy a named f32 output into owned storage
fn extract_f32(outputs: &SessionOutputs<'_>, name: &str, model_name: &str) -> Result<ArrayD<f32>> {
    let value = outputs.get(name).ok_or_else(|| {
        Florence2Error::inference(model_name, format!("missing output '{name}'"))
    })?;
    let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| Florence2Error::inference(model_name, e))?;
    let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
    ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec())
        .map_err(|e| Florence2Error::inference(model_name, e))
}

fn extract_3d(outputs: &SessionOutputs<'_>, name: &str, model_name: &str) -> Result<Array3<f32>> {
    extract_f32(outputs, name, model_name)?
        .into_dimensionality::<Ix3>()
        .map_err(|e| {
            Florence2Error::inference(model_name, format!("output '{name}' is not 3-D: {e}"))
        })
}

/// Zero-copy decoder input borrowing `view`
fn borrowed_input<'v, T, D>(view: ArrayView<'v, T, D>, model_name: &str) -> Result<SessionInputValue<'v>>
where
    T: PrimitiveTensorElementType + std::fmt::Debug + Clone + 'static,
    D: Dimension + 'static,
{
    let value =
        TensorRef::from_array_view(view).map_err(|e| Florence2Error::inference(model_name, e))?;
    Ok(value.into())
}

impl Florence2Backend for OnnxBackend {
    fn run_vision_encoder(&mut self, pixel_values: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
        let pixel_values = pixel_values.as_standard_layout();
        let input = TensorRef::from_array_view(pixel_values.view())
            .map_err(|e| Florence2Error::inference(VISION_ENCODER, e))?;
        let outputs = self
            .vision_encoder
            .run(ort::inputs!["pixel_values" => input])
            .map_err(|e| Florence2Error::inference(VISION_ENCODER, e))?;
        extract_3d(&outputs, "image_features", VISION_ENCODER)
    }

    fn embed_tokens(&mut self, input_ids: ArrayView2<'_, i64>) -> Result<Array3<f32>> {
        let input_ids = input_ids.as_standard_layout();
        let input = TensorRef::from_array_view(input_ids.view())
            .map_err(|e| Florence2Error::inference(EMBED_TOKENS, e))?;
        let outputs = self
            .embed_tokens
            .run(ort::inputs!["input_ids" => input])
            .map_err(|e| Florence2Error::inference(EMBED_TOKENS, e))?;
        extract_3d(&outputs, "inputs_embeds", EMBED_TOKENS)
    }

    fn run_encoder(
        &mut self,
        inputs_embeds: ArrayView3<'_, f32>,
        attention_mask: ArrayView2<'_, i64>,
    ) -> Result<Array3<f32>> {
        let inputs_embeds = inputs_embeds.as_standard_layout();
        let attention_mask = attention_mask.as_standard_layout();
        let embeds = TensorRef::from_array_view(inputs_embeds.view())
            .map_err(|e| Florence2Error::inference(ENCODER, e))?;
        let mask = TensorRef::from_array_view(attention_mask.view())
            .map_err(|e| Florence2Error::inference(ENCODER, e))?;
        let outputs = self
            .encoder
            .run(ort::inputs![
                "inputs_embeds" => embeds,
                "attention_mask" => mask,
            ])
            .map_err(|e| Florence2Error::inference(ENCODER, e))?;
        extract_3d(&outputs, "last_hidden_state", ENCODER)
    }

    fn run_decoder_step(&mut self, input: DecoderStepInput<'_>) -> Result<DecoderStepOutput> {
        let num_layers = self.geometry.num_layers;
        let inputs_embeds = input.inputs_embeds.as_standard_layout();
        let encoder_hidden_states = input.encoder_hidden_states.as_standard_layout();
        let encoder_attention_mask = input.encoder_attention_mask.as_standard_layout();
        let use_cache_branch = Value::from_array(arr1(&[input.use_cache_branch]))
            .map_err(|e| Florence2Error::inference(DECODER, e))?;

        let mut inputs: Vec<(Cow<'static, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(4 + num_layers * 4);
        inputs.push(("inputs_embeds".into(), borrowed_input(inputs_embeds.view(), DECODER)?));
        inputs.push((
            "encoder_hidden_states".into(),
            borrowed_input(encoder_hidden_states.view(), DECODER)?,
        ));
        inputs.push((
            "encoder_attention_mask".into(),
            borrowed_input(encoder_attention_mask.view(), DECODER)?,
        ));
        inputs.push(("use_cache_branch".into(), use_cache_branch.into()));

        // Cache tensors are built in standard layout, so they are passed without copying
        for (layer, entry) in input.cache.layers().iter().enumerate() {
            for (side, kind, tensor) in [
                ("decoder", "key", &entry.decoder_key),
                ("decoder", "value", &entry.decoder_value),
                ("encoder", "key", &entry.encoder_key),
                ("encoder", "value", &entry.encoder_value),
            ] {
                inputs.push((
                    past_name(layer, side, kind).into(),
                    borrowed_input(tensor.view(), DECODER)?,
                ));
            }
        }

        let outputs = self
            .decoder
            .run(inputs)
            .map_err(|e| Florence2Error::inference(DECODER, e))?;

        let logits = extract_3d(&outputs, "logits", DECODER)?;
        let decoder = (0..num_layers)
            .map(|layer| {
                Ok(KvPair {
                    key: extract_f32(&outputs, &present_name(layer, "decoder", "key"), DECODER)?,
                    value: extract_f32(&outputs, &present_name(layer, "decoder", "value"), DECODER)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        // Cross-attention entries are only read once, from the first step
        let encoder = if input.use_cache_branch {
            None
        } else {
            Some(
                (0..num_layers)
                    .map(|layer| {
                        Ok(KvPair {
                            key: extract_f32(&outputs, &present_name(layer, "encoder", "key"), DECODER)?,
                            value: extract_f32(&outputs, &present_name(layer, "encoder", "value"), DECODER)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        };
        drop(outputs);

        Ok(DecoderStepOutput {
            logits,
            present: PresentKv { decoder, encoder },
        })
    }

    fn geometry(&self) -> DecoderGeometry {
        self.geometry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_decoder_layers() {
        let mut names = vec![
            "encoder_attention_mask".to_string(),
            "encoder_hidden_states".to_string(),
            "inputs_embeds".to_string(),
            "use_cache_branch".to_string(),
        ];
        for layer in 0..6 {
            for side in ["decoder", "encoder"] {
                for kind in ["key", "value"] {
                    names.push(past_name(layer, side, kind));
                }
            }
        }
        assert_eq!(count_decoder_layers(&names), 6);
        assert_eq!(count_decoder_layers(&["input_ids"]), 0);
    }

    #[test]
    fn test_head_dims_from_static_shape() {
        assert_eq!(head_dims_from_shape(&[-1, 16, -1, 64]), (Some(16), Some(64)));
        assert_eq!(head_dims_from_shape(&[-1, 12, -1, -1]), (Some(12), None));
        assert_eq!(head_dims_from_shape(&[-1, -1, -1, -1]), (None, None));
        assert_eq!(head_dims_from_shape(&[1, 12, 64]), (None, None));
    }

    #[test]
    fn test_io_names() {
        assert_eq!(past_name(3, "encoder", "value"), "past_key_values.3.encoder.value");
        assert_eq!(present_name(0, "decoder", "key"), "present.0.decoder.key");
    }

    #[test]
    #[ignore = "requires Florence-2 ONNX models"]
    fn test_load_real_models() {
        let config = crate::config::Florence2ConfigBuilder::new()
            .model_dir("models/florence2")
            .skip_validation(true)
            .build()
            .unwrap();
        if !config.decoder_path().exists() {
            eprintln!("Skipping test: {} not found", config.decoder_path().display());
            return;
        }
        let backend = OnnxBackend::load(&config).unwrap();
        assert_eq!(backend.geometry().num_layers, 6);
    }
}
