// Per-category classifiers.
//
// One ToxicityModel is loaded per category. Both variants read the same
// EncodedBatch (unpadded token ids plus standardized lexical features) and
// return one probability per text, in input order.

use ndarray::{Array2, Axis};
use tracing::debug;

use super::config::{CapsuleConfig, ModelConfig, PoolingConfig};
use super::weights::WeightStore;
use crate::error::{EngineError, EngineResult};
use crate::nn::attention::AttentionPooling;
use crate::nn::capsule::CapsuleLayer;
use crate::nn::concat_columns;
use crate::nn::dropout::Mode;
use crate::nn::encoder::SequenceEncoder;
use crate::nn::head::{FusionHead, FusionInputs, PoolingHead};
use crate::nn::pooling::{last_timestep, max_over_time, mean_over_time, retained_start};
use crate::text::features::FEATURE_COUNT;
use crate::text::vocab::pad_sequence;

/// Model-ready form of a batch of texts.
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    /// Vocabulary ids per text, unpadded.
    pub token_ids: Vec<Vec<u32>>,
    /// Standardized lexical features per text.
    pub features: Vec<[f32; FEATURE_COUNT]>,
}

impl EncodedBatch {
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum ToxicityModel {
    CapsuleAttention(CapsuleAttentionNet),
    Pooling(PoolingNet),
}

impl ToxicityModel {
    pub fn from_store(store: &WeightStore, config: &ModelConfig) -> EngineResult<Self> {
        let model = match config {
            ModelConfig::CapsuleAttention(c) => {
                ToxicityModel::CapsuleAttention(CapsuleAttentionNet::from_store(store, c)?)
            }
            ModelConfig::Pooling(c) => ToxicityModel::Pooling(PoolingNet::from_store(store, c)?),
        };
        debug!(
            architecture = config.architecture(),
            tensors = store.len(),
            "model assembled"
        );
        Ok(model)
    }

    /// Rows in the embedding table. Vocabulary ids must stay below this.
    pub fn vocab_rows(&self) -> usize {
        match self {
            ToxicityModel::CapsuleAttention(net) => net.encoder.vocab_rows(),
            ToxicityModel::Pooling(net) => net.encoder.vocab_rows(),
        }
    }

    /// One probability in [0, 1] per text. An empty batch never reaches the encoder.
    pub fn probabilities(&self, batch: &EncodedBatch, mode: &mut Mode) -> Vec<f32> {
        if batch.is_empty() {
            return Vec::new();
        }
        match self {
            ToxicityModel::CapsuleAttention(net) => net.probabilities(batch, mode),
            ToxicityModel::Pooling(net) => net.probabilities(batch, mode),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapsuleAttentionNet {
    encoder: SequenceEncoder,
    capsule: CapsuleLayer,
    /// (encoder layer index, pooling) in concat order.
    attention: Vec<(usize, AttentionPooling)>,
    head: FusionHead,
    max_len: usize,
}

impl CapsuleAttentionNet {
    pub fn from_store(store: &WeightStore, config: &CapsuleConfig) -> EngineResult<Self> {
        if config.max_len == 0 {
            return Err(EngineError::startup("max_len must be at least 1"));
        }
        let encoder = SequenceEncoder::from_store(store, &config.encoder)?;
        let last = encoder.layer_count() - 1;
        let last_width = encoder
            .layer_width(last)
            .ok_or_else(|| EngineError::startup("encoder has no layers"))?;

        let capsule = CapsuleLayer::from_store(
            store,
            last_width,
            config.num_capsules,
            config.capsule_dim,
            config.routings,
        )?;

        let mut attention = Vec::with_capacity(config.attention_layers.len());
        for (i, &layer) in config.attention_layers.iter().enumerate() {
            let width = encoder.layer_width(layer).ok_or_else(|| {
                EngineError::startup(format!(
                    "attention {i} reads encoder layer {layer}, which does not exist"
                ))
            })?;
            let pooling =
                AttentionPooling::from_store(store, &format!("attention.{i}"), width, config.max_len)?;
            pooling.check_steps(config.max_len)?;
            attention.push((layer, pooling));
        }

        // attention outputs, relu(lincaps) scalar, mean + max of last layer, features
        let fused_width = attention.iter().map(|(_, a)| a.features()).sum::<usize>()
            + 1
            + 2 * last_width
            + FEATURE_COUNT;
        let head = FusionHead::from_store(
            store,
            capsule.output_size(),
            fused_width,
            config.hidden,
            config.dropout,
        )?;

        Ok(Self {
            encoder,
            capsule,
            attention,
            head,
            max_len: config.max_len,
        })
    }

    fn probabilities(&self, batch: &EncodedBatch, mode: &mut Mode) -> Vec<f32> {
        let rows = batch.len();
        let mut ids = Array2::<u32>::zeros((rows, self.max_len));
        for (mut row, tokens) in ids.outer_iter_mut().zip(&batch.token_ids) {
            for (slot, id) in row.iter_mut().zip(pad_sequence(tokens, self.max_len)) {
                *slot = id;
            }
        }

        let encoded = self.encoder.forward(ids.view(), mode);
        let Some(last) = encoded.last() else {
            return vec![0.0; rows];
        };

        let mut features = Array2::zeros((rows, FEATURE_COUNT));
        for (mut row, values) in features.outer_iter_mut().zip(&batch.features) {
            row.iter_mut().zip(values).for_each(|(slot, &v)| *slot = v);
        }

        let inputs = FusionInputs {
            attention: self
                .attention
                .iter()
                .map(|(layer, pooling)| pooling.forward(&encoded.layers[*layer]))
                .collect(),
            capsules: self.capsule.forward_flat(last),
            mean_pool: mean_over_time(last),
            max_pool: max_over_time(last),
            features,
        };
        self.head.forward(inputs, mode)
    }
}

#[derive(Debug, Clone)]
pub struct PoolingNet {
    encoder: SequenceEncoder,
    head: PoolingHead,
    bptt: usize,
    max_seq: usize,
}

impl PoolingNet {
    pub fn from_store(store: &WeightStore, config: &PoolingConfig) -> EngineResult<Self> {
        let encoder = SequenceEncoder::from_store(store, &config.encoder)?;
        let head = PoolingHead::from_store(store, &config.head_sizes, &config.head_dropouts)?;
        let last_width = encoder
            .layer_width(encoder.layer_count() - 1)
            .ok_or_else(|| EngineError::startup("encoder has no layers"))?;
        if head.in_features() != 3 * last_width {
            return Err(EngineError::startup(format!(
                "pooling head expects {} inputs, concat pooling of width {last_width} gives {}",
                head.in_features(),
                3 * last_width
            )));
        }
        Ok(Self {
            encoder,
            head,
            bptt: config.bptt,
            max_seq: config.max_seq,
        })
    }

    /// Texts run one at a time since sequences are not padded. Texts with no
    /// tokens score 0.0 without touching the encoder.
    fn probabilities(&self, batch: &EncodedBatch, mode: &mut Mode) -> Vec<f32> {
        batch
            .token_ids
            .iter()
            .map(|tokens| {
                if tokens.is_empty() {
                    return 0.0;
                }
                let ids = Array2::from_shape_fn((1, tokens.len()), |(_, t)| tokens[t]);
                let encoded = self.encoder.forward(ids.view(), mode);
                let Some(last) = encoded.last() else {
                    return 0.0;
                };
                let start = retained_start(tokens.len(), self.bptt, self.max_seq);
                let kept = last.slice_axis(Axis(1), (start..).into()).to_owned();

                let pooled = concat_columns(&[
                    last_timestep(&kept).view(),
                    max_over_time(&kept).view(),
                    mean_over_time(&kept).view(),
                ]);
                self.head.forward(pooled, mode).first().copied().unwrap_or(0.0)
            })
            .collect()
    }
}
