// Per-category model configuration (`<category>/config.json`).
//
// The file is optional. Without it a category is a capsule-attention model
// with the stock hyperparameters below, which is what the exported
// artifacts use.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::nn::encoder::{DropoutConfig, EncoderConfig, LayerSpec};
use crate::nn::recurrent::CellKind;
use crate::text::tokenizer::TokenizerKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "architecture", rename_all = "snake_case")]
pub enum ModelConfig {
    CapsuleAttention(CapsuleConfig),
    Pooling(PoolingConfig),
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig::CapsuleAttention(CapsuleConfig::default())
    }
}

impl ModelConfig {
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| EngineError::startup(format!("invalid model config: {e}")))
    }

    /// Tokenizer the category's vocabulary was built with.
    pub fn tokenizer(&self) -> TokenizerKind {
        match self {
            ModelConfig::CapsuleAttention(c) => c.tokenizer,
            ModelConfig::Pooling(c) => c.tokenizer,
        }
    }

    pub fn architecture(&self) -> &'static str {
        match self {
            ModelConfig::CapsuleAttention(_) => "capsule_attention",
            ModelConfig::Pooling(_) => "pooling",
        }
    }
}

/// Embedding -> BiLSTM -> BiGRU with capsule routing, two attention poolings
/// and mean/max pooling fused into a single sigmoid output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapsuleConfig {
    pub encoder: EncoderConfig,
    /// Padded sequence length. Attention biases are sized to it.
    pub max_len: usize,
    pub num_capsules: usize,
    pub capsule_dim: usize,
    pub routings: usize,
    /// Encoder layers that get an attention pooling, in concat order.
    pub attention_layers: Vec<usize>,
    /// Width of the dense layer after fusion.
    pub hidden: usize,
    pub dropout: f32,
    pub tokenizer: TokenizerKind,
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderConfig::default(),
            max_len: 70,
            num_capsules: 5,
            capsule_dim: 5,
            routings: 4,
            attention_layers: vec![0, 1],
            hidden: 16,
            dropout: 0.1,
            tokenizer: TokenizerKind::Word,
        }
    }
}

/// ULMFiT-style classifier: unpadded LSTM stack, windowed over `bptt`
/// steps, concat pooling into a stack of linear blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolingConfig {
    pub encoder: EncoderConfig,
    pub bptt: usize,
    pub max_seq: usize,
    /// Head layer sizes; the first must be 3x the last encoder width.
    pub head_sizes: Vec<usize>,
    pub head_dropouts: Vec<f32>,
    pub tokenizer: TokenizerKind,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        let layer = |hidden_size| LayerSpec {
            kind: CellKind::Lstm,
            hidden_size,
        };
        Self {
            encoder: EncoderConfig {
                embedding_dim: 400,
                bidirectional: false,
                layers: vec![layer(1150), layer(1150), layer(400)],
                dropout: DropoutConfig {
                    embedding: 0.025,
                    input: 0.2,
                    hidden: 0.15,
                    weight: 0.25,
                },
            },
            bptt: 70,
            max_seq: 1400,
            head_sizes: vec![1200, 50, 2],
            head_dropouts: vec![0.2, 0.1],
            tokenizer: TokenizerKind::Rules,
        }
    }
}
