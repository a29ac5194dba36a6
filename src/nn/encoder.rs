// Embedding + stacked recurrent encoder.
//
// Layer l reads the embedded tokens (l = 0) or the previous layer's output.
// In training mode the AWD-style regularizers apply: embedding row dropout,
// locked dropout on the embedded input and between layers, and weight
// dropout on every hidden-to-hidden matrix. In eval mode all of them are the
// identity, and the per-layer outputs are exactly the raw outputs.

use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use super::dropout::{embedding_row_mask, locked_dropout, Mode};
use super::recurrent::{CellKind, RecurrentLayer};
use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

/// One recurrent layer in the stack. `hidden_size` is per direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub kind: CellKind,
    pub hidden_size: usize,
}

/// Dropout probabilities used in training mode. All zero means no regularization.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DropoutConfig {
    /// Whole vocabulary rows of the embedding.
    pub embedding: f32,
    /// Locked dropout on the embedded sequence.
    pub input: f32,
    /// Locked dropout between recurrent layers.
    pub hidden: f32,
    /// Weight dropout on hidden-to-hidden matrices.
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub embedding_dim: usize,
    pub bidirectional: bool,
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub dropout: DropoutConfig,
}

impl Default for EncoderConfig {
    /// Bidirectional LSTM then GRU over 300-wide embeddings, 60 units each way.
    fn default() -> Self {
        Self {
            embedding_dim: 300,
            bidirectional: true,
            layers: vec![
                LayerSpec {
                    kind: CellKind::Lstm,
                    hidden_size: 60,
                },
                LayerSpec {
                    kind: CellKind::Gru,
                    hidden_size: 60,
                },
            ],
            dropout: DropoutConfig::default(),
        }
    }
}

/// Per-layer hidden-state sequences, each (batch, time, layer width).
#[derive(Debug, Clone)]
pub struct EncoderOutput {
    pub layers: Vec<Array3<f32>>,
}

impl EncoderOutput {
    pub fn last(&self) -> Option<&Array3<f32>> {
        self.layers.last()
    }
}

#[derive(Debug, Clone)]
pub struct SequenceEncoder {
    /// Frozen embedding table, (vocabulary rows, embedding_dim).
    embedding: Array2<f32>,
    layers: Vec<RecurrentLayer>,
    dropout: DropoutConfig,
}

impl SequenceEncoder {
    pub fn new(
        embedding: Array2<f32>,
        layers: Vec<RecurrentLayer>,
        dropout: DropoutConfig,
    ) -> EngineResult<Self> {
        if layers.is_empty() {
            return Err(EngineError::startup("encoder needs at least one recurrent layer"));
        }
        let mut width = embedding.ncols();
        for (i, layer) in layers.iter().enumerate() {
            if layer.input_size() != width {
                return Err(EngineError::startup(format!(
                    "recurrent layer {i} expects input width {}, previous stage produces {width}",
                    layer.input_size()
                )));
            }
            width = layer.output_size();
        }
        Ok(Self {
            embedding,
            layers,
            dropout,
        })
    }

    /// Load `embedding.weight` and `rnns.{l}.*` for every layer in `config`.
    pub fn from_store(store: &WeightStore, config: &EncoderConfig) -> EngineResult<Self> {
        let embedding = store.matrix_any("embedding.weight")?;
        if embedding.ncols() != config.embedding_dim {
            return Err(EngineError::startup(format!(
                "embedding width {} does not match configured embedding_dim {}",
                embedding.ncols(),
                config.embedding_dim
            )));
        }

        let directions = if config.bidirectional { 2 } else { 1 };
        let mut input_size = config.embedding_dim;
        let mut layers = Vec::with_capacity(config.layers.len());
        for (index, layer_spec) in config.layers.iter().enumerate() {
            let layer = RecurrentLayer::from_store(
                store,
                index,
                layer_spec.kind,
                input_size,
                layer_spec.hidden_size,
                config.bidirectional,
            )?;
            input_size = layer_spec.hidden_size * directions;
            layers.push(layer);
        }

        Self::new(embedding, layers, config.dropout)
    }

    /// Rows in the embedding table; ids at or above this are unusable.
    pub fn vocab_rows(&self) -> usize {
        self.embedding.nrows()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Output width of layer `index`.
    pub fn layer_width(&self, index: usize) -> Option<usize> {
        self.layers.get(index).map(RecurrentLayer::output_size)
    }

    /// Look up embeddings for a (batch, time) id matrix. Out-of-range ids
    /// read the unknown row 0.
    pub fn embed(&self, ids: ArrayView2<u32>, mode: &mut Mode) -> Array3<f32> {
        let (batch, steps) = ids.dim();
        let rows = self.embedding.nrows();
        let mask = embedding_row_mask(rows, self.dropout.embedding, mode);
        let mut out = Array3::zeros((batch, steps, self.embedding.ncols()));

        for ((b, t), &id) in ids.indexed_iter() {
            let row = if (id as usize) < rows { id as usize } else { 0 };
            let mut target = out.slice_mut(s![b, t, ..]);
            target.assign(&self.embedding.row(row));
            if let Some(mask) = &mask {
                target *= mask[row];
            }
        }

        out
    }

    /// Encode a (batch, time) id matrix into per-layer hidden-state sequences.
    pub fn forward(&self, ids: ArrayView2<u32>, mode: &mut Mode) -> EncoderOutput {
        let embedded = self.embed(ids, mode);
        let embedded = locked_dropout(embedded, self.dropout.input, mode);

        let last = self.layers.len() - 1;
        let mut outputs: Vec<Array3<f32>> = Vec::with_capacity(self.layers.len());
        for (l, layer) in self.layers.iter().enumerate() {
            let input = outputs.last().unwrap_or(&embedded);
            let raw = layer.forward(input, self.dropout.weight, mode);
            let output = if l < last {
                locked_dropout(raw, self.dropout.hidden, mode)
            } else {
                raw
            };
            outputs.push(output);
        }

        EncoderOutput { layers: outputs }
    }
}
