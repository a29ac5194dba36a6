// Classifier heads.
//
// FusionHead turns the capsule, attention and pooled summaries of the fusion
// encoder into one sigmoid logit per row. PoolingHead is the stack of
// (batch-norm -> dropout -> linear) blocks used by the pooling variant; it
// ends in two logits.

use ndarray::{Array1, Array2, ArrayView2, Axis};

use super::dropout::{dropout, Mode};
use super::layers::{BatchNorm1d, Linear};
use super::{concat_columns, relu, sigmoid, softmax};
use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

/// Per-row summaries fed into the fusion head, all (batch, width).
#[derive(Debug, Clone)]
pub struct FusionInputs {
    pub attention: Vec<Array2<f32>>,
    pub capsules: Array2<f32>,
    pub mean_pool: Array2<f32>,
    pub max_pool: Array2<f32>,
    pub features: Array2<f32>,
}

#[derive(Debug, Clone)]
pub struct FusionHead {
    lincaps: Linear,
    linear: Linear,
    bn: BatchNorm1d,
    out: Linear,
    dropout: f32,
}

impl FusionHead {
    pub fn new(
        lincaps: Linear,
        linear: Linear,
        bn: BatchNorm1d,
        out: Linear,
        dropout: f32,
    ) -> EngineResult<Self> {
        if lincaps.out_features() != 1 || out.out_features() != 1 {
            return Err(EngineError::startup(
                "fusion head lincaps and out layers must produce a single value",
            ));
        }
        if linear.out_features() != bn.features() || bn.features() != out.in_features() {
            return Err(EngineError::startup(format!(
                "fusion head widths disagree: linear {} -> bn {} -> out {}",
                linear.out_features(),
                bn.features(),
                out.in_features()
            )));
        }
        Ok(Self {
            lincaps,
            linear,
            bn,
            out,
            dropout,
        })
    }

    /// Load `lincaps.*`, `linear.*`, `bn.*` and `out.*`.
    pub fn from_store(
        store: &WeightStore,
        capsule_width: usize,
        fused_width: usize,
        hidden: usize,
        dropout: f32,
    ) -> EngineResult<Self> {
        Self::new(
            Linear::from_store(store, "lincaps", capsule_width, 1)?,
            Linear::from_store(store, "linear", fused_width, hidden)?,
            BatchNorm1d::from_store(store, "bn", hidden)?,
            Linear::from_store(store, "out", hidden, 1)?,
            dropout,
        )
    }

    /// Width of the concatenated vector the dense layer expects.
    pub fn fused_width(&self) -> usize {
        self.linear.in_features()
    }

    pub fn capsule_width(&self) -> usize {
        self.lincaps.in_features()
    }

    /// Raw logits, one per row.
    pub fn logits(&self, inputs: FusionInputs, mode: &mut Mode) -> Array1<f32> {
        let caps = dropout(inputs.capsules, self.dropout, mode);
        let caps = self.lincaps.forward(&caps).mapv(relu);

        let mut parts: Vec<ArrayView2<f32>> = inputs.attention.iter().map(|a| a.view()).collect();
        parts.push(caps.view());
        parts.push(inputs.mean_pool.view());
        parts.push(inputs.max_pool.view());
        parts.push(inputs.features.view());
        let fused = concat_columns(&parts);

        let hidden = self.linear.forward(&fused).mapv(relu);
        let hidden = self.bn.forward(&hidden);
        let hidden = dropout(hidden, self.dropout, mode);
        self.out.forward(&hidden).index_axis_move(Axis(1), 0)
    }

    /// Sigmoid probabilities, one per row.
    pub fn forward(&self, inputs: FusionInputs, mode: &mut Mode) -> Vec<f32> {
        self.logits(inputs, mode).iter().map(|&z| sigmoid(z)).collect()
    }
}

/// batch-norm -> dropout -> linear.
#[derive(Debug, Clone)]
pub struct LinearBlock {
    bn: BatchNorm1d,
    lin: Linear,
    dropout: f32,
}

impl LinearBlock {
    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        in_features: usize,
        out_features: usize,
        dropout: f32,
    ) -> EngineResult<Self> {
        Ok(Self {
            bn: BatchNorm1d::from_store(store, &format!("{prefix}.bn"), in_features)?,
            lin: Linear::from_store(store, &format!("{prefix}.lin"), in_features, out_features)?,
            dropout,
        })
    }

    pub fn forward(&self, x: &Array2<f32>, mode: &mut Mode) -> Array2<f32> {
        let x = self.bn.forward(x);
        let x = dropout(x, self.dropout, mode);
        self.lin.forward(&x)
    }
}

#[derive(Debug, Clone)]
pub struct PoolingHead {
    blocks: Vec<LinearBlock>,
}

impl PoolingHead {
    /// Load `layers.{i}.bn.*` / `layers.{i}.lin.*` for consecutive pairs of
    /// `sizes`. `drops` holds one probability per block.
    pub fn from_store(store: &WeightStore, sizes: &[usize], drops: &[f32]) -> EngineResult<Self> {
        if sizes.len() < 2 || drops.len() != sizes.len() - 1 {
            return Err(EngineError::startup(format!(
                "pooling head needs n+1 layer sizes for n dropouts, got {} sizes and {} dropouts",
                sizes.len(),
                drops.len()
            )));
        }
        if sizes.last() != Some(&2) {
            return Err(EngineError::startup("pooling head must end in 2 logits"));
        }
        let blocks = sizes
            .windows(2)
            .zip(drops)
            .enumerate()
            .map(|(i, (pair, &p))| LinearBlock::from_store(store, &format!("layers.{i}"), pair[0], pair[1], p))
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn in_features(&self) -> usize {
        self.blocks.first().map(|b| b.bn.features()).unwrap_or(0)
    }

    /// Class logits, (batch, 2).
    pub fn logits(&self, x: Array2<f32>, mode: &mut Mode) -> Array2<f32> {
        let last = self.blocks.len() - 1;
        self.blocks.iter().enumerate().fold(x, |x, (i, block)| {
            let y = block.forward(&x, mode);
            if i < last {
                y.mapv(relu)
            } else {
                y
            }
        })
    }

    /// Probability of the positive class, one per row.
    pub fn forward(&self, x: Array2<f32>, mode: &mut Mode) -> Vec<f32> {
        self.logits(x, mode)
            .rows()
            .into_iter()
            .map(|row| softmax(row)[1])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn insert_identity_bn(store: &mut WeightStore, prefix: &str, n: usize) {
        store.insert_vector(format!("{prefix}.weight"), vec![1.0; n]);
        store.insert_vector(format!("{prefix}.bias"), vec![0.0; n]);
        store.insert_vector(format!("{prefix}.running_mean"), vec![0.0; n]);
        store.insert_vector(format!("{prefix}.running_var"), vec![1.0 - 1e-5; n]);
    }

    fn fusion_store() -> WeightStore {
        // capsules 2 wide, attention 1 + 1, mean 1, max 1, features 2 -> fused 7
        let mut store = WeightStore::default();
        store.insert_matrix("lincaps.weight", array![[1.0f32, 1.0]]);
        store.insert_vector("lincaps.bias", vec![0.0]);
        store.insert_matrix("linear.weight", Array2::from_elem((2, 7), 0.1));
        store.insert_vector("linear.bias", vec![0.0, 0.0]);
        insert_identity_bn(&mut store, "bn", 2);
        store.insert_matrix("out.weight", array![[1.0f32, -1.0]]);
        store.insert_vector("out.bias", vec![0.25]);
        store
    }

    fn inputs(rows: usize) -> FusionInputs {
        FusionInputs {
            attention: vec![Array2::from_elem((rows, 1), 0.5), Array2::from_elem((rows, 1), -0.5)],
            capsules: Array2::from_elem((rows, 2), 0.3),
            mean_pool: Array2::zeros((rows, 1)),
            max_pool: Array2::ones((rows, 1)),
            features: Array2::zeros((rows, 2)),
        }
    }

    #[test]
    fn test_fusion_head_symmetric_hidden_cancels() {
        // Both hidden units see the same input, so out = bias.
        let head = FusionHead::from_store(&fusion_store(), 2, 7, 2, 0.1).unwrap();
        let logits = head.logits(inputs(3), &mut Mode::Eval);
        assert_eq!(logits.len(), 3);
        for z in logits.iter() {
            assert!((z - 0.25).abs() < 1e-5);
        }
        let probs = head.forward(inputs(1), &mut Mode::Eval);
        assert!((probs[0] - sigmoid(0.25)).abs() < 1e-5);
    }

    #[test]
    fn test_fusion_head_rejects_bad_widths() {
        assert!(FusionHead::from_store(&fusion_store(), 2, 8, 2, 0.1).is_err());
        assert!(FusionHead::from_store(&fusion_store(), 3, 7, 2, 0.1).is_err());
    }

    fn pooling_store() -> WeightStore {
        let mut store = WeightStore::default();
        insert_identity_bn(&mut store, "layers.0.bn", 3);
        store.insert_matrix("layers.0.lin.weight", array![[1.0f32, 0.0, 0.0], [0.0, -1.0, 0.0]]);
        store.insert_vector("layers.0.lin.bias", vec![0.0, 0.0]);
        insert_identity_bn(&mut store, "layers.1.bn", 2);
        store.insert_matrix("layers.1.lin.weight", array![[0.0f32, 0.0], [1.0, 1.0]]);
        store.insert_vector("layers.1.lin.bias", vec![0.0, 0.0]);
        store
    }

    #[test]
    fn test_pooling_head_relu_between_blocks() {
        let head = PoolingHead::from_store(&pooling_store(), &[3, 2, 2], &[0.2, 0.1]).unwrap();
        assert_eq!(head.in_features(), 3);
        // first block -> [2, -1] -> relu [2, 0] -> logits [0, 2]
        let logits = head.logits(array![[2.0f32, 1.0, 5.0]], &mut Mode::Eval);
        assert!((logits[[0, 0]]).abs() < 1e-4);
        assert!((logits[[0, 1]] - 2.0).abs() < 1e-4);

        let probs = head.forward(array![[2.0f32, 1.0, 5.0]], &mut Mode::Eval);
        let expected = 2.0f32.exp() / (1.0 + 2.0f32.exp());
        assert!((probs[0] - expected).abs() < 1e-4);
    }

    #[test]
    fn test_pooling_head_rejects_mismatched_config() {
        assert!(PoolingHead::from_store(&pooling_store(), &[3, 2, 2], &[0.2]).is_err());
        assert!(PoolingHead::from_store(&pooling_store(), &[3, 2, 3], &[0.2, 0.1]).is_err());
    }
}
