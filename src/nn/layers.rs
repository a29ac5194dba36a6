// Dense and normalization layers shared by both classifier heads.

use ndarray::{Array1, Array2};

use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

/// Fully connected layer: `y = x W^T + b` with W stored as (out, in).
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Array2<f32>,
    bias: Array1<f32>,
}

impl Linear {
    pub fn new(weight: Array2<f32>, bias: Array1<f32>) -> EngineResult<Self> {
        if weight.nrows() != bias.len() {
            return Err(EngineError::startup(format!(
                "linear layer has {} output rows but {} biases",
                weight.nrows(),
                bias.len()
            )));
        }
        Ok(Self { weight, bias })
    }

    /// Load `{prefix}.weight` (out, in) and `{prefix}.bias` (out).
    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        in_features: usize,
        out_features: usize,
    ) -> EngineResult<Self> {
        let weight = store.matrix(&format!("{prefix}.weight"), out_features, in_features)?;
        let bias = store.vector(&format!("{prefix}.bias"), out_features)?;
        Self::new(weight, bias)
    }

    pub fn in_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn out_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weight.t()) + &self.bias
    }
}

/// Default epsilon for batch normalization.
pub const BATCH_NORM_EPSILON: f32 = 1e-5;

/// Batch normalization over features, always using the stored running
/// statistics. Output never depends on the other rows of the batch.
#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    weight: Array1<f32>,
    bias: Array1<f32>,
    running_mean: Array1<f32>,
    running_var: Array1<f32>,
    epsilon: f32,
}

impl BatchNorm1d {
    pub fn from_store(store: &WeightStore, prefix: &str, features: usize) -> EngineResult<Self> {
        let running_var = store.vector(&format!("{prefix}.running_var"), features)?;
        if running_var.iter().any(|&v| v < 0.0) {
            return Err(EngineError::startup(format!(
                "{prefix}.running_var contains negative variances"
            )));
        }
        Ok(Self {
            weight: store.vector(&format!("{prefix}.weight"), features)?,
            bias: store.vector(&format!("{prefix}.bias"), features)?,
            running_mean: store.vector(&format!("{prefix}.running_mean"), features)?,
            running_var,
            epsilon: BATCH_NORM_EPSILON,
        })
    }

    pub fn features(&self) -> usize {
        self.weight.len()
    }

    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        let std = (&self.running_var + self.epsilon).mapv(f32::sqrt);
        (x - &self.running_mean) / &std * &self.weight + &self.bias
    }
}
