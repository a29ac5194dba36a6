// Additive attention pooling over timesteps.
//
// One learned weight per feature and one optional bias per timestep:
//   e_t = tanh(h_t . w + b_t),  a_t = exp(e_t) / (sum_t exp(e_t) + eps)
// The pooled vector is sum_t a_t h_t. No padding mask is applied: padded
// timesteps get a weight like any other step.

use ndarray::{Array1, Array2, Array3, Axis};

use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

/// Guards the normalization against a zero denominator.
pub const ATTENTION_EPSILON: f32 = 1e-10;

#[derive(Debug, Clone)]
pub struct AttentionPooling {
    weight: Array1<f32>,
    bias: Option<Array1<f32>>,
}

impl AttentionPooling {
    pub fn new(weight: Array1<f32>, bias: Option<Array1<f32>>) -> Self {
        Self { weight, bias }
    }

    /// Load `{prefix}.weight` (features) and, if present, `{prefix}.b` (steps).
    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        features: usize,
        steps: usize,
    ) -> EngineResult<Self> {
        let weight = store.vector(&format!("{prefix}.weight"), features)?;
        let bias = store.optional_vector(&format!("{prefix}.b"), steps)?;
        Ok(Self::new(weight, bias))
    }

    pub fn features(&self) -> usize {
        self.weight.len()
    }

    /// Check that the bias covers exactly `steps` timesteps.
    pub fn check_steps(&self, steps: usize) -> EngineResult<()> {
        match &self.bias {
            Some(b) if b.len() != steps => Err(EngineError::startup(format!(
                "attention bias covers {} steps, sequences have {steps}",
                b.len()
            ))),
            _ => Ok(()),
        }
    }

    /// Normalized attention weights, shape (batch, time).
    pub fn weights(&self, x: &Array3<f32>) -> Array2<f32> {
        let (batch, steps, _) = x.dim();
        let mut weights = Array2::zeros((batch, steps));

        for (sequence, mut row) in x.axis_iter(Axis(0)).zip(weights.outer_iter_mut()) {
            let mut scores = sequence.dot(&self.weight);
            if let Some(bias) = &self.bias {
                scores
                    .iter_mut()
                    .zip(bias.iter())
                    .for_each(|(s, b)| *s += b);
            }
            scores.mapv_inplace(|e| e.tanh().exp());
            let total = scores.sum() + ATTENTION_EPSILON;
            row.assign(&(scores / total));
        }

        weights
    }

    /// Attention-weighted sum over time, shape (batch, features).
    pub fn forward(&self, x: &Array3<f32>) -> Array2<f32> {
        let weights = self.weights(x);
        let (batch, _, features) = x.dim();
        let mut pooled = Array2::zeros((batch, features));

        for ((sequence, w), mut out) in x
            .axis_iter(Axis(0))
            .zip(weights.outer_iter())
            .zip(pooled.outer_iter_mut())
        {
            out.assign(&w.dot(&sequence));
        }

        pooled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_weights_sum_to_one() {
        let attention = AttentionPooling::new(array![0.3f32, -0.7, 1.1], Some(Array1::from_elem(5, 0.2)));
        let x = Array::from_shape_fn((3, 5, 3), |(b, t, f)| ((b * 7 + t * 3 + f) as f32).sin());
        let weights = attention.weights(&x);
        for row in weights.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-5, "weights sum to {}", row.sum());
            assert!(row.iter().all(|&w| w > 0.0));
        }
    }

    #[test]
    fn test_uniform_scores_give_mean() {
        // Zero weight vector: every step scores tanh(0) = 0, so pooling is the mean.
        let attention = AttentionPooling::new(Array1::zeros(2), None);
        let x = array![[[1.0f32, 2.0], [3.0, 4.0]]];
        let pooled = attention.forward(&x);
        assert!((pooled[[0, 0]] - 2.0).abs() < 1e-5);
        assert!((pooled[[0, 1]] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_bias_shifts_weight_toward_step() {
        let attention = AttentionPooling::new(Array1::zeros(1), Some(array![0.0f32, 3.0]));
        let x = array![[[0.0f32], [1.0]]];
        let weights = attention.weights(&x);
        assert!(weights[[0, 1]] > weights[[0, 0]]);
    }

    #[test]
    fn test_padding_steps_are_not_masked() {
        // A zero (padding) timestep still receives attention mass.
        let attention = AttentionPooling::new(array![1.0f32], None);
        let x = array![[[0.0f32], [2.0]]];
        let weights = attention.weights(&x);
        assert!(weights[[0, 0]] > 0.0);
    }

    #[test]
    fn test_check_steps() {
        let attention = AttentionPooling::new(Array1::zeros(2), Some(Array1::zeros(70)));
        assert!(attention.check_steps(70).is_ok());
        assert!(attention.check_steps(50).is_err());
    }
}
