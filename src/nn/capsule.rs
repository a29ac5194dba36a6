// Capsule layer with dynamic routing-by-agreement.
//
// Every timestep casts a vote for each capsule through one shared kernel.
// Routing logits start at zero; each iteration softmaxes them over capsules,
// sums the weighted votes over time and squashes the result. Between
// iterations the logits are replaced by the agreement (dot product) between
// each vote and its capsule's current output.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, Axis};

use super::softmax;
use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

pub const SQUASH_EPSILON: f32 = 1e-7;

/// `v = s / sqrt(|s|^2 + eps)`. Keeps direction; the norm is always < 1.
pub fn squash(v: ArrayView1<f32>) -> Array1<f32> {
    let squared_norm: f32 = v.iter().map(|x| x * x).sum();
    let scale = (squared_norm + SQUASH_EPSILON).sqrt();
    v.mapv(|x| x / scale)
}

#[derive(Debug, Clone)]
pub struct CapsuleLayer {
    /// Shared vote kernel, (input features, num_capsules * capsule_dim).
    kernel: Array2<f32>,
    num_capsules: usize,
    capsule_dim: usize,
    routings: usize,
}

impl CapsuleLayer {
    pub fn new(
        kernel: Array2<f32>,
        num_capsules: usize,
        capsule_dim: usize,
        routings: usize,
    ) -> EngineResult<Self> {
        if kernel.ncols() != num_capsules * capsule_dim {
            return Err(EngineError::startup(format!(
                "capsule kernel has {} columns, expected {num_capsules} x {capsule_dim}",
                kernel.ncols()
            )));
        }
        if routings == 0 {
            return Err(EngineError::startup("capsule routing needs at least one iteration"));
        }
        Ok(Self {
            kernel,
            num_capsules,
            capsule_dim,
            routings,
        })
    }

    pub fn from_store(
        store: &WeightStore,
        input_features: usize,
        num_capsules: usize,
        capsule_dim: usize,
        routings: usize,
    ) -> EngineResult<Self> {
        let kernel = store.matrix("caps_layer.W", input_features, num_capsules * capsule_dim)?;
        Self::new(kernel, num_capsules, capsule_dim, routings)
    }

    /// Flattened output width.
    pub fn output_size(&self) -> usize {
        self.num_capsules * self.capsule_dim
    }

    /// Pose vectors for every sequence, shape (batch, capsules, dim).
    pub fn forward(&self, x: &Array3<f32>) -> Array3<f32> {
        let (batch, steps, _) = x.dim();
        let (n, d) = (self.num_capsules, self.capsule_dim);
        let mut poses = Array3::zeros((batch, n, d));

        for (sequence, mut out) in x.axis_iter(Axis(0)).zip(poses.outer_iter_mut()) {
            // Row t holds timestep t's votes; capsule k owns columns k*d..(k+1)*d.
            let votes = sequence.dot(&self.kernel);
            let vote = |t: usize, k: usize| votes.slice(s![t, k * d..(k + 1) * d]);

            let mut logits = Array2::<f32>::zeros((n, steps));
            let mut coupling = Array2::<f32>::zeros((n, steps));

            for iteration in 0..self.routings {
                for t in 0..steps {
                    coupling.column_mut(t).assign(&softmax(logits.column(t)));
                }

                for k in 0..n {
                    let mut total = Array1::<f32>::zeros(d);
                    for t in 0..steps {
                        total.scaled_add(coupling[[k, t]], &vote(t, k));
                    }
                    out.row_mut(k).assign(&squash(total.view()));
                }

                if iteration + 1 < self.routings {
                    for k in 0..n {
                        for t in 0..steps {
                            logits[[k, t]] = out.row(k).dot(&vote(t, k));
                        }
                    }
                }
            }
        }

        poses
    }

    /// Pose vectors flattened to (batch, capsules * dim).
    pub fn forward_flat(&self, x: &Array3<f32>) -> Array2<f32> {
        let poses = self.forward(x);
        let d = self.capsule_dim;
        Array2::from_shape_fn((poses.dim().0, self.output_size()), |(b, i)| {
            poses[[b, i / d, i % d]]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array};

    #[test]
    fn test_squash_norm_below_one() {
        for v in [array![1e-3f32, 0.0, 0.0], array![0.1f32, 0.2, 0.0], array![0.01f32, -0.02, 0.03]] {
            let out = squash(v.view());
            let norm = out.dot(&out).sqrt();
            assert!(norm < 1.0, "norm {norm} for {v:?}");
        }
    }

    #[test]
    fn test_squash_large_vectors_never_exceed_one() {
        // Past |s| ~ 1 the epsilon is below f32 resolution, so the norm can
        // round to exactly 1.0, but never above it.
        for v in [array![3.0f32, 4.0], array![1e6f32, -1e6]] {
            let out = squash(v.view());
            assert!(out.dot(&out).sqrt() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_squash_preserves_direction() {
        let out = squash(array![3.0f32, 4.0].view());
        assert!((out[0] / out[1] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_squash_zero_vector() {
        let out = squash(Array1::zeros(3).view());
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_output_shape_and_bounded_norms() {
        let kernel = Array::from_shape_fn((4, 6), |(i, j)| ((i * 6 + j) as f32 * 0.37).sin());
        let layer = CapsuleLayer::new(kernel, 3, 2, 4).unwrap();
        let x = Array::from_shape_fn((2, 7, 4), |(b, t, f)| ((b + 2 * t + 3 * f) as f32 * 0.11).cos());

        let poses = layer.forward(&x);
        assert_eq!(poses.dim(), (2, 3, 2));
        for pose in poses.lanes(Axis(2)) {
            assert!(pose.dot(&pose).sqrt() <= 1.0 + 1e-6);
        }
        assert_eq!(layer.forward_flat(&x).dim(), (2, 6));
    }

    #[test]
    fn test_single_routing_is_uniform_average() {
        // With one iteration the coupling is uniform (1 / capsules), so the
        // pose is the squash of the summed votes scaled by 1 / n.
        let kernel = array![[1.0f32, 0.0, 0.0, 1.0]];
        let layer = CapsuleLayer::new(kernel, 2, 2, 1).unwrap();
        let x = array![[[1.0f32], [2.0]]];
        let poses = layer.forward(&x);

        let expected = squash(array![1.5f32, 0.0].view());
        assert!((poses[[0, 0, 0]] - expected[0]).abs() < 1e-6);
        assert!(poses[[0, 0, 1]].abs() < 1e-6);
    }

    /// Routing written out step by step: b = 0; repeat { c = softmax_k(b);
    /// o = squash(sum_t c * u); b = o . u } with the update skipped after the
    /// last iteration.
    fn reference_routing(x: &Array3<f32>, kernel: &Array2<f32>, n: usize, d: usize, routings: usize) -> Vec<f32> {
        let (batch, steps, features) = x.dim();
        let mut flat = Vec::with_capacity(batch * n * d);
        for b in 0..batch {
            let mut u = vec![vec![vec![0.0f32; d]; steps]; n];
            for k in 0..n {
                for t in 0..steps {
                    for j in 0..d {
                        u[k][t][j] = (0..features).map(|f| x[[b, t, f]] * kernel[[f, k * d + j]]).sum();
                    }
                }
            }

            let mut logits = vec![vec![0.0f32; steps]; n];
            let mut outputs = vec![vec![0.0f32; d]; n];
            let mut coupling = vec![vec![0.0f32; steps]; n];
            for r in 0..routings {
                for t in 0..steps {
                    let max = (0..n).map(|k| logits[k][t]).fold(f32::NEG_INFINITY, f32::max);
                    let total: f32 = (0..n).map(|k| (logits[k][t] - max).exp()).sum();
                    for k in 0..n {
                        coupling[k][t] = (logits[k][t] - max).exp() / total;
                    }
                }
                for k in 0..n {
                    let mut s = vec![0.0f32; d];
                    for t in 0..steps {
                        for j in 0..d {
                            s[j] += coupling[k][t] * u[k][t][j];
                        }
                    }
                    let norm: f32 = s.iter().map(|v| v * v).sum::<f32>() + SQUASH_EPSILON;
                    outputs[k] = s.iter().map(|v| v / norm.sqrt()).collect();
                }
                if r + 1 < routings {
                    for k in 0..n {
                        for t in 0..steps {
                            logits[k][t] = (0..d).map(|j| outputs[k][j] * u[k][t][j]).sum();
                        }
                    }
                }
            }
            flat.extend(outputs.into_iter().flatten());
        }
        flat
    }

    #[test]
    fn test_multi_iteration_routing_matches_step_by_step() {
        let kernel = Array::from_shape_fn((4, 6), |(i, j)| ((i * 6 + j) as f32 * 0.53).sin() * 1.7);
        let x = Array::from_shape_fn((2, 7, 4), |(b, t, f)| ((b * 5 + 3 * t + f) as f32 * 0.29).cos());

        for routings in [2, 3, 4] {
            let layer = CapsuleLayer::new(kernel.clone(), 3, 2, routings).unwrap();
            let got = layer.forward_flat(&x);
            let expected = reference_routing(&x, &kernel, 3, 2, routings);
            for (g, e) in got.iter().zip(&expected) {
                assert!((g - e).abs() < 1e-5, "routings {routings}: {g} vs {e}");
            }
        }
    }

    #[test]
    fn test_routing_iterations_change_poses() {
        let kernel = Array::from_shape_fn((4, 6), |(i, j)| ((i * 6 + j) as f32 * 0.53).sin() * 1.7);
        let x = Array::from_shape_fn((1, 7, 4), |(_, t, f)| ((3 * t + f) as f32 * 0.29).cos());
        let one = CapsuleLayer::new(kernel.clone(), 3, 2, 1).unwrap().forward_flat(&x);
        let four = CapsuleLayer::new(kernel, 3, 2, 4).unwrap().forward_flat(&x);
        assert!(one.iter().zip(four.iter()).any(|(a, b)| (a - b).abs() > 1e-4));
    }

    #[test]
    fn test_rejects_kernel_width_mismatch() {
        assert!(CapsuleLayer::new(Array2::zeros((4, 5)), 2, 2, 3).is_err());
        assert!(CapsuleLayer::new(Array2::zeros((4, 4)), 2, 2, 0).is_err());
    }
}
