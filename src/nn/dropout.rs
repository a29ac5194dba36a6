// Dropout variants and the training/eval switch.
//
// The engine only ever runs in Mode::Eval, where every function here is the
// identity and allocates nothing new. Mode::Train carries the RNG that draws
// the masks, so the switch is explicit in every forward signature instead of
// living in hidden module state.

use std::borrow::Cow;

use ndarray::{Array1, Array2, Array3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Forward-pass mode. Dropout only fires in `Train`.
#[derive(Debug)]
pub enum Mode {
    Eval,
    Train(StdRng),
}

impl Mode {
    /// Training mode with a reproducible mask stream.
    pub fn train(seed: u64) -> Self {
        Mode::Train(StdRng::seed_from_u64(seed))
    }

    /// RNG to draw masks from, or None when dropout with `p` is a no-op.
    fn active_rng(&mut self, p: f32) -> Option<&mut StdRng> {
        match self {
            Mode::Train(rng) if p > 0.0 => Some(rng),
            _ => None,
        }
    }
}

/// Inverted-dropout mask: each entry kept with probability 1 - p and scaled
/// by 1 / (1 - p), so activations keep their expected value.
fn bernoulli_mask(rng: &mut StdRng, len: usize, p: f32) -> Array1<f32> {
    let keep = 1.0 - p;
    Array1::from_iter((0..len).map(|_| {
        if rng.random::<f32>() < keep {
            1.0 / keep
        } else {
            0.0
        }
    }))
}

/// Plain element-wise dropout on a (batch, feature) activation.
pub fn dropout(x: Array2<f32>, p: f32, mode: &mut Mode) -> Array2<f32> {
    let Some(rng) = mode.active_rng(p) else {
        return x;
    };
    let mask = bernoulli_mask(rng, x.len(), p);
    let mut x = x;
    x.iter_mut().zip(mask.iter()).for_each(|(v, m)| *v *= m);
    x
}

/// Locked (variational) dropout on a (batch, time, feature) sequence.
///
/// One mask per sequence and feature is drawn for the whole invocation and
/// reused at every timestep.
pub fn locked_dropout(x: Array3<f32>, p: f32, mode: &mut Mode) -> Array3<f32> {
    let Some(rng) = mode.active_rng(p) else {
        return x;
    };
    let (batch, _, features) = x.dim();
    let mut x = x;
    for b in 0..batch {
        let mask = bernoulli_mask(rng, features, p);
        let mut sequence = x.index_axis_mut(ndarray::Axis(0), b);
        for mut step in sequence.outer_iter_mut() {
            step *= &mask;
        }
    }
    x
}

/// Weight dropout: drop entries of a weight matrix before it is used.
///
/// In eval mode the raw matrix is borrowed untouched.
pub fn weight_dropout<'a>(weight: &'a Array2<f32>, p: f32, mode: &mut Mode) -> Cow<'a, Array2<f32>> {
    match mode.active_rng(p) {
        None => Cow::Borrowed(weight),
        Some(rng) => {
            let mask = bernoulli_mask(rng, weight.len(), p);
            let mut dropped = weight.clone();
            dropped
                .iter_mut()
                .zip(mask.iter())
                .for_each(|(w, m)| *w *= m);
            Cow::Owned(dropped)
        }
    }
}

/// Embedding dropout: one mask entry per vocabulary row, so a dropped word is
/// dropped everywhere it occurs in the batch. None in eval mode.
pub fn embedding_row_mask(rows: usize, p: f32, mode: &mut Mode) -> Option<Array1<f32>> {
    mode.active_rng(p).map(|rng| bernoulli_mask(rng, rows, p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Axis;

    #[test]
    fn test_eval_is_identity() {
        let x = Array3::from_shape_fn((2, 4, 3), |(b, t, f)| (b * 12 + t * 3 + f) as f32);
        let out = locked_dropout(x.clone(), 0.5, &mut Mode::Eval);
        assert_eq!(out, x);

        let w = Array2::from_elem((3, 3), 2.0f32);
        assert!(matches!(weight_dropout(&w, 0.5, &mut Mode::Eval), Cow::Borrowed(_)));
        assert!(embedding_row_mask(10, 0.5, &mut Mode::Eval).is_none());
    }

    #[test]
    fn test_zero_probability_is_identity_in_training() {
        let x = Array2::from_elem((2, 2), 1.5f32);
        let out = dropout(x.clone(), 0.0, &mut Mode::train(1));
        assert_eq!(out, x);
    }

    #[test]
    fn test_locked_mask_shared_across_timesteps() {
        let x = Array3::from_elem((3, 6, 8), 1.0f32);
        let out = locked_dropout(x, 0.5, &mut Mode::train(7));
        for sequence in out.axis_iter(Axis(0)) {
            let first = sequence.index_axis(Axis(0), 0).to_owned();
            for step in sequence.outer_iter() {
                assert_eq!(step, first);
            }
        }
    }

    #[test]
    fn test_mask_values_are_zero_or_rescaled() {
        let w = Array2::from_elem((20, 20), 1.0f32);
        let dropped = weight_dropout(&w, 0.25, &mut Mode::train(3));
        let mut zeros = 0;
        for &v in dropped.iter() {
            assert!(v == 0.0 || (v - 1.0 / 0.75).abs() < 1e-6);
            if v == 0.0 {
                zeros += 1;
            }
        }
        assert!(zeros > 0 && zeros < 400, "expected some but not all entries dropped");
    }

    #[test]
    fn test_same_seed_same_mask() {
        let a = embedding_row_mask(50, 0.3, &mut Mode::train(42)).unwrap();
        let b = embedding_row_mask(50, 0.3, &mut Mode::train(42)).unwrap();
        assert_eq!(a, b);
    }
}
