// Global pooling statistics over the time axis.

use ndarray::{Array2, Array3, Axis};

/// Mean over timesteps, (batch, time, f) -> (batch, f). Zero-length sequences pool to zeros.
pub fn mean_over_time(x: &Array3<f32>) -> Array2<f32> {
    let (batch, _, features) = x.dim();
    x.mean_axis(Axis(1))
        .unwrap_or_else(|| Array2::zeros((batch, features)))
}

/// Max over timesteps, (batch, time, f) -> (batch, f). Zero-length sequences pool to zeros.
pub fn max_over_time(x: &Array3<f32>) -> Array2<f32> {
    let (batch, steps, features) = x.dim();
    if steps == 0 {
        return Array2::zeros((batch, features));
    }
    x.fold_axis(Axis(1), f32::NEG_INFINITY, |&acc, &v| acc.max(v))
}

/// Hidden state at the final timestep, (batch, f).
pub fn last_timestep(x: &Array3<f32>) -> Array2<f32> {
    let (batch, steps, features) = x.dim();
    if steps == 0 {
        return Array2::zeros((batch, features));
    }
    x.index_axis(Axis(1), steps - 1).to_owned()
}

/// First timestep kept when a sequence of `len` steps is encoded in windows
/// of `bptt` and only windows starting after `len - max_seq` are retained.
pub fn retained_start(len: usize, bptt: usize, max_seq: usize) -> usize {
    let bptt = bptt.max(1);
    let cutoff = len as i64 - max_seq as i64;
    (0..len)
        .step_by(bptt)
        .find(|&start| start as i64 > cutoff)
        .unwrap_or_else(|| len.saturating_sub(1) / bptt * bptt)
}
