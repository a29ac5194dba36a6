// Neural building blocks for local inference.
//
// Tensors are ndarray arrays. Sequences are laid out batch-first:
// Array3 with axes (batch, time, feature). Everything here is read-only
// after construction; the only mutable thing a forward pass touches is the
// dropout Mode, and only in training mode.

pub mod attention;
pub mod capsule;
pub mod dropout;
pub mod encoder;
pub mod head;
pub mod layers;
pub mod pooling;
pub mod recurrent;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2};

/// Logistic function, written to avoid overflow for large |x|.
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn relu(x: f32) -> f32 {
    x.max(0.0)
}

/// Numerically stable softmax over a vector.
pub fn softmax(values: ArrayView1<f32>) -> Array1<f32> {
    let max = values.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exp = values.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// Concatenate 2-D blocks along the feature axis. All blocks share the row count.
pub fn concat_columns(parts: &[ArrayView2<f32>]) -> Array2<f32> {
    let rows = parts.first().map(|p| p.nrows()).unwrap_or(0);
    let width: usize = parts.iter().map(|p| p.ncols()).sum();
    let mut out = Array2::zeros((rows, width));
    let mut offset = 0;
    for part in parts {
        out.slice_mut(s![.., offset..offset + part.ncols()])
            .assign(part);
        offset += part.ncols();
    }
    out
}
