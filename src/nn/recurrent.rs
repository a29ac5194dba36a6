// Bidirectional LSTM / GRU layers.
//
// Gate layouts match the PyTorch state_dict the models were exported from:
//   LSTM rows of W_ih / W_hh:  [input | forget | cell | output]
//   GRU rows of W_ih / W_hh:   [reset | update | new]
// The reverse direction reads the sequence back to front and writes its
// hidden state at the same timestep index, so output[t] = [fwd_t | bwd_t].

use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use super::dropout::{weight_dropout, Mode};
use super::sigmoid;
use crate::error::{EngineError, EngineResult};
use crate::model::weights::WeightStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Lstm,
    Gru,
}

impl CellKind {
    /// Number of stacked gate blocks in the weight matrices.
    pub fn gate_count(self) -> usize {
        match self {
            CellKind::Lstm => 4,
            CellKind::Gru => 3,
        }
    }
}

/// Weights for one direction of one layer.
#[derive(Debug, Clone)]
pub struct DirectionWeights {
    pub w_ih: Array2<f32>,
    pub w_hh: Array2<f32>,
    pub b_ih: Array1<f32>,
    pub b_hh: Array1<f32>,
}

impl DirectionWeights {
    /// Load `{prefix}.weight_ih_l0{suffix}` and friends, checking every shape.
    pub fn from_store(
        store: &WeightStore,
        prefix: &str,
        suffix: &str,
        kind: CellKind,
        input_size: usize,
        hidden_size: usize,
    ) -> EngineResult<Self> {
        let gates = kind.gate_count() * hidden_size;
        Ok(Self {
            w_ih: store.matrix(&format!("{prefix}.weight_ih_l0{suffix}"), gates, input_size)?,
            w_hh: store.matrix(&format!("{prefix}.weight_hh_l0{suffix}"), gates, hidden_size)?,
            b_ih: store.vector(&format!("{prefix}.bias_ih_l0{suffix}"), gates)?,
            b_hh: store.vector(&format!("{prefix}.bias_hh_l0{suffix}"), gates)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecurrentLayer {
    kind: CellKind,
    input_size: usize,
    hidden_size: usize,
    forward: DirectionWeights,
    backward: Option<DirectionWeights>,
}

impl RecurrentLayer {
    pub fn new(
        kind: CellKind,
        forward: DirectionWeights,
        backward: Option<DirectionWeights>,
    ) -> EngineResult<Self> {
        let hidden_size = forward.w_hh.ncols();
        let input_size = forward.w_ih.ncols();
        let gates = kind.gate_count() * hidden_size;

        for (label, dir) in std::iter::once(("forward", &forward)).chain(backward.iter().map(|b| ("backward", b))) {
            let ok = dir.w_ih.dim() == (gates, input_size)
                && dir.w_hh.dim() == (gates, hidden_size)
                && dir.b_ih.len() == gates
                && dir.b_hh.len() == gates;
            if !ok {
                return Err(EngineError::startup(format!(
                    "{kind:?} {label} weights do not match input {input_size} / hidden {hidden_size}"
                )));
            }
        }

        Ok(Self {
            kind,
            input_size,
            hidden_size,
            forward,
            backward,
        })
    }

    /// Load layer `index` from `rnns.{index}.*`.
    pub fn from_store(
        store: &WeightStore,
        index: usize,
        kind: CellKind,
        input_size: usize,
        hidden_size: usize,
        bidirectional: bool,
    ) -> EngineResult<Self> {
        let prefix = format!("rnns.{index}");
        let forward = DirectionWeights::from_store(store, &prefix, "", kind, input_size, hidden_size)?;
        let backward = if bidirectional {
            Some(DirectionWeights::from_store(
                store,
                &prefix,
                "_reverse",
                kind,
                input_size,
                hidden_size,
            )?)
        } else {
            None
        };
        Self::new(kind, forward, backward)
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn is_bidirectional(&self) -> bool {
        self.backward.is_some()
    }

    /// Width of each output timestep (hidden size times directions).
    pub fn output_size(&self) -> usize {
        if self.is_bidirectional() {
            2 * self.hidden_size
        } else {
            self.hidden_size
        }
    }

    /// Run the layer over a (batch, time, input) sequence from zero state.
    ///
    /// `weight_drop` is applied to the hidden-to-hidden matrices in training
    /// mode only; eval uses the raw weights.
    pub fn forward(&self, input: &Array3<f32>, weight_drop: f32, mode: &mut Mode) -> Array3<f32> {
        let (batch, steps, _) = input.dim();
        let mut output = Array3::zeros((batch, steps, self.output_size()));

        let w_hh = weight_dropout(&self.forward.w_hh, weight_drop, mode);
        self.run_direction(&self.forward, w_hh.view(), input, false, &mut output, 0);

        if let Some(backward) = &self.backward {
            let w_hh = weight_dropout(&backward.w_hh, weight_drop, mode);
            self.run_direction(backward, w_hh.view(), input, true, &mut output, self.hidden_size);
        }

        output
    }

    fn run_direction(
        &self,
        weights: &DirectionWeights,
        w_hh: ArrayView2<f32>,
        input: &Array3<f32>,
        reverse: bool,
        output: &mut Array3<f32>,
        offset: usize,
    ) {
        let (batch, steps, _) = input.dim();
        let hs = self.hidden_size;
        let mut h = Array2::<f32>::zeros((batch, hs));
        let mut c = Array2::<f32>::zeros((batch, hs));

        let order: Vec<usize> = if reverse {
            (0..steps).rev().collect()
        } else {
            (0..steps).collect()
        };

        for t in order {
            let x_t = input.index_axis(Axis(1), t);
            let gi = x_t.dot(&weights.w_ih.t()) + &weights.b_ih;
            let gh = h.dot(&w_hh.t()) + &weights.b_hh;

            match self.kind {
                CellKind::Lstm => {
                    let gates = gi + gh;
                    let i = gates.slice(s![.., 0..hs]).mapv(sigmoid);
                    let f = gates.slice(s![.., hs..2 * hs]).mapv(sigmoid);
                    let g = gates.slice(s![.., 2 * hs..3 * hs]).mapv(f32::tanh);
                    let o = gates.slice(s![.., 3 * hs..4 * hs]).mapv(sigmoid);
                    c = &f * &c + &i * &g;
                    h = &o * &c.mapv(f32::tanh);
                }
                CellKind::Gru => {
                    let r = (&gi.slice(s![.., 0..hs]) + &gh.slice(s![.., 0..hs])).mapv(sigmoid);
                    let z = (&gi.slice(s![.., hs..2 * hs]) + &gh.slice(s![.., hs..2 * hs]))
                        .mapv(sigmoid);
                    let n = (&gi.slice(s![.., 2 * hs..3 * hs])
                        + &(&r * &gh.slice(s![.., 2 * hs..3 * hs])))
                        .mapv(f32::tanh);
                    h = &z * &h + &(z.mapv(|v| 1.0 - v) * &n);
                }
            }

            output.slice_mut(s![.., t, offset..offset + hs]).assign(&h);
        }
    }
}
