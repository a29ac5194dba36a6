// Named parameter tensors for one category model.
//
// Parameter blobs are safetensors files holding F32 tensors under PyTorch
// state_dict style names. Every accessor checks the requested shape so a
// mis-shaped artifact fails at startup with the tensor's name, never later
// inside a forward pass.

use std::collections::HashMap;

use ndarray::{Array1, Array2, ArrayD, IxDyn};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct WeightStore {
    tensors: HashMap<String, ArrayD<f32>>,
}

impl WeightStore {
    /// Parse a safetensors buffer. Only F32 tensors are accepted, and every
    /// value must be finite.
    pub fn from_safetensors(bytes: &[u8]) -> EngineResult<Self> {
        let parsed = SafeTensors::deserialize(bytes)
            .map_err(|e| EngineError::startup(format!("invalid safetensors blob: {e}")))?;

        let mut tensors = HashMap::new();
        for (name, view) in parsed.tensors() {
            if view.dtype() != Dtype::F32 {
                return Err(EngineError::startup(format!(
                    "tensor '{name}' has dtype {:?}, only F32 is supported",
                    view.dtype()
                )));
            }
            let data: Vec<f32> = view
                .data()
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect();
            if data.iter().any(|v| !v.is_finite()) {
                return Err(EngineError::startup(format!(
                    "tensor '{name}' contains NaN or infinite values"
                )));
            }
            let array = ArrayD::from_shape_vec(IxDyn(view.shape()), data).map_err(|e| {
                EngineError::startup(format!("tensor '{name}' data does not match its shape: {e}"))
            })?;
            tensors.insert(name, array);
        }

        Ok(Self { tensors })
    }

    /// Serialize back to a safetensors buffer (little-endian F32).
    pub fn to_safetensors(&self) -> EngineResult<Vec<u8>> {
        let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = self
            .tensors
            .iter()
            .map(|(name, t)| {
                let bytes = t.iter().flat_map(|v| v.to_le_bytes()).collect();
                (name.clone(), t.shape().to_vec(), bytes)
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, bytes)| {
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.as_str(), view))
                    .map_err(|e| EngineError::startup(format!("cannot serialize '{name}': {e}")))
            })
            .collect::<EngineResult<Vec<_>>>()?;

        safetensors::serialize(views, &None)
            .map_err(|e| EngineError::startup(format!("cannot serialize weights: {e}")))
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: ArrayD<f32>) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn insert_matrix(&mut self, name: impl Into<String>, matrix: Array2<f32>) {
        self.insert(name, matrix.into_dyn());
    }

    pub fn insert_vector(&mut self, name: impl Into<String>, values: Vec<f32>) {
        self.insert(name, Array1::from(values).into_dyn());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    fn get(&self, name: &str) -> EngineResult<&ArrayD<f32>> {
        self.tensors
            .get(name)
            .ok_or_else(|| EngineError::startup(format!("missing tensor '{name}'")))
    }

    /// A 2-D tensor of whatever shape was stored. Leading singleton axes are
    /// squeezed, so a (1, in, out) capsule kernel reads as (in, out).
    pub fn matrix_any(&self, name: &str) -> EngineResult<Array2<f32>> {
        let tensor = self.get(name)?;
        let mut shape: &[usize] = tensor.shape();
        while shape.len() > 2 && shape[0] == 1 {
            shape = &shape[1..];
        }
        if shape.len() != 2 {
            return Err(EngineError::startup(format!(
                "tensor '{name}' has shape {:?}, expected a matrix",
                tensor.shape()
            )));
        }
        let data: Vec<f32> = tensor.iter().copied().collect();
        Array2::from_shape_vec((shape[0], shape[1]), data)
            .map_err(|e| EngineError::startup(format!("tensor '{name}': {e}")))
    }

    /// A 2-D tensor that must be exactly (rows, cols).
    pub fn matrix(&self, name: &str, rows: usize, cols: usize) -> EngineResult<Array2<f32>> {
        let matrix = self.matrix_any(name)?;
        if matrix.dim() != (rows, cols) {
            return Err(EngineError::startup(format!(
                "tensor '{name}' has shape {:?}, expected [{rows}, {cols}]",
                matrix.shape()
            )));
        }
        Ok(matrix)
    }

    /// A vector of exactly `len` values. Column or row matrices ((len, 1),
    /// (1, len)) are accepted and flattened.
    pub fn vector(&self, name: &str, len: usize) -> EngineResult<Array1<f32>> {
        let tensor = self.get(name)?;
        let non_unit_axes = tensor.shape().iter().filter(|&&d| d != 1).count();
        if tensor.len() != len || non_unit_axes > 1 {
            return Err(EngineError::startup(format!(
                "tensor '{name}' has shape {:?}, expected {len} values",
                tensor.shape()
            )));
        }
        Ok(tensor.iter().copied().collect())
    }

    pub fn optional_vector(&self, name: &str, len: usize) -> EngineResult<Option<Array1<f32>>> {
        if self.contains(name) {
            self.vector(name, len).map(Some)
        } else {
            Ok(None)
        }
    }
}
