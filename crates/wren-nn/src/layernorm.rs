// LayerNormalization: normalize each row of a [B, C] input, then Scale
//
// FORMULA (per row, over the C features):
//
//   mean = sum(x, axis 1) / C
//   std  = sqrt(sum((x - mean)², axis 1) / C) + eps
//   y    = (x - mean) / std * γ + β
//
// Note eps is added to the standard deviation, not to the variance.
//
// The whole thing is a composition of recorded functions (Sum, MulConstant,
// BroadcastTo, Sub, Square, Sqrt, AddConstant, Div) followed by a Scale link
// with W = γ along axis 1 and bias β, so gradients come from the engine.
//
// Defaults: eps = 1e-6, γ = ones, β = zeros.

use wren_core::{Array, DType, Graph, Result, Variable};

use crate::functions as F;
use crate::module::Module;
use crate::scale::{assign, Scale};

/// Layer normalization over axis 1 of a 2-D input.
///
/// # Example
/// ```
/// use wren_core::{Array, DType, Device, Graph};
/// use wren_nn::{LayerNormalization, Module};
///
/// # fn main() -> wren_core::Result<()> {
/// let g = Graph::new();
/// let ln = LayerNormalization::new(&g, 3)?;
/// let x = g.variable(Array::from_vec(vec![1.0f32, 2.0, 3.0], (1, 3), Device::Host)?);
/// let y = ln.forward(&x)?;
/// assert_eq!(y.shape().unwrap().dims(), &[1, 3]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct LayerNormalization {
    scale: Scale,
    size: usize,
    eps: f64,
}

impl LayerNormalization {
    /// F32 parameters of length `size` on the graph's default device.
    pub fn new(graph: &Graph, size: usize) -> Result<Self> {
        Ok(LayerNormalization {
            scale: Scale::new(graph, 1, size, true, DType::F32)?,
            size,
            eps: 1e-6,
        })
    }

    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Cast γ and β to `dtype`.
    pub fn with_dtype(self, dtype: DType) -> Result<Self> {
        for p in self.scale.parameters() {
            p.set_data(p.array()?.to_dtype(dtype)?);
        }
        Ok(self)
    }

    /// Replace γ. The array must have shape `[size]`.
    pub fn with_initial_gamma(self, gamma: Array) -> Result<Self> {
        assign(self.scale.w(), gamma)?;
        Ok(self)
    }

    /// Replace β. The array must have shape `[size]`.
    pub fn with_initial_beta(self, beta: Array) -> Result<Self> {
        if let Some(b) = self.scale.bias() {
            assign(b, beta)?;
        }
        Ok(self)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    pub fn gamma(&self) -> &Variable {
        self.scale.w()
    }

    pub fn beta(&self) -> Option<&Variable> {
        self.scale.bias()
    }

    fn normalize(&self, x: &Variable) -> Result<Variable> {
        let shape = x.array()?.shape().clone();
        let inv = 1.0 / shape.dim(1)? as f64;

        let mean = F::mul_constant(&F::sum(x, Some(&[1]), true)?, inv)?;
        let mean = F::broadcast_to(&mean, shape.clone())?;
        let centered = F::sub(x, &mean)?;

        let var = F::mul_constant(&F::sum(&F::square(&centered)?, Some(&[1]), true)?, inv)?;
        let std = F::broadcast_to(&F::sqrt(&var)?, shape)?;
        let std = F::add_constant(&std, self.eps)?;
        F::div(&centered, &std)
    }
}

impl Module for LayerNormalization {
    fn forward(&self, x: &Variable) -> Result<Variable> {
        self.scale.forward(&self.normalize(x)?)
    }

    fn parameters(&self) -> Vec<Variable> {
        self.scale.parameters()
    }

    fn named_parameters(&self) -> Vec<(String, Variable)> {
        self.scale
            .named_parameters()
            .into_iter()
            .map(|(name, p)| (format!("scale.{name}"), p))
            .collect()
    }
}
