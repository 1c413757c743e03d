// Scale: elementwise product with a learnable parameter, plus optional bias
//
// W covers a contiguous block of x's axes starting at `axis` and is
// broadcast over the rest:
//
//   x: [B, C, H], axis 1, W: [C]     →  W viewed as [1, C, 1]
//   y = x * broadcast(W) + broadcast(b)
//
// Both are recorded as ordinary Reshape / BroadcastTo / Mul / Add nodes, so
// the link needs no backward of its own.

use wren_core::{Array, DType, Error, Graph, Result, Shape, Variable};

use crate::functions as F;
use crate::init;
use crate::module::Module;

/// `y = x * W + b` with W broadcast along `axis`.
#[derive(Debug, Clone)]
pub struct Scale {
    axis: usize,
    w: Variable,
    bias: Option<Variable>,
}

impl Scale {
    /// W is initialised to ones and the bias (if any) to zeros, on the
    /// graph's default device.
    pub fn new(
        graph: &Graph,
        axis: usize,
        w_shape: impl Into<Shape>,
        bias_term: bool,
        dtype: DType,
    ) -> Result<Self> {
        let device = graph.config().default_device;
        let w_shape = w_shape.into();
        let w = graph.variable(init::ones(w_shape.clone(), dtype, device)?);
        w.set_name("W");
        let bias = if bias_term {
            let b = graph.variable(init::zeros(w_shape, dtype, device)?);
            b.set_name("b");
            Some(b)
        } else {
            None
        };
        Ok(Scale { axis, w, bias })
    }

    pub fn axis(&self) -> usize {
        self.axis
    }

    pub fn w(&self) -> &Variable {
        &self.w
    }

    pub fn bias(&self) -> Option<&Variable> {
        self.bias.as_ref()
    }

    /// View `p` as x-rank with size-1 axes outside `axis..axis + p.rank()`,
    /// then broadcast it to `x`'s shape.
    fn expand(&self, p: &Variable, x: &Shape) -> Result<Variable> {
        let p_shape = p.array()?.shape().clone();
        let end = self.axis + p_shape.rank();
        if end > x.rank() || x.dims()[self.axis..end] != *p_shape.dims() {
            return Err(Error::ShapeMismatch {
                expected: Shape::new(x.dims()[self.axis.min(x.rank())..end.min(x.rank())].to_vec()),
                got: p_shape,
            });
        }
        let mut dims = vec![1; x.rank()];
        dims[self.axis..end].copy_from_slice(p_shape.dims());
        let viewed = F::reshape(p, dims)?;
        F::broadcast_to(&viewed, x.clone())
    }
}

impl Module for Scale {
    fn forward(&self, x: &Variable) -> Result<Variable> {
        let shape = x.array()?.shape().clone();
        let y = F::mul(x, &self.expand(&self.w, &shape)?)?;
        match &self.bias {
            Some(b) => F::add(&y, &self.expand(b, &shape)?),
            None => Ok(y),
        }
    }

    fn parameters(&self) -> Vec<Variable> {
        let mut params = vec![self.w.clone()];
        params.extend(self.bias.clone());
        params
    }

    fn named_parameters(&self) -> Vec<(String, Variable)> {
        let mut params = vec![("W".to_string(), self.w.clone())];
        params.extend(self.bias.clone().map(|b| ("bias.b".to_string(), b)));
        params
    }
}

/// Set a parameter's value, keeping its shape.
pub(crate) fn assign(param: &Variable, value: Array) -> Result<()> {
    let current = param.array()?;
    if current.shape() != value.shape() {
        return Err(Error::ShapeMismatch {
            expected: current.shape().clone(),
            got: value.shape().clone(),
        });
    }
    param.set_data(value);
    Ok(())
}
