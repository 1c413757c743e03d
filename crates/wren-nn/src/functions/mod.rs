//! Differentiable functions.
//!
//! Every operation is a [`Function`] struct (construct it, then hand it to
//! [`Graph::apply`]) plus a free function that does both in one call by
//! locating the graph through its inputs:
//!
//! ```
//! use wren_core::{Array, DType, Device, Graph};
//! use wren_nn::functions as F;
//!
//! # fn main() -> wren_core::Result<()> {
//! let g = Graph::new();
//! let x = g.variable(Array::from_vec(vec![0.0f32, 1.0, 2.0], 3, Device::Host)?);
//! let y = F::tile(&x, 2)?;
//! y.backward()?;
//! assert_eq!(x.grad().unwrap().to_vec::<f32>()?, vec![2.0, 2.0, 2.0]);
//! # Ok(())
//! # }
//! ```

mod arith;
mod array;
mod rearrange;
mod tile;

pub use arith::{
    add, add_constant, div, exp, log, mul, mul_constant, neg, sqrt, square, sub, Add,
    AddConstant, Div, Exp, Log, Mul, MulConstant, Neg, Sqrt, Square, Sub,
};
pub use array::{
    broadcast_to, reshape, split_axis, sum, BroadcastTo, Reshape, Split, SplitAxis, Sum,
};
pub use rearrange::{flip, fliplr, flipud, roll, Flip, Roll};
pub use tile::{tile, Reps, Tile};

pub use crate::loss::{negative_sampling, NegativeSamplingFunction};

use wren_core::{Error, Function, Graph, Result, Variable};

/// The live graph the inputs were recorded in.
pub(crate) fn graph_of(label: &str, inputs: &[&Variable]) -> Result<Graph> {
    inputs.first().and_then(|v| v.graph()).ok_or_else(|| {
        Error::integrity(format!(
            "{}: inputs are not attached to a live graph",
            label
        ))
    })
}

/// Apply a single-output function to variables of one graph.
pub(crate) fn call(function: impl Function + 'static, inputs: &[&Variable]) -> Result<Variable> {
    let graph = graph_of(function.label(), inputs)?;
    graph.apply_one(Box::new(function), inputs)
}
