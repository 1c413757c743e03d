// Function: the unit of recorded computation
//
// Every node of the graph owns exactly one boxed Function. The graph calls
// it twice at most:
//
//   forward  : once, when the node is created by Graph::apply
//   backward : at most once, when a backward traversal reaches the node
//
// Anything forward computes that backward needs (an ignore mask, sampled
// indices, a cached dot product) lives in the Function's own fields. The
// node table drops the Function as soon as its backward has run, which frees
// that scratch state with it.
//
// Example: y = x * c for a constant c
//
//   forward(x)          → [x * c]
//   backward(x, [gy])   → [Some(gy * c)]
//
// Returning None for an input means "no gradient flows here" (discrete
// labels, index arrays). The engine leaves such inputs untouched rather than
// writing a zero gradient.

use crate::array::Array;
use crate::check::InTypes;
use crate::dispatch::Dispatch;
use crate::error::Result;

/// A differentiable operation with a forward and a backward contract.
pub trait Function {
    /// Name used in errors and tracing spans (e.g. "Tile").
    fn label(&self) -> &'static str;

    /// Validate input descriptors. Runs before any kernel is dispatched.
    fn check_type_forward(&self, _in_types: &InTypes) -> Result<()> {
        Ok(())
    }

    /// Compute outputs from already-checked inputs on the dispatch backend.
    fn forward(&mut self, dispatch: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>>;

    /// Compute one gradient per input from the gradients of every output.
    ///
    /// `grad_outputs` always has one entry per output: outputs that received
    /// no gradient are passed as zeros.
    fn backward(
        &mut self,
        dispatch: &Dispatch,
        inputs: &[Array],
        grad_outputs: &[Array],
    ) -> Result<Vec<Option<Array>>>;
}

impl<F: Function + ?Sized> Function for Box<F> {
    fn label(&self) -> &'static str {
        (**self).label()
    }

    fn check_type_forward(&self, in_types: &InTypes) -> Result<()> {
        (**self).check_type_forward(in_types)
    }

    fn forward(&mut self, dispatch: &Dispatch, inputs: &[Array]) -> Result<Vec<Array>> {
        (**self).forward(dispatch, inputs)
    }

    fn backward(
        &mut self,
        dispatch: &Dispatch,
        inputs: &[Array],
        grad_outputs: &[Array],
    ) -> Result<Vec<Option<Array>>> {
        (**self).backward(dispatch, inputs, grad_outputs)
    }
}
