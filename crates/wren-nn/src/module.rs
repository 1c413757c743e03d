// Module trait: the interface every link implements
//
// A link owns parameter Variables registered in one Graph. `forward` records
// the link's computation into that graph; calling `backward` on a result
// leaves each parameter's gradient in `Variable::grad`, ready to be read
// (and cleared) by whatever update rule the caller runs.
//
// Links with more than one input (NegativeSampling takes x and t) keep an
// inherent `forward` and expose `parameters` the same way.

use wren_core::{Result, Variable};

/// A reusable piece of a model with learnable parameters.
///
/// # Example
/// ```ignore
/// struct Affine {
///     scale: Scale,
/// }
///
/// impl Module for Affine {
///     fn forward(&self, x: &Variable) -> Result<Variable> {
///         F::add_constant(&self.scale.forward(x)?, 1.0)
///     }
///     fn parameters(&self) -> Vec<Variable> {
///         self.scale.parameters()
///     }
/// }
/// ```
pub trait Module {
    /// Record this link's computation on `x`.
    fn forward(&self, x: &Variable) -> Result<Variable>;

    /// Every learnable parameter, in a stable order.
    fn parameters(&self) -> Vec<Variable>;

    /// Reset every parameter gradient to None.
    fn cleargrads(&self) {
        for p in self.parameters() {
            p.cleargrad();
        }
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters()
            .iter()
            .filter_map(Variable::shape)
            .map(|s| s.elem_count())
            .sum()
    }

    /// Parameters with names. The default uses positional names
    /// (`param_0`, `param_1`, ...); links override it.
    fn named_parameters(&self) -> Vec<(String, Variable)> {
        self.parameters()
            .into_iter()
            .enumerate()
            .map(|(i, p)| (format!("param_{i}"), p))
            .collect()
    }
}
