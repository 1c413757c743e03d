//! # wren
//!
//! A define-by-run automatic differentiation engine in Rust.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use wren::prelude::*;
//!
//! # fn main() -> wren::Result<()> {
//! let g = Graph::new();
//! let x = g.variable(Array::from_vec(vec![0.0f32, 1.0, 2.0], 3, Device::Host)?);
//! let y = F::tile(&x, 2)?;
//! assert_eq!(y.array()?.to_vec::<f32>()?, vec![0.0, 1.0, 2.0, 0.0, 1.0, 2.0]);
//!
//! y.backward()?;
//! assert_eq!(x.grad().unwrap().to_vec::<f32>()?, vec![2.0, 2.0, 2.0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `wren-core` | Array, Shape, DType, Backend trait (host and accelerator), contract checker, Graph, Variable, backward traversal, gradient check |
//! | `wren-nn` | Differentiable functions, samplers, Module trait, links |

/// Re-export core types.
pub use wren_core::{
    backend::{AccelBackend, Backend, BinaryOp, HostBackend, UnaryOp},
    check::{Expect, InTypes, TypeInfo},
    gradient_check, Array, DType, Device, Dispatch, Error, Function, Graph, GraphConfig, NodeId,
    NodeInfo, Result, Shape, Storage, Variable, VariableId, WithDType,
};

/// Re-export functions, samplers, and links.
pub mod nn {
    pub use wren_nn::*;
}

/// Differentiable functions (`F::tile`, `F::add`, ...).
pub use wren_nn::functions;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::functions as F;
    pub use crate::gradient_check::{check_backward, numerical_grad, CheckOptions};
    pub use crate::nn::{
        Initializer, LayerNormalization, Module, NegativeSampling, NegativeSamplingFunction,
        Reduction, Sampler, Scale, WalkerAlias, IGNORE_LABEL,
    };
    pub use crate::{
        Array, DType, Device, Dispatch, Error, Expect, Function, Graph, GraphConfig, InTypes,
        Result, Shape, Variable,
    };
}
