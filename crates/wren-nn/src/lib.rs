//! # wren-nn
//!
//! Differentiable functions, samplers, and links built on `wren-core`.
//!
//! 1. **functions**: every recorded operation (arithmetic, shape ops, Tile,
//!    Roll, Flip, SplitAxis, NegativeSampling) with a free-function wrapper
//! 2. **sampler**: the [`Sampler`] trait and [`WalkerAlias`]
//! 3. **Module trait**: links own parameter Variables in a graph
//! 4. **Links**: [`Scale`], [`LayerNormalization`], [`NegativeSampling`]
//! 5. **init**: parameter initializers

pub mod functions;
pub mod init;
pub mod layernorm;
pub mod loss;
pub mod module;
pub mod negative_sampling;
pub mod sampler;
pub mod scale;

pub use init::Initializer;
pub use layernorm::LayerNormalization;
pub use loss::{negative_sampling, NegativeSamplingFunction, Reduction, IGNORE_LABEL};
pub use module::Module;
pub use negative_sampling::NegativeSampling;
pub use sampler::{Sampler, WalkerAlias};
pub use scale::Scale;
