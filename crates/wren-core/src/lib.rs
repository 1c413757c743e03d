//! # wren-core
//!
//! Arrays, backends, and the define-by-run autodiff engine for wren.
//!
//! This crate provides:
//! - [`Array`]: immutable n-dimensional value with a placement tag
//! - [`Shape`] / [`DType`] / [`Storage`]: shape, element type, buffers
//! - [`Backend`]: host and accelerator kernel capabilities, selected by [`Device`]
//! - [`Expect`] / [`InTypes`]: declarative input contracts
//! - [`Function`]: the forward/backward contract of a recorded operation
//! - [`Graph`] / [`Variable`]: the node table and the values flowing through it
//! - [`gradient_check`]: finite-difference verification of backward rules

pub mod array;
pub mod backend;
mod backprop;
pub mod check;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod dtype;
pub mod error;
pub mod function;
pub mod gradient_check;
pub mod graph;
pub mod shape;
pub mod storage;
pub mod variable;

pub use array::Array;
pub use backend::{AccelBackend, Backend, BinaryOp, HostBackend, UnaryOp};
pub use check::{Expect, InTypes, TypeInfo};
pub use config::GraphConfig;
pub use device::Device;
pub use dispatch::Dispatch;
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use function::Function;
pub use graph::{Graph, NodeId, NodeInfo};
pub use shape::Shape;
pub use storage::Storage;
pub use variable::{Variable, VariableId};
