use std::fmt;

use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::storage::Storage;

mod accel;
mod host;

pub use accel::AccelBackend;
pub use host::HostBackend;

// Backend: capability boundary between the graph engine and numeric kernels
//
// Every Array carries a placement tag (Device). Dispatch maps the tag to one
// of the Backend implementations below and every kernel an operator needs is
// routed through that trait object. The graph engine itself never asks which
// backend ran; it only sees Storage coming back with the right length.
//
// LAUNCH PRIMITIVES VS. PROVIDED KERNELS
//
// An implementation supplies four primitives:
//   elementwise      : out[i] = kernel(i), the indexed fused-kernel form
//   gather           : out[i] = input[index(i)], dtype-preserving copy
//   scatter_add_rows : out[k, :] += src[n, :] for each sampled row k
//   synchronize      : fence until queued launches have retired
//
// Binary/unary arithmetic, broadcast, tile and sum are provided on top of
// those primitives, so a host loop and a rayon launch produce identical
// per-element results. Reductions sum each output element in the same order
// on every backend.

/// Element-wise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
        }
    }
}

/// Element-wise unary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Abs,
    Exp,
    Log,
    Sqrt,
    Square,
}

impl UnaryOp {
    pub fn apply(self, x: f64) -> f64 {
        match self {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Square => x * x,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Square => "square",
        }
    }
}

/// Elementwise kernel body: maps an output index to its value.
pub type Kernel<'a> = dyn Fn(usize) -> f64 + Sync + 'a;

/// Index map for gather kernels: output index to input index.
pub type IndexMap<'a> = dyn Fn(usize) -> usize + Sync + 'a;

/// A compute backend. Implementations are process-wide singletons reached
/// through [`Device::backend`].
pub trait Backend: Send + Sync + fmt::Debug {
    /// The placement tag this backend serves.
    fn device(&self) -> Device;

    /// A human-readable name ("host", "accelerator").
    fn name(&self) -> &'static str;

    //  Launch primitives

    /// Launch a fused elementwise kernel producing `len` values of `dtype`.
    fn elementwise(&self, name: &str, len: usize, dtype: DType, kernel: &Kernel<'_>)
        -> Result<Storage>;

    /// Copy `len` elements, reading element `index(i)` of `input` for output `i`.
    fn gather(&self, name: &str, input: &Storage, len: usize, index: &IndexMap<'_>)
        -> Result<Storage>;

    /// Build a `[rows, cols]` buffer where row `indices[n]` accumulates row `n`
    /// of `src` (`[indices.len(), cols]`). Negative indices are skipped.
    fn scatter_add_rows(
        &self,
        rows: usize,
        cols: usize,
        indices: &[i64],
        src: &Storage,
    ) -> Result<Storage>;

    /// Block until every launch queued on this backend has retired.
    fn synchronize(&self) -> Result<()>;

    //  Creation

    fn full(&self, len: usize, val: f64, dtype: DType) -> Result<Storage> {
        self.elementwise("fill", len, dtype, &move |_| val)
    }

    //  Element-wise ops

    /// Apply a binary op element-wise over equally sized buffers.
    fn binary_op(&self, op: BinaryOp, lhs: &Storage, rhs: &Storage) -> Result<Storage> {
        if lhs.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: lhs.dtype(),
                got: rhs.dtype(),
            });
        }
        if lhs.len() != rhs.len() {
            return Err(Error::msg(format!(
                "{}: operand lengths differ ({} vs {})",
                op.name(),
                lhs.len(),
                rhs.len()
            )));
        }
        let a = lhs.as_f64();
        let b = rhs.as_f64();
        let (a, b) = (a.as_ref(), b.as_ref());
        self.elementwise(op.name(), lhs.len(), lhs.dtype(), &|i| op.apply(a[i], b[i]))
    }

    fn unary_op(&self, op: UnaryOp, input: &Storage) -> Result<Storage> {
        let x = input.as_f64();
        let x = x.as_ref();
        self.elementwise(op.name(), input.len(), input.dtype(), &|i| op.apply(x[i]))
    }

    /// `input * mul + add`
    fn affine(&self, input: &Storage, mul: f64, add: f64) -> Result<Storage> {
        let x = input.as_f64();
        let x = x.as_ref();
        self.elementwise("affine", input.len(), input.dtype(), &|i| x[i] * mul + add)
    }

    fn cast(&self, input: &Storage, dtype: DType) -> Result<Storage> {
        if input.dtype() == dtype {
            return Ok(input.clone());
        }
        let x = input.as_f64();
        let x = x.as_ref();
        self.elementwise("cast", input.len(), dtype, &|i| x[i])
    }

    //  Shape kernels

    /// Expand `input` (shape `src`) to `dst` following broadcast strides.
    fn broadcast_to(&self, input: &Storage, src: &Shape, dst: &Shape) -> Result<Storage> {
        let strides = src.broadcast_strides(dst);
        let dims = dst.dims();
        self.gather("broadcast_to", input, dst.elem_count(), &|i| {
            let mut rem = i;
            let mut offset = 0;
            for d in (0..dims.len()).rev() {
                offset += (rem % dims[d]) * strides[d];
                rem /= dims[d];
            }
            offset
        })
    }

    /// Replicate `input` (shape `src`, already padded to `dst`'s rank) into `dst`.
    fn tile(&self, input: &Storage, src: &Shape, dst: &Shape) -> Result<Storage> {
        if src.rank() != dst.rank() {
            return Err(Error::msg(format!(
                "tile: source rank {} differs from target rank {}",
                src.rank(),
                dst.rank()
            )));
        }
        let src_dims = src.dims();
        let src_strides = src.stride_contiguous();
        let dims = dst.dims();
        self.gather("tile", input, dst.elem_count(), &|i| {
            let mut rem = i;
            let mut offset = 0;
            for d in (0..dims.len()).rev() {
                offset += ((rem % dims[d]) % src_dims[d]) * src_strides[d];
                rem /= dims[d];
            }
            offset
        })
    }

    /// Sum over `axes`, returning the keep-dim layout (reduced axes have size 1).
    fn sum_axes(&self, input: &Storage, shape: &Shape, axes: &[usize]) -> Result<Storage> {
        for &axis in axes {
            if axis >= shape.rank() {
                return Err(Error::DimOutOfRange {
                    dim: axis,
                    rank: shape.rank(),
                });
            }
        }
        let dims = shape.dims();
        let strides = shape.stride_contiguous();
        let out_dims: Vec<usize> = dims
            .iter()
            .enumerate()
            .map(|(d, &size)| if axes.contains(&d) { 1 } else { size })
            .collect();
        let reduced: Vec<(usize, usize)> = axes.iter().map(|&a| (dims[a], strides[a])).collect();
        let reduced_count: usize = reduced.iter().map(|r| r.0).product();
        let out_len: usize = out_dims.iter().product();

        let data = input.as_f64();
        let data = data.as_ref();
        self.elementwise("sum", out_len, input.dtype(), &|i| {
            let mut rem = i;
            let mut base = 0;
            for d in (0..out_dims.len()).rev() {
                base += (rem % out_dims[d]) * strides[d];
                rem /= out_dims[d];
            }
            let mut acc = 0.0;
            for r in 0..reduced_count {
                let mut rr = r;
                let mut offset = base;
                for &(size, stride) in reduced.iter().rev() {
                    offset += (rr % size) * stride;
                    rr /= size;
                }
                acc += data[offset];
            }
            acc
        })
    }
}

pub(crate) fn check_scatter_args(
    rows: usize,
    cols: usize,
    indices: &[i64],
    src: &Storage,
) -> Result<()> {
    if src.len() != indices.len() * cols {
        return Err(Error::msg(format!(
            "scatter_add_rows: source has {} elements, expected {} rows of {}",
            src.len(),
            indices.len(),
            cols
        )));
    }
    if let Some(&bad) = indices.iter().find(|&&k| k >= rows as i64) {
        return Err(Error::msg(format!(
            "scatter_add_rows: index {} out of range for {} rows",
            bad, rows
        )));
    }
    Ok(())
}
