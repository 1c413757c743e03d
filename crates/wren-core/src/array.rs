use std::sync::Arc;

use crate::backend::{Backend, BinaryOp, UnaryOp};
use crate::device::Device;
use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::storage::Storage;

// Array: the tensor value flowing through the graph
//
// An Array is an immutable n-dimensional buffer plus its shape and placement
// tag. Operators consume and produce Arrays; Variables wrap them and add the
// gradient/creator bookkeeping.
//
// MEMORY MODEL:
//
//   Storage sits behind an Arc, so cloning an Array is O(1) and the graph
//   can keep forward inputs alive for backward without copying. No operation
//   mutates storage in place: every kernel returns fresh Storage, which is
//   what lets an Operator cache its inputs and trust them in backward.
//
// DISPATCH:
//
//   Every operation resolves `self.device().backend()` and calls into the
//   Backend trait. Binary operations first check that both operands share a
//   placement (BackendMismatch otherwise) and a dtype.

/// An n-dimensional array living on one [`Device`].
#[derive(Clone)]
pub struct Array {
    storage: Arc<Storage>,
    shape: Shape,
    device: Device,
}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Array(shape={}, dtype={}, device={})",
            self.shape,
            self.dtype(),
            self.device,
        )
    }
}

impl Array {
    // Construction

    /// Wrap existing storage. The storage length must match the shape.
    pub fn from_storage(storage: Storage, shape: impl Into<Shape>, device: Device) -> Result<Self> {
        let shape = shape.into();
        if storage.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: storage.len(),
                shape,
            });
        }
        Ok(Array {
            storage: Arc::new(storage),
            shape,
            device,
        })
    }

    /// Create an array from a typed vec; the dtype follows `T`.
    pub fn from_vec<T: WithDType>(data: Vec<T>, shape: impl Into<Shape>, device: Device) -> Result<Self> {
        Self::from_storage(Storage::from_vec(data)?, shape, device)
    }

    pub fn from_slice<T: WithDType>(data: &[T], shape: impl Into<Shape>, device: Device) -> Result<Self> {
        Self::from_vec(data.to_vec(), shape, device)
    }

    /// Create an array from f64 values converted to `dtype`.
    pub fn from_f64_slice(
        data: &[f64],
        shape: impl Into<Shape>,
        dtype: DType,
        device: Device,
    ) -> Result<Self> {
        Self::from_storage(Storage::from_f64_vec(data.to_vec(), dtype), shape, device)
    }

    pub fn full(shape: impl Into<Shape>, val: f64, dtype: DType, device: Device) -> Result<Self> {
        let shape = shape.into();
        let storage = device.backend().full(shape.elem_count(), val, dtype)?;
        Self::from_storage(storage, shape, device)
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Self> {
        Self::full(shape, 0.0, dtype, device)
    }

    pub fn ones(shape: impl Into<Shape>, dtype: DType, device: Device) -> Result<Self> {
        Self::full(shape, 1.0, dtype, device)
    }

    /// A 0-dimensional array.
    pub fn scalar(val: f64, dtype: DType, device: Device) -> Result<Self> {
        Self::full((), val, dtype, device)
    }

    /// `[0, 1, ..., n-1]` as a 1-D array.
    pub fn arange(n: usize, dtype: DType, device: Device) -> Result<Self> {
        let storage = device.backend().elementwise("arange", n, dtype, &|i| i as f64)?;
        Self::from_storage(storage, n, device)
    }

    pub fn zeros_like(other: &Self) -> Result<Self> {
        Self::zeros(other.shape.clone(), other.dtype(), other.device)
    }

    pub fn ones_like(other: &Self) -> Result<Self> {
        Self::ones(other.shape.clone(), other.dtype(), other.device)
    }

    pub fn full_like(other: &Self, val: f64) -> Result<Self> {
        Self::full(other.shape.clone(), val, other.dtype(), other.device)
    }

    // Accessors

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The backend serving this array's placement.
    pub fn backend(&self) -> &'static dyn Backend {
        self.device.backend()
    }

    /// Whether two handles share the same underlying buffer.
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        self.storage.to_vec()
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.storage.as_f64().into_owned()
    }

    /// Read the single element of a 0-d (or one-element) array.
    pub fn to_scalar(&self) -> Result<f64> {
        if self.elem_count() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape.clone(),
            });
        }
        Ok(self.storage.as_f64()[0])
    }

    // Conversion

    pub fn to_dtype(&self, dtype: DType) -> Result<Self> {
        if dtype == self.dtype() {
            return Ok(self.clone());
        }
        let storage = self.backend().cast(&self.storage, dtype)?;
        self.with_storage(storage, self.shape.clone())
    }

    /// Re-home the array on another placement. Storage is host-visible for
    /// every backend, so the move retags and fences both queues.
    pub fn to_device(&self, device: Device) -> Result<Self> {
        if device == self.device {
            return Ok(self.clone());
        }
        self.backend().synchronize()?;
        device.backend().synchronize()?;
        Ok(Array {
            storage: Arc::clone(&self.storage),
            shape: self.shape.clone(),
            device,
        })
    }

    fn with_storage(&self, storage: Storage, shape: Shape) -> Result<Self> {
        Self::from_storage(storage, shape, self.device)
    }

    fn same_placement(&self, rhs: &Self, op: &str) -> Result<()> {
        if self.device != rhs.device {
            return Err(Error::BackendMismatch {
                function: op.to_string(),
                expected: self.device,
                got: rhs.device,
            });
        }
        if self.dtype() != rhs.dtype() {
            return Err(Error::DTypeMismatch {
                expected: self.dtype(),
                got: rhs.dtype(),
            });
        }
        Ok(())
    }

    // Shape operations

    /// Same data, different shape. Element counts must agree.
    pub fn reshape(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != self.elem_count() {
            return Err(Error::ReshapeElementMismatch {
                src: self.elem_count(),
                dst: shape.elem_count(),
                dst_shape: shape,
            });
        }
        Ok(Array {
            storage: Arc::clone(&self.storage),
            shape,
            device: self.device,
        })
    }

    /// NumPy-style broadcast to `shape`.
    pub fn broadcast_to(&self, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if shape == self.shape {
            return Ok(self.clone());
        }
        if !self.shape.broadcastable_to(&shape) {
            return Err(Error::ShapeMismatch {
                expected: shape,
                got: self.shape.clone(),
            });
        }
        let storage = self.backend().broadcast_to(&self.storage, &self.shape, &shape)?;
        self.with_storage(storage, shape)
    }

    /// Sum over the given axes. With `keepdim` the reduced axes stay as size 1.
    pub fn sum(&self, axes: &[usize], keepdim: bool) -> Result<Self> {
        let mut axes = axes.to_vec();
        axes.sort_unstable();
        axes.dedup();
        let storage = self.backend().sum_axes(&self.storage, &self.shape, &axes)?;
        let dims: Vec<usize> = self
            .dims()
            .iter()
            .enumerate()
            .filter_map(|(d, &size)| {
                if !axes.contains(&d) {
                    Some(size)
                } else if keepdim {
                    Some(1)
                } else {
                    None
                }
            })
            .collect();
        self.with_storage(storage, Shape::new(dims))
    }

    /// Sum of every element, as a 0-d array.
    pub fn sum_all(&self) -> Result<Self> {
        let axes: Vec<usize> = (0..self.rank()).collect();
        self.sum(&axes, false)
    }

    /// Construct an array by repeating this one `reps[d]` times along each axis.
    ///
    /// When `reps` is longer than the rank the shape is left-padded with 1s;
    /// when shorter, `reps` is left-padded with 1s.
    pub fn tile(&self, reps: &[usize]) -> Result<Self> {
        let rank = self.rank().max(reps.len());
        let src = self.shape.left_pad(rank);
        let mut full_reps = vec![1; rank - reps.len()];
        full_reps.extend_from_slice(reps);
        let dst = Shape::new(
            src.dims()
                .iter()
                .zip(&full_reps)
                .map(|(&s, &r)| s * r)
                .collect(),
        );
        let storage = self.backend().tile(&self.storage, &src, &dst)?;
        self.with_storage(storage, dst)
    }

    /// Roll elements by `shift` along `axis`; with no axis the array is
    /// rolled as if flattened.
    pub fn roll(&self, shift: isize, axis: Option<usize>) -> Result<Self> {
        match axis {
            None => {
                let n = self.elem_count();
                if n == 0 {
                    return Ok(self.clone());
                }
                let s = shift.rem_euclid(n as isize) as usize;
                let storage = self
                    .backend()
                    .gather("roll", &self.storage, n, &|i| (i + n - s) % n)?;
                self.with_storage(storage, self.shape.clone())
            }
            Some(axis) => {
                let size = self.shape.dim(axis)?;
                if size == 0 || self.elem_count() == 0 {
                    return Ok(self.clone());
                }
                let s = shift.rem_euclid(size as isize) as usize;
                let stride = self.shape.stride_contiguous()[axis];
                let storage = self.backend().gather("roll", &self.storage, self.elem_count(), &|i| {
                    let coord = (i / stride) % size;
                    let src = (coord + size - s) % size;
                    i - coord * stride + src * stride
                })?;
                self.with_storage(storage, self.shape.clone())
            }
        }
    }

    /// Reverse the order of elements along `axis`.
    pub fn flip(&self, axis: usize) -> Result<Self> {
        let size = self.shape.dim(axis)?;
        let stride = self.shape.stride_contiguous()[axis];
        let storage = self.backend().gather("flip", &self.storage, self.elem_count(), &|i| {
            let coord = (i / stride) % size;
            i - coord * stride + (size - 1 - coord) * stride
        })?;
        self.with_storage(storage, self.shape.clone())
    }

    /// Slice `len` entries starting at `start` along `axis`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self> {
        let size = self.shape.dim(axis)?;
        if start + len > size {
            return Err(Error::msg(format!(
                "narrow out of bounds: axis {}, start {}, len {}, size {}",
                axis, start, len, size
            )));
        }
        let mut dims = self.dims().to_vec();
        dims[axis] = len;
        let out = Shape::new(dims);
        let src_stride = self.shape.stride_contiguous()[axis];
        let out_stride = out.stride_contiguous()[axis];
        let storage = self.backend().gather("narrow", &self.storage, out.elem_count(), &|i| {
            let outer = i / (out_stride * len);
            let coord = (i / out_stride) % len;
            let inner = i % out_stride;
            outer * src_stride * size + (coord + start) * src_stride + inner
        })?;
        self.with_storage(storage, out)
    }

    /// Join arrays along `axis`. All other dimensions must agree.
    pub fn concat(arrays: &[&Array], axis: usize) -> Result<Array> {
        let first = arrays
            .first()
            .ok_or_else(|| Error::msg("concat requires at least one array"))?;
        let mut total = 0;
        for a in arrays {
            first.same_placement(a, "concat")?;
            if a.rank() != first.rank() {
                return Err(Error::ShapeMismatch {
                    expected: first.shape.clone(),
                    got: a.shape.clone(),
                });
            }
            for d in 0..a.rank() {
                if d != axis && a.dims()[d] != first.dims()[d] {
                    return Err(Error::ShapeMismatch {
                        expected: first.shape.clone(),
                        got: a.shape.clone(),
                    });
                }
            }
            total += a.shape.dim(axis)?;
        }
        let mut dims = first.dims().to_vec();
        dims[axis] = total;
        let out = Shape::new(dims);
        let inner: usize = out.dims()[axis + 1..].iter().product();

        // Element i of the output lives in the piece whose offset range along
        // `axis` contains its coordinate.
        let offsets: Vec<usize> = arrays
            .iter()
            .scan(0, |acc, a| {
                let start = *acc;
                *acc += a.dims()[axis];
                Some(start)
            })
            .collect();
        let pieces: Vec<_> = arrays.iter().map(|a| a.storage.as_f64()).collect();
        let storage = first.backend().elementwise("concat", out.elem_count(), first.dtype(), &|i| {
            let outer = i / (inner * total);
            let coord = (i / inner) % total;
            let within = i % inner;
            let p = offsets.partition_point(|&o| o <= coord) - 1;
            let size = arrays[p].dims()[axis];
            pieces[p][outer * size * inner + (coord - offsets[p]) * inner + within]
        })?;
        Array::from_storage(storage, out, first.device)
    }

    // Arithmetic

    pub fn add(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Add)
    }

    pub fn sub(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Sub)
    }

    pub fn mul(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Mul)
    }

    pub fn div(&self, rhs: &Self) -> Result<Self> {
        self.binary_op(rhs, BinaryOp::Div)
    }

    /// Broadcasting binary op dispatched to this array's backend.
    fn binary_op(&self, rhs: &Self, op: BinaryOp) -> Result<Self> {
        self.same_placement(rhs, op.name())?;
        let shape = Shape::broadcast_shape(&self.shape, &rhs.shape)?;
        let lhs = self.broadcast_to(shape.clone())?;
        let rhs = rhs.broadcast_to(shape.clone())?;
        let storage = self.backend().binary_op(op, &lhs.storage, &rhs.storage)?;
        self.with_storage(storage, shape)
    }

    pub fn neg(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Neg)
    }

    pub fn abs(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Abs)
    }

    pub fn exp(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Exp)
    }

    pub fn log(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Log)
    }

    pub fn sqrt(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Sqrt)
    }

    pub fn square(&self) -> Result<Self> {
        self.unary_op(UnaryOp::Square)
    }

    fn unary_op(&self, op: UnaryOp) -> Result<Self> {
        let storage = self.backend().unary_op(op, &self.storage)?;
        self.with_storage(storage, self.shape.clone())
    }

    /// `self * mul + add`
    pub fn affine(&self, mul: f64, add: f64) -> Result<Self> {
        let storage = self.backend().affine(&self.storage, mul, add)?;
        self.with_storage(storage, self.shape.clone())
    }

    /// Largest absolute element-wise difference; shapes must match.
    pub fn max_abs_diff(&self, other: &Self) -> Result<f64> {
        if self.shape != other.shape {
            return Err(Error::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        let a = self.storage.as_f64();
        let b = other.storage.as_f64();
        Ok(a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).abs())
            .fold(0.0, f64::max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(data: &[f64], shape: impl Into<Shape>) -> Array {
        Array::from_f64_slice(data, shape, DType::F64, Device::Host).unwrap()
    }

    #[test]
    fn tile_pads_reps_and_shape() {
        let x = Array::from_vec(vec![0i32, 1, 2], 3, Device::Host).unwrap();
        let y = x.tile(&[2]).unwrap();
        assert_eq!(y.to_vec::<i32>().unwrap(), vec![0, 1, 2, 0, 1, 2]);

        let y = x.tile(&[2, 1, 2]).unwrap();
        assert_eq!(y.dims(), &[2, 1, 6]);

        let m = Array::from_vec(vec![1i32, 2, 3, 4], (2, 2), Device::Host).unwrap();
        let y = m.tile(&[2]).unwrap();
        assert_eq!(y.dims(), &[2, 4]);
        assert_eq!(y.to_vec::<i32>().unwrap(), vec![1, 2, 1, 2, 3, 4, 3, 4]);
    }

    #[test]
    fn tile_with_zero_rep_is_empty() {
        let x = host(&[1.0, 2.0], 2);
        let y = x.tile(&[0]).unwrap();
        assert_eq!(y.dims(), &[0]);
        assert_eq!(y.elem_count(), 0);
    }

    #[test]
    fn sum_keepdim_and_all() {
        let x = host(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        let s = x.sum(&[1], true).unwrap();
        assert_eq!(s.dims(), &[2, 1]);
        assert_eq!(s.to_f64_vec(), vec![6.0, 15.0]);
        let s = x.sum(&[0], false).unwrap();
        assert_eq!(s.dims(), &[3]);
        assert_eq!(x.sum_all().unwrap().to_scalar().unwrap(), 21.0);
    }

    #[test]
    fn broadcasting_add() {
        let a = host(&[1.0, 2.0], (2, 1));
        let b = host(&[10.0, 20.0, 30.0], 3);
        let c = a.add(&b).unwrap();
        assert_eq!(c.dims(), &[2, 3]);
        assert_eq!(c.to_f64_vec(), vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]);
    }

    #[test]
    fn mixed_placement_is_rejected() {
        let a = host(&[1.0], 1);
        let b = a.to_device(Device::Accelerator).unwrap();
        assert!(matches!(a.add(&b), Err(Error::BackendMismatch { .. })));
    }

    #[test]
    fn roll_matches_numpy() {
        let x = Array::arange(10, DType::I64, Device::Host).unwrap();
        assert_eq!(
            x.roll(2, None).unwrap().to_vec::<i64>().unwrap(),
            vec![8, 9, 0, 1, 2, 3, 4, 5, 6, 7]
        );
        assert_eq!(
            x.roll(-2, None).unwrap().to_vec::<i64>().unwrap(),
            vec![2, 3, 4, 5, 6, 7, 8, 9, 0, 1]
        );
        assert_eq!(
            x.roll(35, None).unwrap().to_vec::<i64>().unwrap(),
            x.roll(5, None).unwrap().to_vec::<i64>().unwrap()
        );
        let m = x.reshape((2, 5)).unwrap();
        assert_eq!(
            m.roll(1, Some(0)).unwrap().to_vec::<i64>().unwrap(),
            vec![5, 6, 7, 8, 9, 0, 1, 2, 3, 4]
        );
        assert_eq!(
            m.roll(1, Some(1)).unwrap().to_vec::<i64>().unwrap(),
            vec![4, 0, 1, 2, 3, 9, 5, 6, 7, 8]
        );
    }

    #[test]
    fn flip_narrow_concat() {
        let m = host(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3));
        assert_eq!(m.flip(1).unwrap().to_f64_vec(), vec![3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
        assert_eq!(m.flip(0).unwrap().to_f64_vec(), vec![4.0, 5.0, 6.0, 1.0, 2.0, 3.0]);

        let right = m.narrow(1, 1, 2).unwrap();
        assert_eq!(right.to_f64_vec(), vec![2.0, 3.0, 5.0, 6.0]);
        let left = m.narrow(1, 0, 1).unwrap();

        let joined = Array::concat(&[&left, &right], 1).unwrap();
        assert_eq!(joined.to_f64_vec(), m.to_f64_vec());
    }

    #[test]
    fn reshape_checks_count() {
        let x = host(&[1.0, 2.0, 3.0, 4.0], 4);
        assert!(x.reshape((2, 2)).unwrap().same_storage(&x));
        assert!(matches!(
            x.reshape(3),
            Err(Error::ReshapeElementMismatch { .. })
        ));
    }
}
