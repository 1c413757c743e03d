use std::borrow::Cow;

use crate::dtype::{DType, WithDType};
use crate::error::{Error, Result};

/// Contiguous row-major element buffer, one variant per [`DType`].
///
/// Both backends keep storage in host-visible memory; the placement tag on
/// [`crate::Array`] decides which backend executes kernels over it.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    F32(Vec<f32>),
    F64(Vec<f64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
}

impl Storage {
    pub fn dtype(&self) -> DType {
        match self {
            Storage::F32(_) => DType::F32,
            Storage::F64(_) => DType::F64,
            Storage::I32(_) => DType::I32,
            Storage::I64(_) => DType::I64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::F32(v) => v.len(),
            Storage::F64(v) => v.len(),
            Storage::I32(v) => v.len(),
            Storage::I64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build storage of `dtype` from f64 values (truncating for integer types).
    pub fn from_f64_vec(data: Vec<f64>, dtype: DType) -> Self {
        match dtype {
            DType::F64 => Storage::F64(data),
            DType::F32 => Storage::F32(data.into_iter().map(|v| v as f32).collect()),
            DType::I32 => Storage::I32(data.into_iter().map(|v| v as i32).collect()),
            DType::I64 => Storage::I64(data.into_iter().map(|v| v as i64).collect()),
        }
    }

    /// Build storage from a typed vec without going through f64.
    pub fn from_vec<T: WithDType>(data: Vec<T>) -> Result<Self> {
        fn cast_all<T: WithDType, U: num_traits::NumCast>(data: Vec<T>) -> Result<Vec<U>> {
            data.into_iter()
                .map(|v| {
                    num_traits::cast::<T, U>(v)
                        .ok_or_else(|| Error::msg(format!("cannot cast element {:?}", v)))
                })
                .collect()
        }
        Ok(match T::DTYPE {
            DType::F32 => Storage::F32(cast_all(data)?),
            DType::F64 => Storage::F64(cast_all(data)?),
            DType::I32 => Storage::I32(cast_all(data)?),
            DType::I64 => Storage::I64(cast_all(data)?),
        })
    }

    /// Typed copy of the elements, casting when `T` differs from the dtype.
    pub fn to_vec<T: WithDType>(&self) -> Result<Vec<T>> {
        fn cast_slice<S: WithDType, T: WithDType>(data: &[S]) -> Result<Vec<T>> {
            data.iter()
                .map(|&v| {
                    num_traits::cast::<S, T>(v).ok_or_else(|| {
                        Error::msg(format!("cannot cast {:?} to {}", v, T::DTYPE))
                    })
                })
                .collect()
        }
        match self {
            Storage::F32(v) => cast_slice(v),
            Storage::F64(v) => cast_slice(v),
            Storage::I32(v) => cast_slice(v),
            Storage::I64(v) => cast_slice(v),
        }
    }

    /// View the elements as f64, borrowing when the storage already is f64.
    pub fn as_f64(&self) -> Cow<'_, [f64]> {
        match self {
            Storage::F64(v) => Cow::Borrowed(v.as_slice()),
            Storage::F32(v) => Cow::Owned(v.iter().map(|&x| x as f64).collect()),
            Storage::I32(v) => Cow::Owned(v.iter().map(|&x| x as f64).collect()),
            Storage::I64(v) => Cow::Owned(v.iter().map(|&x| x as f64).collect()),
        }
    }

    /// Integer view used for index arrays (sampled rows, labels).
    pub fn as_i64(&self) -> Cow<'_, [i64]> {
        match self {
            Storage::I64(v) => Cow::Borrowed(v.as_slice()),
            Storage::I32(v) => Cow::Owned(v.iter().map(|&x| x as i64).collect()),
            Storage::F32(v) => Cow::Owned(v.iter().map(|&x| x as i64).collect()),
            Storage::F64(v) => Cow::Owned(v.iter().map(|&x| x as i64).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_round_trip_keeps_dtype() {
        let s = Storage::from_vec(vec![1i32, -1, 7]).unwrap();
        assert_eq!(s.dtype(), DType::I32);
        assert_eq!(s.to_vec::<i64>().unwrap(), vec![1, -1, 7]);
    }

    #[test]
    fn as_f64_borrows_f64() {
        let s = Storage::F64(vec![0.5, 1.5]);
        assert!(matches!(s.as_f64(), Cow::Borrowed(_)));
        let s = Storage::F32(vec![0.5, 1.5]);
        assert_eq!(s.as_f64().as_ref(), &[0.5, 1.5]);
    }

    #[test]
    fn nan_cannot_become_int() {
        let s = Storage::F64(vec![f64::NAN]);
        assert!(s.to_vec::<i32>().is_err());
    }
}
