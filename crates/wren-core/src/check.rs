// Contract checking: validate operator inputs before any kernel runs
//
// Each Function declares what it expects of its inputs as a list of `Expect`
// values. `InTypes::expect` evaluates them in order against lightweight
// descriptors (shape, dtype, placement) and reports the first failure as a
// ContractViolation naming the expectation:
//
//   in_types.expect(&[
//       Expect::size(3),
//       Expect::dtype(0, DType::F32),
//       Expect::ndim(0, 2),
//       Expect::dim_eq((0, 0), (1, 0)),
//   ])?;
//
// Descriptors are copied out of the arrays, so a check can never touch
// storage.

use std::fmt;

use crate::array::Array;
use crate::device::Device;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::shape::Shape;

/// Runtime descriptor of one operator input.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeInfo {
    pub shape: Shape,
    pub dtype: DType,
    pub device: Device,
}

impl TypeInfo {
    pub fn of(array: &Array) -> Self {
        TypeInfo {
            shape: array.shape().clone(),
            dtype: array.dtype(),
            device: array.device(),
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.rank()
    }
}

/// The ordered input descriptors of one application.
#[derive(Debug, Clone)]
pub struct InTypes {
    function: String,
    types: Vec<TypeInfo>,
}

impl InTypes {
    pub fn new(function: impl Into<String>, inputs: &[Array]) -> Self {
        InTypes {
            function: function.into(),
            types: inputs.iter().map(TypeInfo::of).collect(),
        }
    }

    pub fn from_types(function: impl Into<String>, types: Vec<TypeInfo>) -> Self {
        InTypes {
            function: function.into(),
            types,
        }
    }

    pub fn size(&self) -> usize {
        self.types.len()
    }

    pub fn get(&self, index: usize) -> Option<&TypeInfo> {
        self.types.get(index)
    }

    /// Evaluate `expectations` in order; the first failure is returned.
    pub fn expect(&self, expectations: &[Expect]) -> Result<()> {
        for e in expectations {
            if let Err((actual, expected)) = e.evaluate(&self.types) {
                return Err(Error::ContractViolation {
                    function: self.function.clone(),
                    expectation: e.to_string(),
                    actual,
                    expected,
                });
            }
        }
        Ok(())
    }

    /// A [`Error::ContractViolation`] for a condition [`Expect`] cannot
    /// express (e.g. an axis parameter checked against an input's rank).
    pub fn violation(
        &self,
        expectation: impl Into<String>,
        actual: impl ToString,
        expected: impl ToString,
    ) -> Error {
        Error::ContractViolation {
            function: self.function.clone(),
            expectation: expectation.into(),
            actual: actual.to_string(),
            expected: expected.to_string(),
        }
    }
}

/// One declarative expectation over the input descriptors.
#[derive(Debug, Clone, PartialEq)]
pub enum Expect {
    Size(usize),
    DType { arg: usize, dtype: DType },
    Float(usize),
    SameDType(usize, usize),
    Ndim { arg: usize, ndim: usize },
    MinNdim { arg: usize, ndim: usize },
    DimEq { lhs: (usize, usize), rhs: (usize, usize) },
    DimIs { arg: usize, dim: usize, size: usize },
    SameShape(usize, usize),
}

impl Expect {
    pub fn size(n: usize) -> Self {
        Expect::Size(n)
    }

    pub fn dtype(arg: usize, dtype: DType) -> Self {
        Expect::DType { arg, dtype }
    }

    pub fn float(arg: usize) -> Self {
        Expect::Float(arg)
    }

    pub fn same_dtype(a: usize, b: usize) -> Self {
        Expect::SameDType(a, b)
    }

    pub fn ndim(arg: usize, ndim: usize) -> Self {
        Expect::Ndim { arg, ndim }
    }

    pub fn min_ndim(arg: usize, ndim: usize) -> Self {
        Expect::MinNdim { arg, ndim }
    }

    /// `in_types[lhs.0].shape[lhs.1] == in_types[rhs.0].shape[rhs.1]`
    pub fn dim_eq(lhs: (usize, usize), rhs: (usize, usize)) -> Self {
        Expect::DimEq { lhs, rhs }
    }

    pub fn dim_is(arg_dim: (usize, usize), size: usize) -> Self {
        Expect::DimIs {
            arg: arg_dim.0,
            dim: arg_dim.1,
            size,
        }
    }

    pub fn same_shape(a: usize, b: usize) -> Self {
        Expect::SameShape(a, b)
    }

    /// Ok, or `(actual, expected)` rendered for the error message.
    fn evaluate(&self, types: &[TypeInfo]) -> std::result::Result<(), (String, String)> {
        let arg = |i: usize| types.get(i).ok_or_else(|| ("<missing>".to_string(), format!("input {}", i)));
        let dim = |i: usize, d: usize| -> std::result::Result<usize, (String, String)> {
            let t = arg(i)?;
            t.shape
                .dims()
                .get(d)
                .copied()
                .ok_or_else(|| (format!("ndim {}", t.ndim()), format!("ndim > {}", d)))
        };
        let check = |ok: bool, actual: String, expected: String| {
            if ok {
                Ok(())
            } else {
                Err((actual, expected))
            }
        };

        match *self {
            Expect::Size(n) => check(types.len() == n, types.len().to_string(), n.to_string()),
            Expect::DType { arg: i, dtype } => {
                let t = arg(i)?;
                check(t.dtype == dtype, t.dtype.to_string(), dtype.to_string())
            }
            Expect::Float(i) => {
                let t = arg(i)?;
                check(t.dtype.is_float(), t.dtype.to_string(), "f32 or f64".to_string())
            }
            Expect::SameDType(a, b) => {
                let (ta, tb) = (arg(a)?, arg(b)?);
                check(ta.dtype == tb.dtype, tb.dtype.to_string(), ta.dtype.to_string())
            }
            Expect::Ndim { arg: i, ndim } => {
                let t = arg(i)?;
                check(t.ndim() == ndim, t.ndim().to_string(), ndim.to_string())
            }
            Expect::MinNdim { arg: i, ndim } => {
                let t = arg(i)?;
                check(t.ndim() >= ndim, t.ndim().to_string(), format!(">= {}", ndim))
            }
            Expect::DimEq { lhs, rhs } => {
                let (l, r) = (dim(lhs.0, lhs.1)?, dim(rhs.0, rhs.1)?);
                check(l == r, l.to_string(), r.to_string())
            }
            Expect::DimIs { arg: i, dim: d, size } => {
                let got = dim(i, d)?;
                check(got == size, got.to_string(), size.to_string())
            }
            Expect::SameShape(a, b) => {
                let (ta, tb) = (arg(a)?, arg(b)?);
                check(ta.shape == tb.shape, tb.shape.to_string(), ta.shape.to_string())
            }
        }
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Size(n) => write!(f, "in_types.size() == {}", n),
            Expect::DType { arg, dtype } => write!(f, "in_types[{}].dtype == {}", arg, dtype),
            Expect::Float(arg) => write!(f, "in_types[{}].dtype.kind == float", arg),
            Expect::SameDType(a, b) => {
                write!(f, "in_types[{}].dtype == in_types[{}].dtype", a, b)
            }
            Expect::Ndim { arg, ndim } => write!(f, "in_types[{}].ndim == {}", arg, ndim),
            Expect::MinNdim { arg, ndim } => write!(f, "in_types[{}].ndim >= {}", arg, ndim),
            Expect::DimEq { lhs, rhs } => write!(
                f,
                "in_types[{}].shape[{}] == in_types[{}].shape[{}]",
                lhs.0, lhs.1, rhs.0, rhs.1
            ),
            Expect::DimIs { arg, dim, size } => {
                write!(f, "in_types[{}].shape[{}] == {}", arg, dim, size)
            }
            Expect::SameShape(a, b) => {
                write!(f, "in_types[{}].shape == in_types[{}].shape", a, b)
            }
        }
    }
}
