use crate::device::Device;
use crate::shape::Shape;

/// All errors that can occur within wren.
///
/// The first four variants are the engine-level taxonomy: contract failures
/// detected before a kernel runs, invalid operator configuration, mixed
/// placements, and misuse of the recorded graph. The remaining variants come
/// from array-level operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An input failed one of the operator's declared expectations.
    #[error("{function}: expectation `{expectation}` failed (actual: {actual}, expected: {expected})")]
    ContractViolation {
        function: String,
        expectation: String,
        actual: String,
        expected: String,
    },

    /// Raised at operator construction, before any graph linkage exists.
    #[error("{function}: unsupported configuration: {reason}")]
    UnsupportedConfiguration { function: String, reason: String },

    /// Inputs (or outputs) of one application live on different backends.
    #[error("{function}: backend mismatch: expected {expected}, got {got}")]
    BackendMismatch {
        function: String,
        expected: Device,
        got: Device,
    },

    /// The recorded graph cannot be traversed as requested.
    #[error("graph integrity: {0}")]
    GraphIntegrity(String),

    /// Shape mismatch between two arrays (e.g., trying to add [2,3] + [4,5]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// DType mismatch between arrays in a binary operation.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch {
        expected: crate::DType,
        got: crate::DType,
    },

    /// Dimension index out of range for the array's rank.
    #[error("dimension out of range: dim {dim} for array with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Tried to read a scalar from a non-scalar array.
    #[error("not a scalar: array has shape {shape}")]
    NotAScalar { shape: Shape },

    /// Element count mismatch when creating from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Cannot reshape because element counts differ.
    #[error(
        "cannot reshape: source has {src} elements, target shape {dst_shape} has {dst} elements"
    )]
    ReshapeElementMismatch {
        src: usize,
        dst: usize,
        dst_shape: Shape,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shorthand for [`Error::UnsupportedConfiguration`].
    pub fn unsupported(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnsupportedConfiguration {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::GraphIntegrity`].
    pub fn integrity(s: impl Into<String>) -> Self {
        Error::GraphIntegrity(s.into())
    }
}

/// Convenience Result type used throughout wren.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_violation_names_the_expectation() {
        let err = Error::ContractViolation {
            function: "Tile".into(),
            expectation: "in_types.size() == 1".into(),
            actual: "2".into(),
            expected: "1".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Tile"));
        assert!(text.contains("in_types.size() == 1"));
        assert!(text.contains("actual: 2"));
    }

    #[test]
    fn backend_mismatch_display() {
        let err = Error::BackendMismatch {
            function: "Add".into(),
            expected: Device::Host,
            got: Device::Accelerator,
        };
        assert_eq!(
            err.to_string(),
            "Add: backend mismatch: expected host, got accelerator"
        );
    }
}
