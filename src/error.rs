//! Error types for gemmly operations.
//!
//! Every entry point validates its arguments before touching the output
//! matrix, so all errors except [`GemmError::OutOfMemory`] leave `C`
//! untouched. An allocation failure can surface after earlier blocks were
//! already committed to `C`; the call is not transactional.

use thiserror::Error;

/// Errors that can occur during gemmly operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GemmError {
    /// Operand dimensions are incompatible, or a buffer is too small for the
    /// view described over it.
    #[error("Shape mismatch: {message}")]
    ShapeMismatch {
        /// Human-readable error message.
        message: String,
    },
    /// A stride is zero on a dimension longer than one, or a leading
    /// dimension is smaller than the minor extent of a dense view.
    #[error("Invalid stride for operand {operand}: stride {stride} with extent {extent} ({message})")]
    InvalidStride {
        /// Which operand carried the bad stride (`"A"`, `"B"` or `"C"`).
        operand: &'static str,
        /// The offending stride.
        stride: isize,
        /// The extent the stride has to cover.
        extent: usize,
        /// Human-readable error message.
        message: String,
    },
    /// A packing buffer could not be allocated.
    #[error("Memory allocation failed (requested {requested_size} bytes with {requested_alignment} byte alignment)")]
    OutOfMemory {
        /// The size that was requested to be allocated.
        requested_size: usize,
        /// The alignment that was requested.
        requested_alignment: usize,
    },
    /// No kernel or configuration exists for the requested combination.
    #[error("Unsupported configuration: {message}")]
    UnsupportedConfiguration {
        /// Human-readable error message.
        message: String,
    },
}

/// Result type alias for gemmly operations.
pub type Result<T> = std::result::Result<T, GemmError>;

/// Creates a shape mismatch error.
pub fn shape_mismatch(message: impl Into<String>) -> GemmError {
    GemmError::ShapeMismatch {
        message: message.into(),
    }
}

/// Creates an invalid stride error.
pub fn invalid_stride(
    operand: &'static str,
    stride: isize,
    extent: usize,
    message: impl Into<String>,
) -> GemmError {
    GemmError::InvalidStride {
        operand,
        stride,
        extent,
        message: message.into(),
    }
}

/// Creates an allocation error.
pub fn out_of_memory(size: usize, alignment: usize) -> GemmError {
    GemmError::OutOfMemory {
        requested_size: size,
        requested_alignment: alignment,
    }
}

/// Creates an unsupported configuration error.
pub fn unsupported(message: impl Into<String>) -> GemmError {
    GemmError::UnsupportedConfiguration {
        message: message.into(),
    }
}
