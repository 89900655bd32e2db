//! Common errors across the harp-rs crate

use std::collections::TryReserveError;

use crate::buffer::DataType;

/// Errors from the array utilities (transforms, fills, broadcasts and buffer allocation)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ArrayError {
    #[error("Buffer has {actual} elements, but the dimensions {dims:?} describe {expected}")]
    NumElementsMismatch {
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("Buffer has {actual} elements, but at least {required} are needed")]
    BufferTooSmall { required: usize, actual: usize },
    #[error("Axis {axis} is out of bounds for an array with {ndim} dimensions")]
    InvalidAxis { axis: usize, ndim: usize },
    #[error("Invalid dimension order {order:?} for an array with {ndim} dimensions: {reason}")]
    InvalidPermutation {
        order: Vec<usize>,
        ndim: usize,
        reason: String,
    },
    #[error("Expected a {expected} value, got a {actual} value")]
    TypeMismatch { expected: DataType, actual: DataType },
    #[error("Out of memory (could not allocate {bytes} bytes)")]
    OutOfMemory { bytes: usize },
    #[error("Invalid array shape: {0}")]
    Shape(String),
}

impl ArrayError {
    pub(crate) fn num_elements_mismatch(dims: &[usize], actual: usize) -> Self {
        Self::NumElementsMismatch {
            dims: dims.to_vec(),
            expected: dims.iter().product(),
            actual,
        }
    }

    pub(crate) fn invalid_permutation<S: ToString>(order: &[usize], reason: S) -> Self {
        Self::InvalidPermutation {
            order: order.to_vec(),
            ndim: order.len(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn out_of_memory<T>(num_elements: usize, _cause: TryReserveError) -> Self {
        Self::OutOfMemory {
            bytes: num_elements.saturating_mul(std::mem::size_of::<T>()),
        }
    }
}

impl From<ndarray::ShapeError> for ArrayError {
    fn from(value: ndarray::ShapeError) -> Self {
        Self::Shape(value.to_string())
    }
}

/// The top-level error kinds surfaced by an ingestion.
///
/// These follow the taxonomy of the ingestion layer: anything that aborts the read
/// of a variable aborts the whole product, so there is no partial-success variant.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Ingestion error: {0}")]
    Structural(String),
    #[error("Out of memory: {0}")]
    OutOfMemory(String),
    #[error("Unit conversion error: {0}")]
    UnitConversion(String),
    #[error("Error reading from the source product: {0}")]
    Source(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("{0}")]
    Context(String),
}

impl IngestError {
    pub(crate) fn structural<S: ToString>(msg: S) -> Self {
        Self::Structural(msg.to_string())
    }
}

impl From<ArrayError> for IngestError {
    fn from(value: ArrayError) -> Self {
        match value {
            ArrayError::OutOfMemory { .. } => Self::OutOfMemory(value.to_string()),
            _ => Self::Structural(value.to_string()),
        }
    }
}

impl From<crate::units::UnitError> for IngestError {
    fn from(value: crate::units::UnitError) -> Self {
        Self::UnitConversion(value.to_string())
    }
}

impl From<crate::hybrid::HybridError> for IngestError {
    fn from(value: crate::hybrid::HybridError) -> Self {
        match value {
            crate::hybrid::HybridError::Array(inner) => inner.into(),
            other => Self::Structural(other.to_string()),
        }
    }
}

impl From<crate::product::ProductError> for IngestError {
    fn from(value: crate::product::ProductError) -> Self {
        match value {
            crate::product::ProductError::Array { source, .. } => source.into(),
            other => Self::Structural(other.to_string()),
        }
    }
}

impl From<crate::source::SourceError> for IngestError {
    fn from(value: crate::source::SourceError) -> Self {
        Self::Source(value.to_string())
    }
}

impl From<crate::config::ConfigError> for IngestError {
    fn from(value: crate::config::ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}

/// Lift a leaf error into an [`error_stack::Report`] of [`IngestError`].
pub(crate) trait IntoIngestReport<T> {
    fn into_ingest(self) -> error_stack::Result<T, IngestError>;
}

impl<T, E> IntoIngestReport<T> for Result<T, E>
where
    E: Into<IngestError>,
{
    fn into_ingest(self) -> error_stack::Result<T, IngestError> {
        self.map_err(|e| error_stack::Report::new(e.into()))
    }
}
