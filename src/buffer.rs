//! Typed numeric buffers that carry the values of one variable through an ingestion.
//!
//! A [`TypedBuffer`] is a flat, row-major sequence of one of the five primitive types
//! that ingested variables can have. The logical shape of the buffer is not stored here;
//! callers pass a dimension vector alongside it to the array utilities, which check
//! that the product of the dimensions matches the buffer length.
use num_traits::Float;

use crate::arrays;
use crate::broadcast;
use crate::error::ArrayError;
use crate::fills;
use crate::units::UnitConverter;

/// The primitive element types a variable can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Float,
    Double,
}

impl DataType {
    /// Size in bytes of a single element of this type
    pub fn element_size(&self) -> usize {
        match self {
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 => 4,
            DataType::Float => 4,
            DataType::Double => 8,
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }
}

/// A single value of one of the [`DataType`]s, e.g. a declared fill value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Float(f32),
    Double(f64),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Int8(_) => DataType::Int8,
            Scalar::Int16(_) => DataType::Int16,
            Scalar::Int32(_) => DataType::Int32,
            Scalar::Float(_) => DataType::Float,
            Scalar::Double(_) => DataType::Double,
        }
    }

    /// The value used to mark missing data for a type: NaN for floating point types
    /// and 0 for integers.
    pub fn missing_for(data_type: DataType) -> Self {
        match data_type {
            DataType::Int8 => Scalar::Int8(0),
            DataType::Int16 => Scalar::Int16(0),
            DataType::Int32 => Scalar::Int32(0),
            DataType::Float => Scalar::Float(f32::NAN),
            DataType::Double => Scalar::Double(f64::NAN),
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Scalar::Int8(v) => f64::from(*v),
            Scalar::Int16(v) => f64::from(*v),
            Scalar::Int32(v) => f64::from(*v),
            Scalar::Float(v) => f64::from(*v),
            Scalar::Double(v) => *v,
        }
    }

    /// Convert the value to `data_type`, e.g. to match a fill value declared as a float
    /// to data that was read as double. Conversions to integer types saturate.
    pub fn cast(&self, data_type: DataType) -> Scalar {
        if self.data_type() == data_type {
            return *self;
        }
        let v = self.as_f64();
        match data_type {
            DataType::Int8 => Scalar::Int8(v as i8),
            DataType::Int16 => Scalar::Int16(v as i16),
            DataType::Int32 => Scalar::Int32(v as i32),
            DataType::Float => Scalar::Float(v as f32),
            DataType::Double => Scalar::Double(v),
        }
    }
}

/// A flat buffer of values of a single [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl TypedBuffer {
    /// Allocate a buffer of `num_elements` values, all set to the missing marker for
    /// `data_type`.
    ///
    /// # Errors
    /// Returns [`ArrayError::OutOfMemory`] if the allocation cannot be made.
    pub fn null(data_type: DataType, num_elements: usize) -> Result<Self, ArrayError> {
        let buf = match data_type {
            DataType::Int8 => Self::Int8(alloc_filled(num_elements, 0)?),
            DataType::Int16 => Self::Int16(alloc_filled(num_elements, 0)?),
            DataType::Int32 => Self::Int32(alloc_filled(num_elements, 0)?),
            DataType::Float => Self::Float(alloc_filled(num_elements, f32::NAN)?),
            DataType::Double => Self::Double(alloc_filled(num_elements, f64::NAN)?),
        };
        Ok(buf)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            TypedBuffer::Int8(_) => DataType::Int8,
            TypedBuffer::Int16(_) => DataType::Int16,
            TypedBuffer::Int32(_) => DataType::Int32,
            TypedBuffer::Float(_) => DataType::Float,
            TypedBuffer::Double(_) => DataType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::Int8(v) => v.len(),
            TypedBuffer::Int16(v) => v.len(),
            TypedBuffer::Int32(v) => v.len(),
            TypedBuffer::Float(v) => v.len(),
            TypedBuffer::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        if let Self::Float(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        if let Self::Double(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        if let Self::Int32(v) = self {
            Some(v)
        } else {
            None
        }
    }

    pub fn as_f64_mut(&mut self) -> Option<&mut Vec<f64>> {
        if let Self::Double(v) = self {
            Some(v)
        } else {
            None
        }
    }

    /// Convert the buffer to double precision, consuming it.
    ///
    /// Integer values convert exactly; single precision floats are widened, so NaNs stay NaNs.
    pub fn into_double(self) -> Vec<f64> {
        match self {
            TypedBuffer::Int8(v) => v.into_iter().map(f64::from).collect(),
            TypedBuffer::Int16(v) => v.into_iter().map(f64::from).collect(),
            TypedBuffer::Int32(v) => v.into_iter().map(f64::from).collect(),
            TypedBuffer::Float(v) => v.into_iter().map(f64::from).collect(),
            TypedBuffer::Double(v) => v,
        }
    }

    /// Reverse the order of the elements along `axis`, see [`arrays::invert`].
    pub fn invert(&mut self, axis: usize, dims: &[usize]) -> Result<(), ArrayError> {
        match self {
            TypedBuffer::Int8(v) => arrays::invert(v, axis, dims),
            TypedBuffer::Int16(v) => arrays::invert(v, axis, dims),
            TypedBuffer::Int32(v) => arrays::invert(v, axis, dims),
            TypedBuffer::Float(v) => arrays::invert(v, axis, dims),
            TypedBuffer::Double(v) => arrays::invert(v, axis, dims),
        }
    }

    /// Permute the axes of the buffer, see [`arrays::permute_axes`]. Returns the new dimensions.
    pub fn permute_axes(
        &mut self,
        dims: &[usize],
        order: Option<&[usize]>,
    ) -> Result<Vec<usize>, ArrayError> {
        match self {
            TypedBuffer::Int8(v) => arrays::permute_axes(v, dims, order),
            TypedBuffer::Int16(v) => arrays::permute_axes(v, dims, order),
            TypedBuffer::Int32(v) => arrays::permute_axes(v, dims, order),
            TypedBuffer::Float(v) => arrays::permute_axes(v, dims, order),
            TypedBuffer::Double(v) => arrays::permute_axes(v, dims, order),
        }
    }

    /// Exchange two axes of the buffer, see [`arrays::swap_axes`]. Returns the new dimensions.
    pub fn swap_axes(
        &mut self,
        dims: &[usize],
        axis_a: usize,
        axis_b: usize,
    ) -> Result<Vec<usize>, ArrayError> {
        match self {
            TypedBuffer::Int8(v) => arrays::swap_axes(v, dims, axis_a, axis_b),
            TypedBuffer::Int16(v) => arrays::swap_axes(v, dims, axis_a, axis_b),
            TypedBuffer::Int32(v) => arrays::swap_axes(v, dims, axis_a, axis_b),
            TypedBuffer::Float(v) => arrays::swap_axes(v, dims, axis_a, axis_b),
            TypedBuffer::Double(v) => arrays::swap_axes(v, dims, axis_a, axis_b),
        }
    }

    /// Replace every element equal to `fill_value` with NaN.
    ///
    /// Integer buffers keep their sentinel values and are left untouched. Returns the
    /// number of replaced elements.
    ///
    /// # Errors
    /// Returns [`ArrayError::TypeMismatch`] if `fill_value` is not of this buffer's type.
    pub fn replace_fill_value(&mut self, fill_value: Scalar) -> Result<usize, ArrayError> {
        self.check_scalar_type(&fill_value)?;
        let n = match (self, fill_value) {
            (TypedBuffer::Float(v), Scalar::Float(fill)) => fills::replace_fill_value(v, fill),
            (TypedBuffer::Double(v), Scalar::Double(fill)) => fills::replace_fill_value(v, fill),
            _ => 0,
        };
        Ok(n)
    }

    /// Like [`TypedBuffer::replace_fill_value`], but treats values within
    /// `|fill| * relative_tolerance` of the fill value as fills.
    pub fn replace_fill_value_approx(
        &mut self,
        fill_value: Scalar,
        relative_tolerance: f64,
    ) -> Result<usize, ArrayError> {
        self.check_scalar_type(&fill_value)?;
        let n = match (self, fill_value) {
            (TypedBuffer::Float(v), Scalar::Float(fill)) => {
                fills::replace_fill_value_approx(v, fill, relative_tolerance as f32)
            }
            (TypedBuffer::Double(v), Scalar::Double(fill)) => {
                fills::replace_fill_value_approx(v, fill, relative_tolerance)
            }
            _ => 0,
        };
        Ok(n)
    }

    /// Replace values outside `[valid_min, valid_max]` with NaN. Integer buffers are left
    /// untouched. Returns the number of replaced elements.
    pub fn replace_values_outside(&mut self, valid_min: f64, valid_max: f64) -> usize {
        match self {
            TypedBuffer::Float(v) => {
                fills::replace_values_outside(v, valid_min as f32, valid_max as f32)
            }
            TypedBuffer::Double(v) => fills::replace_values_outside(v, valid_min, valid_max),
            _ => 0,
        }
    }

    /// Convert every value with `converter`. Only floating point buffers can be converted.
    pub fn convert_unit(&mut self, converter: &UnitConverter) -> Result<(), ArrayError> {
        match self {
            TypedBuffer::Float(v) => converter.convert_slice(v),
            TypedBuffer::Double(v) => converter.convert_slice(v),
            other => {
                return Err(ArrayError::TypeMismatch {
                    expected: DataType::Double,
                    actual: other.data_type(),
                })
            }
        }
        Ok(())
    }

    /// Replicate each of the first `outer` values across `inner` consecutive slots,
    /// growing the buffer to `outer * inner` elements. See [`broadcast::broadcast`].
    pub fn broadcast(&mut self, outer: usize, inner: usize) -> Result<(), ArrayError> {
        match self {
            TypedBuffer::Int8(v) => grow_and_broadcast(v, outer, inner),
            TypedBuffer::Int16(v) => grow_and_broadcast(v, outer, inner),
            TypedBuffer::Int32(v) => grow_and_broadcast(v, outer, inner),
            TypedBuffer::Float(v) => grow_and_broadcast(v, outer, inner),
            TypedBuffer::Double(v) => grow_and_broadcast(v, outer, inner),
        }
    }

    /// Multiply every floating point element by `factor`. Integer buffers are rejected,
    /// since scaling them would silently truncate.
    pub fn scale(&mut self, factor: f64) -> Result<(), ArrayError> {
        match self {
            TypedBuffer::Float(v) => scale_values(v, factor as f32),
            TypedBuffer::Double(v) => scale_values(v, factor),
            other => {
                return Err(ArrayError::TypeMismatch {
                    expected: DataType::Double,
                    actual: other.data_type(),
                })
            }
        }
        Ok(())
    }

    fn check_scalar_type(&self, value: &Scalar) -> Result<(), ArrayError> {
        if value.data_type() != self.data_type() {
            return Err(ArrayError::TypeMismatch {
                expected: self.data_type(),
                actual: value.data_type(),
            });
        }
        Ok(())
    }
}

impl From<Vec<i8>> for TypedBuffer {
    fn from(value: Vec<i8>) -> Self {
        Self::Int8(value)
    }
}

impl From<Vec<i16>> for TypedBuffer {
    fn from(value: Vec<i16>) -> Self {
        Self::Int16(value)
    }
}

impl From<Vec<i32>> for TypedBuffer {
    fn from(value: Vec<i32>) -> Self {
        Self::Int32(value)
    }
}

impl From<Vec<f32>> for TypedBuffer {
    fn from(value: Vec<f32>) -> Self {
        Self::Float(value)
    }
}

impl From<Vec<f64>> for TypedBuffer {
    fn from(value: Vec<f64>) -> Self {
        Self::Double(value)
    }
}

/// Allocate a vector with room for exactly `num_elements` values, reporting an
/// allocation failure as an error instead of aborting.
pub fn alloc_buffer<T>(num_elements: usize) -> Result<Vec<T>, ArrayError> {
    let mut v = Vec::new();
    v.try_reserve_exact(num_elements)
        .map_err(|e| ArrayError::out_of_memory::<T>(num_elements, e))?;
    Ok(v)
}

/// Allocate a vector of `num_elements` copies of `value`, see [`alloc_buffer`].
pub fn alloc_filled<T: Clone>(num_elements: usize, value: T) -> Result<Vec<T>, ArrayError> {
    let mut v = alloc_buffer(num_elements)?;
    v.resize(num_elements, value);
    Ok(v)
}

fn grow_and_broadcast<T: Copy + Default>(
    v: &mut Vec<T>,
    outer: usize,
    inner: usize,
) -> Result<(), ArrayError> {
    let required = outer.saturating_mul(inner);
    if v.len() < outer {
        return Err(ArrayError::BufferTooSmall {
            required: outer,
            actual: v.len(),
        });
    }
    if v.len() < required {
        let extra = required - v.len();
        v.try_reserve_exact(extra)
            .map_err(|e| ArrayError::out_of_memory::<T>(required, e))?;
        v.resize(required, T::default());
    }
    broadcast::broadcast(v, outer, inner)?;
    v.truncate(required);
    Ok(())
}

fn scale_values<F: Float>(values: &mut [F], factor: F) {
    values.iter_mut().for_each(|v| *v = *v * factor);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_null_buffers() {
        let buf = TypedBuffer::null(DataType::Double, 3).unwrap();
        assert_eq!(buf.len(), 3);
        assert!(buf.as_f64().unwrap().iter().all(|v| v.is_nan()));

        let buf = TypedBuffer::null(DataType::Int16, 2).unwrap();
        assert_eq!(buf, TypedBuffer::Int16(vec![0, 0]));
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let err = alloc_buffer::<f64>(usize::MAX).unwrap_err();
        assert_eq!(err, ArrayError::OutOfMemory { bytes: usize::MAX });

        // Too large for the address space, but the byte count does not saturate
        let n = usize::MAX / 16;
        let err = TypedBuffer::null(DataType::Double, n).unwrap_err();
        assert_eq!(err, ArrayError::OutOfMemory { bytes: n * 8 });

        let err = TypedBuffer::null(DataType::Int8, usize::MAX).unwrap_err();
        assert_eq!(err, ArrayError::OutOfMemory { bytes: usize::MAX });

        let err: crate::error::IngestError = err.into();
        assert!(matches!(err, crate::error::IngestError::OutOfMemory(_)));
        assert!(err.to_string().contains(&usize::MAX.to_string()));
    }

    #[test]
    fn test_data_type_names() {
        assert_eq!(DataType::Double.to_string(), "double");
        assert_eq!(DataType::from_str("int32").unwrap(), DataType::Int32);
        assert_eq!(DataType::Float.element_size(), 4);
        assert!(!DataType::Int8.is_floating());
    }

    #[test]
    fn test_fill_type_mismatch() {
        let mut buf = TypedBuffer::Double(vec![1.0, -9999.0]);
        let err = buf.replace_fill_value(Scalar::Float(-9999.0)).unwrap_err();
        assert_eq!(
            err,
            ArrayError::TypeMismatch {
                expected: DataType::Double,
                actual: DataType::Float
            }
        );
    }

    #[test]
    fn test_integer_fill_is_retained() {
        let mut buf = TypedBuffer::Int32(vec![1, -1, 3]);
        let n = buf.replace_fill_value(Scalar::Int32(-1)).unwrap();
        assert_eq!(n, 0);
        assert_eq!(buf, TypedBuffer::Int32(vec![1, -1, 3]));
    }

    #[test]
    fn test_scalar_cast() {
        assert_eq!(Scalar::Float(-999.0).cast(DataType::Double), Scalar::Double(-999.0));
        assert_eq!(Scalar::Double(1e10).cast(DataType::Int16), Scalar::Int16(i16::MAX));
        assert_eq!(Scalar::Int8(3).cast(DataType::Int8), Scalar::Int8(3));
    }

    #[test]
    fn test_broadcast_grows_buffer() {
        let mut buf = TypedBuffer::Int8(vec![1, 2]);
        buf.broadcast(2, 3).unwrap();
        assert_eq!(buf, TypedBuffer::Int8(vec![1, 1, 1, 2, 2, 2]));
    }

    #[test]
    fn test_into_double() {
        let buf = TypedBuffer::Float(vec![1.5, f32::NAN]);
        let v = buf.into_double();
        approx::assert_abs_diff_eq!(v[0], 1.5);
        assert!(v[1].is_nan());
    }

    #[test]
    fn test_scale_rejects_integers() {
        let mut buf = TypedBuffer::Int16(vec![1, 2]);
        assert!(buf.scale(100.0).is_err());

        let mut buf = TypedBuffer::Double(vec![1.0, 2.5]);
        buf.scale(100.0).unwrap();
        assert_eq!(buf, TypedBuffer::Double(vec![100.0, 250.0]));
    }
}
