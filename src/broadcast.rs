//! Replication of lower-rank arrays across an extra trailing dimension.
//!
//! Some quantities are stored once per scanline but the normalized product declares them
//! per ground pixel. Rather than allocating a second buffer, the reader reads the
//! per-scanline values into the front of a buffer already sized for the per-pixel
//! variable and expands them in place.
use crate::error::ArrayError;

/// Expand the first `outer` values of `data` so that `data` holds an `[outer, inner]`
/// array whose row `i` is `inner` copies of the original `data[i]`.
///
/// Rows are filled from last to first: row `i` only overwrites slots at or after `i`,
/// and the source for every row before `i` sits at an index below `i`, so no source
/// value is clobbered before it is used.
///
/// # Errors
/// Returns [`ArrayError::BufferTooSmall`] if `data` has fewer than `outer * inner`
/// elements. Extra trailing elements are left untouched.
pub fn broadcast<T: Copy>(data: &mut [T], outer: usize, inner: usize) -> Result<(), ArrayError> {
    let required = outer.checked_mul(inner).ok_or(ArrayError::BufferTooSmall {
        required: usize::MAX,
        actual: data.len(),
    })?;
    if data.len() < required {
        return Err(ArrayError::BufferTooSmall {
            required,
            actual: data.len(),
        });
    }

    for i in (0..outer).rev() {
        let value = data[i];
        data[i * inner..(i + 1) * inner].fill(value);
    }
    Ok(())
}

/// Three level form of [`broadcast`] for products with a `[lines, for, fov]` layout
/// where the source holds one value per `(line, for)` pair.
pub fn broadcast_nested<T: Copy>(
    data: &mut [T],
    num_lines: usize,
    num_for: usize,
    num_fov: usize,
) -> Result<(), ArrayError> {
    let outer = num_lines.checked_mul(num_for).ok_or(ArrayError::BufferTooSmall {
        required: usize::MAX,
        actual: data.len(),
    })?;
    broadcast(data, outer, num_fov)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_scanlines() {
        let mut data = vec![10.0, 20.0, 0.0, 0.0, 0.0, 0.0];
        broadcast(&mut data, 2, 3).unwrap();
        assert_eq!(data, [10.0, 10.0, 10.0, 20.0, 20.0, 20.0]);
    }

    #[test]
    fn test_broadcast_uninitialized_tail() {
        // Values past `outer` are garbage until they are overwritten
        let mut data = vec![1i16, 2, 3, -7, -7, -7, -7, -7];
        broadcast(&mut data, 3, 2).unwrap();
        assert_eq!(data, [1, 1, 2, 2, 3, 3, -7, -7]);
    }

    #[test]
    fn test_broadcast_inner_one_is_identity() {
        let mut data = vec![4, 5, 6];
        broadcast(&mut data, 3, 1).unwrap();
        assert_eq!(data, [4, 5, 6]);
    }

    #[test]
    fn test_broadcast_too_small() {
        let mut data = vec![1.0f32; 5];
        let err = broadcast(&mut data, 2, 3).unwrap_err();
        assert_eq!(
            err,
            ArrayError::BufferTooSmall {
                required: 6,
                actual: 5
            }
        );
    }

    #[test]
    fn test_broadcast_nested() {
        let mut data = vec![0.0; 8];
        data[..4].copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        broadcast_nested(&mut data, 2, 2, 2).unwrap();
        assert_eq!(data, [1.0, 1.0, 2.0, 2.0, 3.0, 3.0, 4.0, 4.0]);
    }
}
