//! Reordering of flat, row-major multi-dimensional buffers.
//!
//! Source products frequently store vertical profiles top-down where the normalized
//! product wants them bottom-up (or the other way around), or store a `[level, time]`
//! array where a `[time, level]` one is required. The functions here reorder a buffer
//! in place given the dimension vector the caller uses to interpret it. The dimension
//! vector is never stored with the buffer, so every function first checks that the
//! buffer length equals the product of the dimensions and fails without touching the
//! data if it does not.
use itertools::Itertools;
use ndarray::{ArrayView, ArrayViewMut, Axis, Ix1, IxDyn};

use crate::buffer::alloc_buffer;
use crate::error::ArrayError;

/// Number of elements described by a dimension vector
pub fn num_elements(dims: &[usize]) -> usize {
    dims.iter().product()
}

/// Check that a buffer of `len` elements is described exactly by `dims`.
pub fn check_num_elements(len: usize, dims: &[usize]) -> Result<(), ArrayError> {
    if num_elements(dims) != len {
        return Err(ArrayError::num_elements_mismatch(dims, len));
    }
    Ok(())
}

/// Reverse the order of elements along `axis`, holding all other axes fixed.
///
/// For every combination of indices on the other axes, the element at index `k`
/// along `axis` ends up at index `dims[axis] - 1 - k`. Inverting twice restores the
/// original buffer.
///
/// # Errors
/// * [`ArrayError::InvalidAxis`] if `axis >= dims.len()`,
/// * [`ArrayError::NumElementsMismatch`] if `data.len()` is not the product of `dims`.
///
/// The buffer is unchanged if an error is returned.
pub fn invert<T>(data: &mut [T], axis: usize, dims: &[usize]) -> Result<(), ArrayError> {
    if axis >= dims.len() {
        return Err(ArrayError::InvalidAxis {
            axis,
            ndim: dims.len(),
        });
    }
    check_num_elements(data.len(), dims)?;

    let length = dims[axis];
    if length <= 1 {
        return Ok(());
    }

    let mut view = ArrayViewMut::from_shape(IxDyn(dims), data)?;
    for lane in view.lanes_mut(Axis(axis)) {
        let mut lane = lane.into_dimensionality::<Ix1>()?;
        for j in 0..length / 2 {
            lane.swap(j, length - 1 - j);
        }
    }
    Ok(())
}

/// Permute the axes of a buffer and return the dimensions of the result.
///
/// If `order` is `None`, the axes are reversed, so a `[10, 20, 30]` array becomes a
/// `[30, 20, 10]` one. Otherwise `order[i]` gives the source axis that becomes axis `i`
/// of the result, e.g. an order of `[1, 0, 2]` turns `[10, 20, 30]` into `[20, 10, 30]`.
///
/// # Errors
/// * [`ArrayError::InvalidPermutation`] if `order` is not a permutation of `0..dims.len()`,
/// * [`ArrayError::NumElementsMismatch`] if `data.len()` is not the product of `dims`,
/// * [`ArrayError::OutOfMemory`] if the scratch copy cannot be allocated.
pub fn permute_axes<T: Clone>(
    data: &mut [T],
    dims: &[usize],
    order: Option<&[usize]>,
) -> Result<Vec<usize>, ArrayError> {
    check_num_elements(data.len(), dims)?;
    permute_leading(data, dims, order)
}

/// Exchange two axes of a buffer, e.g. turn a `[K, N]` array into an `[N, K]` one.
/// Returns the dimensions of the result.
pub fn swap_axes<T: Clone>(
    data: &mut [T],
    dims: &[usize],
    axis_a: usize,
    axis_b: usize,
) -> Result<Vec<usize>, ArrayError> {
    let order = swap_order(dims.len(), axis_a, axis_b)?;
    permute_axes(data, dims, Some(&order))
}

/// Permute the axes of the leading `product(view_dims)` elements of `data`.
///
/// This allows one allocation to be reused for differently shaped views, as when a
/// buffer sized for the largest variable of a product is used to read a smaller one.
/// Elements past the view are left untouched.
///
/// # Errors
/// As [`permute_axes`], except that a buffer longer than the view is accepted and
/// a shorter one gives [`ArrayError::BufferTooSmall`].
pub fn permute_axes_prefix<T: Clone>(
    data: &mut [T],
    view_dims: &[usize],
    order: Option<&[usize]>,
) -> Result<Vec<usize>, ArrayError> {
    let required = num_elements(view_dims);
    if data.len() < required {
        return Err(ArrayError::BufferTooSmall {
            required,
            actual: data.len(),
        });
    }
    permute_leading(&mut data[..required], view_dims, order)
}

/// Two-axis form of [`permute_axes_prefix`].
pub fn swap_axes_prefix<T: Clone>(
    data: &mut [T],
    view_dims: &[usize],
    axis_a: usize,
    axis_b: usize,
) -> Result<Vec<usize>, ArrayError> {
    let order = swap_order(view_dims.len(), axis_a, axis_b)?;
    permute_axes_prefix(data, view_dims, Some(&order))
}

fn permute_leading<T: Clone>(
    data: &mut [T],
    dims: &[usize],
    order: Option<&[usize]>,
) -> Result<Vec<usize>, ArrayError> {
    let order = match order {
        Some(o) => {
            validate_order(o, dims.len())?;
            o.to_vec()
        }
        None => (0..dims.len()).rev().collect_vec(),
    };
    let new_dims = order.iter().map(|&i| dims[i]).collect_vec();

    if dims.len() <= 1 || data.len() <= 1 {
        return Ok(new_dims);
    }

    let mut permuted = alloc_buffer::<T>(data.len())?;
    {
        let view = ArrayView::from_shape(IxDyn(dims), &*data)?;
        // Iteration over a permuted view is in the logical (row-major) order of the result.
        permuted.extend(view.permuted_axes(IxDyn(&order)).iter().cloned());
    }
    data.clone_from_slice(&permuted);
    Ok(new_dims)
}

fn validate_order(order: &[usize], ndim: usize) -> Result<(), ArrayError> {
    if order.len() != ndim {
        return Err(ArrayError::invalid_permutation(
            order,
            format!("expected {ndim} axes, got {}", order.len()),
        ));
    }

    let mut seen = vec![false; ndim];
    for (i, &axis) in order.iter().enumerate() {
        if axis >= ndim {
            return Err(ArrayError::invalid_permutation(
                order,
                format!("dimension index '{axis}' out of bounds at index {i}"),
            ));
        }
        if seen[axis] {
            return Err(ArrayError::invalid_permutation(
                order,
                format!("duplicate dimension index '{axis}' at index {i}"),
            ));
        }
        seen[axis] = true;
    }
    Ok(())
}

fn swap_order(ndim: usize, axis_a: usize, axis_b: usize) -> Result<Vec<usize>, ArrayError> {
    for axis in [axis_a, axis_b] {
        if axis >= ndim {
            return Err(ArrayError::InvalidAxis { axis, ndim });
        }
    }
    let mut order = (0..ndim).collect_vec();
    order.swap(axis_a, axis_b);
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_invert_1d() {
        let mut data = vec![0, 1, 2, 3, 4];
        invert(&mut data, 0, &[5]).unwrap();
        assert_eq!(data, [4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_invert_inner_axis() {
        // [2, 3] -> each row reversed
        let mut data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        invert(&mut data, 1, &[2, 3]).unwrap();
        assert_eq!(data, [3.0, 2.0, 1.0, 6.0, 5.0, 4.0]);
    }

    #[test]
    fn test_invert_outer_axis() {
        // [2, 3] -> rows swapped
        let mut data = vec![1, 2, 3, 4, 5, 6];
        invert(&mut data, 0, &[2, 3]).unwrap();
        assert_eq!(data, [4, 5, 6, 1, 2, 3]);
    }

    #[test]
    fn test_invert_middle_axis_matches_coordinates() {
        let dims = [2, 4, 3];
        let original = (0..24).collect_vec();
        let mut data = original.clone();
        invert(&mut data, 1, &dims).unwrap();

        for i in 0..dims[0] {
            for k in 0..dims[1] {
                for m in 0..dims[2] {
                    let old = (i * dims[1] + k) * dims[2] + m;
                    let new = (i * dims[1] + (dims[1] - 1 - k)) * dims[2] + m;
                    assert_eq!(data[new], original[old], "mismatch at ({i}, {k}, {m})");
                }
            }
        }
    }

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(2)]
    fn test_invert_twice_is_identity(#[case] axis: usize) {
        let dims = [3, 5, 2];
        let original = (0..30).map(|v| v as f32 * 0.5).collect_vec();
        let mut data = original.clone();
        invert(&mut data, axis, &dims).unwrap();
        assert_ne!(data, original);
        invert(&mut data, axis, &dims).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_invert_errors_leave_data_untouched() {
        let mut data = vec![1, 2, 3, 4, 5];
        let err = invert(&mut data, 0, &[2, 3]).unwrap_err();
        assert!(matches!(
            err,
            ArrayError::NumElementsMismatch {
                expected: 6,
                actual: 5,
                ..
            }
        ));
        assert_eq!(data, [1, 2, 3, 4, 5]);

        let err = invert(&mut data, 1, &[5]).unwrap_err();
        assert_eq!(err, ArrayError::InvalidAxis { axis: 1, ndim: 1 });
    }

    #[test]
    fn test_transpose_2d() {
        let mut data = vec![1, 2, 3, 4, 5, 6];
        let dims = swap_axes(&mut data, &[2, 3], 0, 1).unwrap();
        assert_eq!(dims, [3, 2]);
        assert_eq!(data, [1, 4, 2, 5, 3, 6]);
    }

    #[test]
    fn test_transpose_twice_restores() {
        let original = (0..12).collect_vec();
        let mut data = original.clone();
        let dims = swap_axes(&mut data, &[3, 4], 0, 1).unwrap();
        let dims = swap_axes(&mut data, &dims, 0, 1).unwrap();
        assert_eq!(dims, [3, 4]);
        assert_eq!(data, original);
    }

    #[test]
    fn test_permute_default_reverses_axes() {
        let mut data = (0..24).collect_vec();
        let dims = permute_axes(&mut data, &[2, 3, 4], None).unwrap();
        assert_eq!(dims, [4, 3, 2]);
        // element (i, j, k) of the source lands on (k, j, i)
        assert_eq!(data[1], 12);
        assert_eq!(data[2], 4);
        assert_eq!(data[6], 1);
    }

    #[test]
    fn test_permute_explicit_order() {
        let mut data = (0..24).collect_vec();
        let dims = permute_axes(&mut data, &[2, 3, 4], Some(&[1, 0, 2])).unwrap();
        assert_eq!(dims, [3, 2, 4]);
        // (j, i, k) <- (i, j, k)
        assert_eq!(&data[0..8], &[0, 1, 2, 3, 12, 13, 14, 15]);
    }

    #[rstest]
    #[case(&[0, 0, 1])]
    #[case(&[0, 3, 1])]
    #[case(&[0, 1])]
    fn test_permute_invalid_orders(#[case] order: &[usize]) {
        let mut data = (0..24).collect_vec();
        let err = permute_axes(&mut data, &[2, 3, 4], Some(order)).unwrap_err();
        assert!(matches!(err, ArrayError::InvalidPermutation { .. }));
        assert_eq!(data, (0..24).collect_vec());
    }

    #[test]
    fn test_transpose_prefix_override() {
        // buffer sized for 8 elements, view of [2, 3] uses the first 6
        let mut data = vec![1, 2, 3, 4, 5, 6, 70, 80];
        let dims = swap_axes_prefix(&mut data, &[2, 3], 0, 1).unwrap();
        assert_eq!(dims, [3, 2]);
        assert_eq!(data, [1, 4, 2, 5, 3, 6, 70, 80]);

        let err = swap_axes_prefix(&mut data, &[3, 3], 0, 1).unwrap_err();
        assert_eq!(
            err,
            ArrayError::BufferTooSmall {
                required: 9,
                actual: 8
            }
        );
    }

    #[test]
    fn test_degenerate_transposes() {
        let mut data = vec![5];
        assert_eq!(permute_axes(&mut data, &[1, 1], None).unwrap(), [1, 1]);
        let mut data = vec![1, 2, 3];
        assert_eq!(permute_axes(&mut data, &[3], None).unwrap(), [3]);
        assert_eq!(data, [1, 2, 3]);
    }
}
