//! Replacement of format-declared fill values with NaN.
//!
//! Source formats mark missing data with a sentinel value declared per variable,
//! either in the format metadata or by convention. Normalized products use NaN
//! instead, so each floating point variable is passed through one of these functions
//! after it is read. Integer variables keep their sentinels.
use num_traits::Float;

/// Replace every element exactly equal to `fill_value` with NaN and return the number
/// of replaced elements.
///
/// A NaN `fill_value` is already the normalized marker, so nothing is done. Since NaN never
/// compares equal to anything, running this again on its own output changes nothing.
pub fn replace_fill_value<F: Float>(values: &mut [F], fill_value: F) -> usize {
    if fill_value.is_nan() {
        return 0;
    }

    let mut n_changed = 0;
    for v in values.iter_mut().filter(|v| **v == fill_value) {
        *v = F::nan();
        n_changed += 1;
    }
    n_changed
}

/// Replace every element within `|fill_value| * relative_tolerance` of `fill_value` with
/// NaN and return the number of replaced elements.
///
/// This is for fill values of large magnitude that pick up rounding noise when decoded
/// from a scaled integer representation, so an exact comparison would miss some of them.
/// The tolerance belongs to the product format being read and comes from its
/// [`AdapterConfig`](crate::config::AdapterConfig).
pub fn replace_fill_value_approx<F: Float>(
    values: &mut [F],
    fill_value: F,
    relative_tolerance: F,
) -> usize {
    if fill_value.is_nan() {
        return 0;
    }

    let threshold = (fill_value * relative_tolerance).abs();
    let mut n_changed = 0;
    for v in values.iter_mut() {
        if (*v - fill_value).abs() <= threshold {
            *v = F::nan();
            n_changed += 1;
        }
    }
    n_changed
}

/// Replace every element outside the closed range `[valid_min, valid_max]` with NaN and
/// return the number of replaced elements. Either bound may be infinite to leave that
/// side open.
pub fn replace_values_outside<F: Float>(values: &mut [F], valid_min: F, valid_max: F) -> usize {
    let mut n_changed = 0;
    for v in values.iter_mut() {
        if *v < valid_min || *v > valid_max {
            *v = F::nan();
            n_changed += 1;
        }
    }
    n_changed
}
