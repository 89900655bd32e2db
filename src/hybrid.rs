//! Pressure on hybrid sigma-pressure levels.
//!
//! Model levels in the ingested products are given as a pair of coefficient tables `(a, b)`
//! that are the same for every profile, plus one surface pressure per profile. The pressure
//! of level `j` in profile `i` is `a[j] + b[j] * surface_pressure[i]`. All functions here
//! return flat row-major buffers with the profile as the outermost dimension.
//!
//! Surface pressures must already be in the unit of the `a` coefficients (usually Pa).
use itertools::iproduct;

use crate::buffer::alloc_buffer;
use crate::error::ArrayError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HybridError {
    #[error("The a and b coefficient tables have different lengths ({a} and {b})")]
    CoefficientLengthMismatch { a: usize, b: usize },
    #[error("A packed coefficient array must have an even number of values, got {0}")]
    OddPackedLength(usize),
    #[error("At least two levels are needed to define a layer, got {0}")]
    TooFewLevels(usize),
    #[error("Expected {expected} {what}, got {actual}")]
    CountMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Array(#[from] ArrayError),
}

/// The `(a, b)` coefficient tables of a hybrid vertical grid, one entry per level.
#[derive(Debug, Clone, PartialEq)]
pub struct HybridCoefficients {
    a: Vec<f64>,
    b: Vec<f64>,
}

impl HybridCoefficients {
    pub fn new(a: Vec<f64>, b: Vec<f64>) -> Result<Self, HybridError> {
        if a.len() != b.len() {
            return Err(HybridError::CoefficientLengthMismatch {
                a: a.len(),
                b: b.len(),
            });
        }
        Ok(Self { a, b })
    }

    /// Split a packed coefficient array `[a_0, ..., a_n, b_0, ..., b_n]`, as GRIB
    /// stores them in its `pv` (`coordinateValues`) key.
    pub fn from_packed(pv: &[f64]) -> Result<Self, HybridError> {
        if pv.len() % 2 != 0 {
            return Err(HybridError::OddPackedLength(pv.len()));
        }
        let (a, b) = pv.split_at(pv.len() / 2);
        Self::new(a.to_vec(), b.to_vec())
    }

    pub fn num_levels(&self) -> usize {
        self.a.len()
    }

    pub fn a(&self) -> &[f64] {
        &self.a
    }

    pub fn b(&self) -> &[f64] {
        &self.b
    }

    /// Pressure of a single level for one surface pressure
    pub fn pressure_at(&self, level: usize, surface_pressure: f64) -> Option<f64> {
        let a = self.a.get(level)?;
        let b = self.b.get(level)?;
        Some(a + b * surface_pressure)
    }

    /// Pressure of every level for every profile, shaped `[profiles, levels]`.
    pub fn level_pressures(&self, surface_pressure: &[f64]) -> Result<Vec<f64>, HybridError> {
        let mut out = alloc_profiles(surface_pressure.len(), self.num_levels())?;
        out.extend(
            iproduct!(surface_pressure, self.a.iter().zip(&self.b)).map(|(sp, (a, b))| a + b * sp),
        );
        Ok(out)
    }

    /// Lower and upper pressure bound of each layer between adjacent levels, shaped
    /// `[profiles, levels - 1, 2]`. Layer `j` is bounded by levels `j` and `j + 1`.
    ///
    /// If `toa_floor` is given, every level pressure of a profile that is below it (the top
    /// of the atmosphere, including several tied zero levels) is raised to it, so that a
    /// zero top level does not produce a zero pressure bound.
    pub fn layer_bounds(
        &self,
        surface_pressure: &[f64],
        toa_floor: Option<f64>,
    ) -> Result<Vec<f64>, HybridError> {
        let num_levels = self.num_levels();
        if num_levels < 2 {
            return Err(HybridError::TooFewLevels(num_levels));
        }
        let num_layers = num_levels - 1;

        let mut levels: Vec<f64> = alloc_buffer(num_levels)?;
        let mut out = alloc_profiles(surface_pressure.len(), num_layers.saturating_mul(2))?;
        for &sp in surface_pressure {
            levels.clear();
            levels.extend(self.a.iter().zip(&self.b).map(|(a, b)| a + b * sp));
            if let Some(floor) = toa_floor {
                clamp_top_of_atmosphere(&mut levels, floor);
            }
            for pair in levels.windows(2) {
                out.extend_from_slice(pair);
            }
        }
        Ok(out)
    }

    /// Pressure at the tropopause for each profile, shaped `[profiles]`.
    ///
    /// The tropopause is the boundary between level `k` and level `k + 1`, where `k` is the
    /// profile's entry in `layer_index`, and its pressure is the geometric mean of the two
    /// level pressures. Profiles whose index does not point at a level with another above
    /// it get NaN, since products legitimately have scenes without a tropopause.
    pub fn tropopause_pressure(
        &self,
        layer_index: &[i32],
        surface_pressure: &[f64],
    ) -> Result<Vec<f64>, HybridError> {
        if layer_index.len() != surface_pressure.len() {
            return Err(HybridError::CountMismatch {
                what: "tropopause layer indices",
                expected: surface_pressure.len(),
                actual: layer_index.len(),
            });
        }

        let mut out = alloc_buffer(surface_pressure.len())?;
        let mut n_missing = 0;
        for (&index, &sp) in layer_index.iter().zip(surface_pressure) {
            let bounds = usize::try_from(index).ok().and_then(|k| {
                let lower = self.pressure_at(k, sp)?;
                let upper = self.pressure_at(k + 1, sp)?;
                Some((lower, upper))
            });

            match bounds {
                Some((lower, upper)) => out.push(((lower.ln() + upper.ln()) / 2.0).exp()),
                None => {
                    n_missing += 1;
                    out.push(f64::NAN);
                }
            }
        }

        if n_missing > 0 {
            log::debug!(
                "{n_missing} of {} profiles have a tropopause layer index outside 0..{}",
                layer_index.len(),
                self.num_levels().saturating_sub(1)
            );
        }
        Ok(out)
    }
}

/// Coefficients given separately for the two bounds of every layer, as `[layers, 2]`
/// tables of `a` and `b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerBoundCoefficients {
    coefficients: HybridCoefficients,
}

impl LayerBoundCoefficients {
    pub fn new(a_bounds: Vec<f64>, b_bounds: Vec<f64>) -> Result<Self, HybridError> {
        let coefficients = HybridCoefficients::new(a_bounds, b_bounds)?;
        if coefficients.num_levels() % 2 != 0 {
            return Err(HybridError::OddPackedLength(coefficients.num_levels()));
        }
        Ok(Self { coefficients })
    }

    pub fn num_layers(&self) -> usize {
        self.coefficients.num_levels() / 2
    }

    /// Pressure bounds of every layer for every profile, shaped `[profiles, layers, 2]`,
    /// with the same optional top of atmosphere floor as [`HybridCoefficients::layer_bounds`].
    pub fn bounds(
        &self,
        surface_pressure: &[f64],
        toa_floor: Option<f64>,
    ) -> Result<Vec<f64>, HybridError> {
        let mut out = self.coefficients.level_pressures(surface_pressure)?;
        if let Some(floor) = toa_floor {
            let n = self.coefficients.num_levels().max(1);
            for profile in out.chunks_mut(n) {
                clamp_top_of_atmosphere(profile, floor);
            }
        }
        Ok(out)
    }
}

/// Raise every pressure in `pressures` that is below `floor` to `floor`. NaNs are ignored.
fn clamp_top_of_atmosphere(pressures: &mut [f64], floor: f64) {
    pressures
        .iter_mut()
        .filter(|p| **p < floor)
        .for_each(|p| *p = floor);
}

/// Allocate room for `per_profile` values for each of `num_profiles` profiles.
fn alloc_profiles(num_profiles: usize, per_profile: usize) -> Result<Vec<f64>, ArrayError> {
    let n = num_profiles
        .checked_mul(per_profile)
        .ok_or(ArrayError::OutOfMemory { bytes: usize::MAX })?;
    alloc_buffer(n)
}
