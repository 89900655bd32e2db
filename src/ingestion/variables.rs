//! The ways an output variable can be produced from the source product.
//!
//! Each output variable of an adapter is a [`VariableDefinition`] paired with a
//! [`VariableReader`] that knows how to produce its data. Most variables are a field read
//! with some normalization applied ([`FieldReader`]); the rest are derived from several
//! fields, like the pressure readers that combine hybrid coefficients with surface pressure.
use error_stack::ResultExt;
use log::{debug, trace};

use crate::arrays::num_elements;
use crate::buffer::{DataType, Scalar, TypedBuffer};
use crate::error::{IngestError, IntoIngestReport};
use crate::hybrid::LayerBoundCoefficients;
use crate::product::VariableDefinition;
use crate::source::FieldPath;
use crate::units::UnitConverter;

use super::session::{CoefficientSource, IngestionSession};

/// Produces the data of one output variable.
pub trait VariableReader {
    fn definition(&self) -> &VariableDefinition;

    /// Whether the variable can be read from this product. Unavailable variables are
    /// left out of the product instead of failing the ingestion.
    fn is_available(&self, _session: &IngestionSession<'_>) -> bool {
        true
    }

    /// Read the data, which must have the definition's data type and `shape`.
    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError>;
}

/// How missing values are marked in a source field.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FillValue {
    /// The field has no fill values
    #[default]
    None,
    /// A fill value fixed by the product format, matched exactly
    Value(Scalar),
    /// A fill value that may have picked up rounding noise, e.g. when decoded from a
    /// scaled integer. Values within `|value| * relative_tolerance` of it are fills.
    /// Without an explicit tolerance the adapter's `fill_relative_tolerance` is used, and
    /// if that is not set either the match is exact.
    Approx {
        value: Scalar,
        relative_tolerance: Option<f64>,
    },
    /// A fill value given by an attribute of the field, e.g. `_FillValue`
    Attribute(String),
    /// Values outside this range are missing
    ValidRange { min: f64, max: f64 },
}

/// Read a field and normalize it: fill values become NaN, then the values are scaled,
/// converted to the definition's unit, and reordered to the output layout.
#[derive(Debug, Clone)]
pub struct FieldReader {
    definition: VariableDefinition,
    path: FieldPath,
    fill: FillValue,
    scale_factor: Option<f64>,
    source_unit: Option<String>,
    swapped_axes: Option<(usize, usize)>,
    inverted_axis: Option<usize>,
    optional: bool,
}

impl FieldReader {
    pub fn new(definition: VariableDefinition, path: FieldPath) -> Self {
        Self {
            definition,
            path,
            fill: FillValue::None,
            scale_factor: None,
            source_unit: None,
            swapped_axes: None,
            inverted_axis: None,
            optional: false,
        }
    }

    pub fn with_fill(mut self, fill: FillValue) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_scale_factor(mut self, factor: f64) -> Self {
        self.scale_factor = Some(factor);
        self
    }

    /// Unit of the values in the source, if it differs from the definition's unit. The
    /// definition must have a unit for the values to be converted to.
    pub fn with_source_unit<S: ToString>(mut self, unit: S) -> Self {
        self.source_unit = Some(unit.to_string());
        self
    }

    /// The source stores the field with axes `a` and `b` of the output shape exchanged.
    pub fn with_swapped_axes(mut self, a: usize, b: usize) -> Self {
        self.swapped_axes = Some((a, b));
        self
    }

    /// The source stores `axis` in the opposite order, e.g. vertical profiles from the
    /// top down instead of from the surface up.
    pub fn with_inverted_axis(mut self, axis: usize) -> Self {
        self.inverted_axis = Some(axis);
        self
    }

    /// Skip the variable instead of failing when the field does not exist.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    fn replace_fills(
        &self,
        session: &IngestionSession<'_>,
        data: &mut TypedBuffer,
    ) -> error_stack::Result<(), IngestError> {
        let (fill, tolerance) = match &self.fill {
            FillValue::None => return Ok(()),
            FillValue::Value(v) => (*v, None),
            FillValue::Approx {
                value,
                relative_tolerance,
            } => (
                *value,
                relative_tolerance.or(session.config().fill_relative_tolerance),
            ),
            FillValue::Attribute(name) => {
                let attr = session
                    .source()
                    .scalar_attribute(&self.path, name)
                    .into_ingest()?;
                match attr {
                    Some(v) => (v, None),
                    None => {
                        debug!("{} has no {name} attribute, no fill values replaced", self.path);
                        return Ok(());
                    }
                }
            }
            FillValue::ValidRange { min, max } => {
                let n = data.replace_values_outside(*min, *max);
                trace!("{n} values outside [{min}, {max}] in {} set to NaN", self.path);
                return Ok(());
            }
        };

        let fill = fill.cast(data.data_type());
        let n = match tolerance {
            Some(tol) => data.replace_fill_value_approx(fill, tol),
            None => data.replace_fill_value(fill),
        }
        .into_ingest()?;
        trace!("{n} fill values in {} set to NaN", self.path);
        Ok(())
    }
}

impl VariableReader for FieldReader {
    fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    fn is_available(&self, session: &IngestionSession<'_>) -> bool {
        !self.optional || session.source().has_field(&self.path)
    }

    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError> {
        let n = num_elements(shape);
        let mut data = session
            .source()
            .read_array_checked(&self.path, self.definition.data_type, n)
            .into_ingest()?;

        self.replace_fills(session, &mut data)?;

        if let Some(factor) = self.scale_factor {
            data.scale(factor).into_ingest()?;
        }

        if let Some(from) = &self.source_unit {
            let to = self.definition.unit.as_deref().ok_or_else(|| {
                IngestError::UnitConversion(format!(
                    "'{}' has source unit '{from}' but no unit to convert it to",
                    self.definition.name
                ))
            })?;
            let converter = UnitConverter::new(from, to).into_ingest()?;
            if !converter.is_identity() {
                data.convert_unit(&converter).into_ingest()?;
            }
        }

        if let Some((a, b)) = self.swapped_axes {
            let mut source_dims = shape.to_vec();
            if a >= shape.len() || b >= shape.len() {
                return Err(error_stack::Report::new(IngestError::structural(format!(
                    "cannot swap axes {a} and {b} of a {}-dimensional variable",
                    shape.len()
                ))));
            }
            source_dims.swap(a, b);
            data.swap_axes(&source_dims, a, b).into_ingest()?;
        }

        if let Some(axis) = self.inverted_axis {
            data.invert(axis, shape).into_ingest()?;
        }

        Ok(data)
    }
}

/// Read a field that has one value per element of the leading dimensions and repeat
/// each value along the last dimension, e.g. a per-scanline time for every pixel.
#[derive(Debug, Clone)]
pub struct BroadcastFieldReader {
    definition: VariableDefinition,
    path: FieldPath,
}

impl BroadcastFieldReader {
    pub fn new(definition: VariableDefinition, path: FieldPath) -> Self {
        Self { definition, path }
    }
}

impl VariableReader for BroadcastFieldReader {
    fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError> {
        let (&inner, leading) = shape.split_last().ok_or_else(|| {
            IngestError::structural(format!(
                "cannot broadcast into the scalar variable '{}'",
                self.definition.name
            ))
        })?;
        let outer = num_elements(leading);
        let mut data = session
            .source()
            .read_array_checked(&self.path, self.definition.data_type, outer)
            .into_ingest()?;
        data.broadcast(outer, inner).into_ingest()?;
        Ok(data)
    }
}

/// Pressure at each hybrid level, for a variable shaped `[..., levels]`.
#[derive(Debug, Clone)]
pub struct LevelPressureReader {
    definition: VariableDefinition,
    coefficients: CoefficientSource,
    surface_pressure: FieldPath,
}

impl LevelPressureReader {
    pub fn new(
        definition: VariableDefinition,
        coefficients: CoefficientSource,
        surface_pressure: FieldPath,
    ) -> Self {
        Self {
            definition,
            coefficients,
            surface_pressure,
        }
    }
}

impl VariableReader for LevelPressureReader {
    fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError> {
        let coefs = session.hybrid_coefficients(&self.coefficients)?;
        let (num_profiles, num_levels) = split_profiles(shape, 1, &self.definition)?;
        check_count("levels", coefs.num_levels(), num_levels)?;

        let sp = session.surface_pressure(&self.surface_pressure, num_profiles)?;
        let pressure = coefs.level_pressures(&sp).into_ingest()?;
        pressure_buffer(pressure, &self.definition)
    }
}

/// How the coefficients of a pressure bounds variable are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsLayout {
    /// One coefficient pair per level; layer `j` lies between levels `j` and `j + 1`
    Levels,
    /// Separate coefficient pairs for the two bounds of each layer, as `[layers, 2]`
    LayerBounds,
}

/// Lower and upper pressure of each layer, for a variable shaped `[..., layers, 2]`.
///
/// If the adapter configuration has a `toa_pressure_floor`, the top of atmosphere bound
/// is raised to it.
#[derive(Debug, Clone)]
pub struct PressureBoundsReader {
    definition: VariableDefinition,
    coefficients: CoefficientSource,
    surface_pressure: FieldPath,
    layout: BoundsLayout,
}

impl PressureBoundsReader {
    pub fn new(
        definition: VariableDefinition,
        coefficients: CoefficientSource,
        surface_pressure: FieldPath,
        layout: BoundsLayout,
    ) -> Self {
        Self {
            definition,
            coefficients,
            surface_pressure,
            layout,
        }
    }
}

impl VariableReader for PressureBoundsReader {
    fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError> {
        if shape.last() != Some(&2) {
            return Err(error_stack::Report::new(IngestError::structural(format!(
                "pressure bounds variable '{}' must have a last dimension of length 2, its shape is {shape:?}",
                self.definition.name
            ))));
        }
        let (num_profiles, num_layers) = split_profiles(&shape[..shape.len() - 1], 1, &self.definition)?;
        let coefs = session.hybrid_coefficients(&self.coefficients)?;
        let sp = session.surface_pressure(&self.surface_pressure, num_profiles)?;
        let floor = session.config().toa_pressure_floor;

        let bounds = match self.layout {
            BoundsLayout::Levels => {
                check_count("levels", coefs.num_levels(), num_layers + 1)?;
                coefs.layer_bounds(&sp, floor).into_ingest()?
            }
            BoundsLayout::LayerBounds => {
                let coefs = LayerBoundCoefficients::new(coefs.a().to_vec(), coefs.b().to_vec())
                    .into_ingest()?;
                check_count("layers", coefs.num_layers(), num_layers)?;
                coefs.bounds(&sp, floor).into_ingest()?
            }
        };
        pressure_buffer(bounds, &self.definition)
    }
}

/// Pressure at the tropopause for each profile, from a per-profile tropopause layer index.
/// Profiles with an index outside the coefficient table get NaN.
#[derive(Debug, Clone)]
pub struct TropopausePressureReader {
    definition: VariableDefinition,
    coefficients: CoefficientSource,
    surface_pressure: FieldPath,
    layer_index: FieldPath,
}

impl TropopausePressureReader {
    pub fn new(
        definition: VariableDefinition,
        coefficients: CoefficientSource,
        surface_pressure: FieldPath,
        layer_index: FieldPath,
    ) -> Self {
        Self {
            definition,
            coefficients,
            surface_pressure,
            layer_index,
        }
    }
}

impl VariableReader for TropopausePressureReader {
    fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    fn read(
        &self,
        session: &IngestionSession<'_>,
        shape: &[usize],
    ) -> error_stack::Result<TypedBuffer, IngestError> {
        let num_profiles = num_elements(shape);
        let coefs = session.hybrid_coefficients(&self.coefficients)?;
        let index = session
            .source()
            .read_array_checked(&self.layer_index, DataType::Int32, num_profiles)
            .into_ingest()?;
        let index = index.as_i32().ok_or_else(|| {
            IngestError::structural(format!("{} was not read as int32", self.layer_index))
        })?;
        let sp = session.surface_pressure(&self.surface_pressure, num_profiles)?;
        let pressure = coefs.tropopause_pressure(index, &sp).into_ingest()?;
        pressure_buffer(pressure, &self.definition)
    }
}

/// Split `shape` into the number of profiles (product of the leading dimensions) and the
/// product of the last `num_trailing` dimensions.
fn split_profiles(
    shape: &[usize],
    num_trailing: usize,
    definition: &VariableDefinition,
) -> error_stack::Result<(usize, usize), IngestError> {
    if shape.len() < num_trailing {
        return Err(error_stack::Report::new(IngestError::structural(format!(
            "variable '{}' needs at least {num_trailing} dimension(s), its shape is {shape:?}",
            definition.name
        ))));
    }
    let (leading, trailing) = shape.split_at(shape.len() - num_trailing);
    Ok((num_elements(leading), num_elements(trailing)))
}

fn check_count(what: &str, from_source: usize, from_shape: usize) -> error_stack::Result<(), IngestError> {
    if from_source != from_shape {
        return Err(error_stack::Report::new(IngestError::structural(format!(
            "the coefficient table has {from_source} {what}, but the variable has {from_shape}"
        ))));
    }
    Ok(())
}

/// Wrap pressures computed in Pa into a buffer of the definition's type and unit.
fn pressure_buffer(
    mut pressure: Vec<f64>,
    definition: &VariableDefinition,
) -> error_stack::Result<TypedBuffer, IngestError> {
    if let Some(unit) = &definition.unit {
        crate::units::convert_unit("Pa", unit, &mut pressure)
            .into_ingest()
            .attach_printable_lazy(|| format!("while converting '{}'", definition.name))?;
    }

    match definition.data_type {
        DataType::Double => Ok(TypedBuffer::Double(pressure)),
        DataType::Float => Ok(TypedBuffer::Float(pressure.into_iter().map(|p| p as f32).collect())),
        other => Err(error_stack::Report::new(IngestError::structural(format!(
            "pressure variable '{}' must be a floating point type, not {other}",
            definition.name
        )))),
    }
}
