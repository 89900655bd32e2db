//! Parsing of physical unit strings and conversion of values between compatible units.
//!
//! Unit strings follow the UDUNITS conventions used by the ingested formats: products are
//! written with whitespace, `*` or `.`, quotients with `/`, integer powers as `m2`, `m-2`,
//! `m^2` or `m**2`, and time references as `<unit> since <timestamp>`. A parsed [`Unit`]
//! is a scale and offset relative to a combination of SI base dimensions, so any two units
//! with the same dimensions can be converted with a single multiply-add.
//!
//! ```
//! use harp_rs::units::convert_unit;
//! let mut pressures = vec![1013.25, 500.0];
//! convert_unit("hPa", "Pa", &mut pressures).unwrap();
//! assert_eq!(pressures, [101325.0, 50000.0]);
//! ```
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use num_traits::AsPrimitive;
use pest::{iterators::Pair, Parser};
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "units.pest"]
struct UnitParser;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UnitError {
    #[error("Invalid unit '{unit}': {reason}")]
    Syntax { unit: String, reason: String },
    #[error("Unknown unit '{name}' in '{unit}'")]
    UnknownUnit { name: String, unit: String },
    #[error("Unit '{from}' cannot be converted to '{to}'")]
    NotConvertible { from: String, to: String },
    #[error("Invalid time reference in unit '{unit}': {reason}")]
    InvalidTimeReference { unit: String, reason: String },
}

impl UnitError {
    fn syntax<U: ToString, R: ToString>(unit: U, reason: R) -> Self {
        Self::Syntax {
            unit: unit.to_string(),
            reason: reason.to_string(),
        }
    }

    fn unknown_unit<N: ToString, U: ToString>(name: N, unit: U) -> Self {
        Self::UnknownUnit {
            name: name.to_string(),
            unit: unit.to_string(),
        }
    }

    fn not_convertible<F: ToString, T: ToString>(from: F, to: T) -> Self {
        Self::NotConvertible {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    fn invalid_time_reference<U: ToString, R: ToString>(unit: U, reason: R) -> Self {
        Self::InvalidTimeReference {
            unit: unit.to_string(),
            reason: reason.to_string(),
        }
    }
}

const NUM_DIMS: usize = 7;
type Dims = [i32; NUM_DIMS];

const DIMENSIONLESS: Dims = [0; NUM_DIMS];
// length, mass, time, temperature, amount, current, luminous intensity
const LENGTH: Dims = [1, 0, 0, 0, 0, 0, 0];
const MASS: Dims = [0, 1, 0, 0, 0, 0, 0];
const TIME: Dims = [0, 0, 1, 0, 0, 0, 0];
const TEMPERATURE: Dims = [0, 0, 0, 1, 0, 0, 0];
const AMOUNT: Dims = [0, 0, 0, 0, 1, 0, 0];
const CURRENT: Dims = [0, 0, 0, 0, 0, 1, 0];
const LUMINOUS: Dims = [0, 0, 0, 0, 0, 0, 1];
const PRESSURE: Dims = [-1, 1, -2, 0, 0, 0, 0];
const FORCE: Dims = [1, 1, -2, 0, 0, 0, 0];
const ENERGY: Dims = [2, 1, -2, 0, 0, 0, 0];
const POWER: Dims = [2, 1, -3, 0, 0, 0, 0];
const FREQUENCY: Dims = [0, 0, -1, 0, 0, 0, 0];
const VOLUME: Dims = [3, 0, 0, 0, 0, 0, 0];
const COLUMN_DENSITY: Dims = [-2, 0, 0, 0, 1, 0, 0];

const AVOGADRO: f64 = 6.02214076e23;
/// Molecules per square meter in one Dobson unit
const DOBSON_MOLECULES_PER_M2: f64 = 2.6867e20;
const SECONDS_PER_YEAR: f64 = 31556925.9747;

const PREFIXES: &[(&str, f64)] = &[
    ("yotta", 1e24),
    ("zetta", 1e21),
    ("exa", 1e18),
    ("peta", 1e15),
    ("tera", 1e12),
    ("giga", 1e9),
    ("mega", 1e6),
    ("kilo", 1e3),
    ("hecto", 1e2),
    ("deka", 1e1),
    ("deca", 1e1),
    ("deci", 1e-1),
    ("centi", 1e-2),
    ("milli", 1e-3),
    ("micro", 1e-6),
    ("nano", 1e-9),
    ("pico", 1e-12),
    ("femto", 1e-15),
    ("atto", 1e-18),
    ("zepto", 1e-21),
    ("yocto", 1e-24),
    ("Y", 1e24),
    ("Z", 1e21),
    ("E", 1e18),
    ("P", 1e15),
    ("T", 1e12),
    ("G", 1e9),
    ("M", 1e6),
    ("k", 1e3),
    ("h", 1e2),
    ("da", 1e1),
    ("d", 1e-1),
    ("c", 1e-2),
    ("m", 1e-3),
    ("u", 1e-6),
    ("µ", 1e-6),
    ("μ", 1e-6),
    ("n", 1e-9),
    ("p", 1e-12),
    ("f", 1e-15),
    ("a", 1e-18),
    ("z", 1e-21),
    ("y", 1e-24),
];

/// A physical unit, expressed as `value_si = value * scale + offset` in terms of a
/// combination of SI base dimensions.
///
/// Time reference units (`days since 2000-01-01`) have the time dimension and an offset
/// equal to their origin in seconds since 1970-01-01T00:00:00 UTC. They only convert to other
/// time reference units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    scale: f64,
    offset: f64,
    dims: Dims,
    time_reference: bool,
}

impl Unit {
    const fn new(scale: f64, dims: Dims) -> Self {
        Self {
            scale,
            offset: 0.0,
            dims,
            time_reference: false,
        }
    }

    const fn with_offset(scale: f64, offset: f64, dims: Dims) -> Self {
        Self {
            scale,
            offset,
            dims,
            time_reference: false,
        }
    }

    pub fn dimensionless() -> Self {
        Self::new(1.0, DIMENSIONLESS)
    }

    /// Parse a unit string. An empty string (or one containing only whitespace) is
    /// dimensionless, the same as `"1"`.
    pub fn parse(text: &str) -> Result<Self, UnitError> {
        let spec = UnitParser::parse(Rule::unit_spec, text)
            .map_err(|e| {
                let index = match e.location {
                    pest::error::InputLocation::Pos(p) => p,
                    pest::error::InputLocation::Span((p, _)) => p,
                };
                UnitError::syntax(text, format!("unexpected input at character {index}"))
            })?
            .next()
            .ok_or_else(|| UnitError::syntax(text, "no unit found"))?;

        let mut unit = Self::dimensionless();
        for part in spec.into_inner() {
            match part.as_rule() {
                Rule::product => unit = eval_product(part, text)?,
                Rule::reference_unit => unit = eval_reference(part, text)?,
                _ => {}
            }
        }
        Ok(unit)
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn is_dimensionless(&self) -> bool {
        self.dims == DIMENSIONLESS && !self.time_reference
    }

    pub fn is_time_reference(&self) -> bool {
        self.time_reference
    }

    /// Whether values in this unit can be converted to `other`.
    pub fn is_convertible_to(&self, other: &Unit) -> bool {
        self.dims == other.dims && self.time_reference == other.time_reference
    }

    fn multiply(&self, other: &Unit) -> Self {
        let dims = std::array::from_fn(|i| self.dims[i] + other.dims[i]);
        Self::new(self.scale * other.scale, dims)
    }

    fn divide(&self, other: &Unit) -> Self {
        let dims = std::array::from_fn(|i| self.dims[i] - other.dims[i]);
        Self::new(self.scale / other.scale, dims)
    }

    fn powi(&self, n: i32) -> Self {
        if n == 1 {
            return *self;
        }
        let dims = self.dims.map(|d| d * n);
        Self::new(self.scale.powi(n), dims)
    }
}

impl std::str::FromStr for Unit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn eval_product(pair: Pair<'_, Rule>, text: &str) -> Result<Unit, UnitError> {
    let mut inner = pair.into_inner();
    let first = inner
        .next()
        .ok_or_else(|| UnitError::syntax(text, "empty product"))?;
    let mut unit = eval_factor(first, text)?;

    while let Some(op) = inner.next() {
        let rhs = inner
            .next()
            .ok_or_else(|| UnitError::syntax(text, "operator without an operand"))?;
        let rhs = eval_factor(rhs, text)?;
        unit = match op.as_rule() {
            Rule::multiply => unit.multiply(&rhs),
            Rule::divide => unit.divide(&rhs),
            _ => unreachable!(),
        };
    }
    Ok(unit)
}

fn eval_factor(pair: Pair<'_, Rule>, text: &str) -> Result<Unit, UnitError> {
    let mut inner = pair.into_inner();
    let base = inner
        .next()
        .ok_or_else(|| UnitError::syntax(text, "empty factor"))?;

    let unit = match base.as_rule() {
        Rule::product => eval_product(base, text)?,
        Rule::number => {
            let value: f64 = base
                .as_str()
                .parse()
                .map_err(|_| UnitError::syntax(text, format!("bad number '{}'", base.as_str())))?;
            if value == 0.0 {
                return Err(UnitError::syntax(text, "a scale factor of zero is not allowed"));
            }
            Unit::new(value, DIMENSIONLESS)
        }
        Rule::name => {
            lookup_unit(base.as_str()).ok_or_else(|| UnitError::unknown_unit(base.as_str(), text))?
        }
        _ => unreachable!(),
    };

    match inner.next() {
        Some(exponent) => {
            let power = exponent
                .into_inner()
                .next()
                .ok_or_else(|| UnitError::syntax(text, "missing exponent"))?;
            let n: i32 = power
                .as_str()
                .parse()
                .map_err(|_| UnitError::syntax(text, format!("bad exponent '{}'", power.as_str())))?;
            Ok(unit.powi(n))
        }
        None => Ok(unit),
    }
}

fn eval_reference(pair: Pair<'_, Rule>, text: &str) -> Result<Unit, UnitError> {
    let mut unit = None;
    let mut origin = None;
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::product => unit = Some(eval_product(part, text)?),
            Rule::timestamp => origin = Some(parse_timestamp(part.as_str(), text)?),
            _ => {}
        }
    }

    let unit = unit.ok_or_else(|| UnitError::invalid_time_reference(text, "missing time unit"))?;
    let origin = origin.ok_or_else(|| UnitError::invalid_time_reference(text, "missing origin"))?;
    if unit.dims != TIME {
        return Err(UnitError::invalid_time_reference(
            text,
            "the unit before the origin is not a unit of time",
        ));
    }

    Ok(Unit {
        scale: unit.scale,
        offset: origin,
        dims: TIME,
        time_reference: true,
    })
}

/// Parse a time reference origin into seconds since 1970-01-01T00:00:00 UTC.
fn parse_timestamp(timestamp: &str, text: &str) -> Result<f64, UnitError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(timestamp) {
        return Ok(seconds_since_epoch(dt.naive_utc()));
    }

    let trimmed = timestamp
        .trim()
        .trim_end_matches("UTC")
        .trim_end_matches('Z')
        .trim_end();
    for fmt in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Ok(seconds_since_epoch(dt));
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .map(|d| seconds_since_epoch(d.and_time(chrono::NaiveTime::MIN)))
        .map_err(|e| {
            UnitError::invalid_time_reference(text, format!("cannot parse '{timestamp}': {e}"))
        })
}

fn seconds_since_epoch(dt: NaiveDateTime) -> f64 {
    let utc = dt.and_utc();
    utc.timestamp() as f64 + f64::from(utc.timestamp_subsec_nanos()) * 1e-9
}

fn lookup_unit(name: &str) -> Option<Unit> {
    if let Some(unit) = named_unit(name) {
        return Some(unit);
    }

    if let Some(unit) = prefixed_unit(name) {
        return Some(unit);
    }

    // Plurals of the spelled out names, e.g. "seconds" or "meters"
    let singular = name.strip_suffix('s').filter(|s| s.len() > 1)?;
    named_unit(singular).or_else(|| prefixed_unit(singular))
}

fn prefixed_unit(name: &str) -> Option<Unit> {
    PREFIXES.iter().find_map(|(prefix, factor)| {
        let rest = name.strip_prefix(prefix)?;
        let unit = named_unit(rest)?;
        if unit.offset != 0.0 {
            return None;
        }
        Some(Unit::new(unit.scale * factor, unit.dims))
    })
}

fn named_unit(name: &str) -> Option<Unit> {
    let degree = std::f64::consts::PI / 180.0;
    let unit = match name {
        "count" | "counts" | "ppv" | "rad" | "radian" | "sr" | "steradian" => {
            Unit::dimensionless()
        }
        "%" | "percent" => Unit::new(1e-2, DIMENSIONLESS),
        "ppmv" | "ppm" => Unit::new(1e-6, DIMENSIONLESS),
        "ppbv" | "ppb" => Unit::new(1e-9, DIMENSIONLESS),
        "pptv" | "ppt" => Unit::new(1e-12, DIMENSIONLESS),
        "degree" | "deg" | "degree_north" | "degree_east" | "degrees_north" | "degrees_east"
        | "degree_N" | "degree_E" | "degreeN" | "degreeE" | "°" => {
            Unit::new(degree, DIMENSIONLESS)
        }

        "m" | "meter" | "metre" => Unit::new(1.0, LENGTH),
        "g" | "gram" => Unit::new(1e-3, MASS),
        "s" | "sec" | "second" => Unit::new(1.0, TIME),
        "K" | "kelvin" => Unit::new(1.0, TEMPERATURE),
        "mol" | "mole" => Unit::new(1.0, AMOUNT),
        "A" | "ampere" => Unit::new(1.0, CURRENT),
        "cd" | "candela" => Unit::new(1.0, LUMINOUS),

        "Pa" | "pascal" => Unit::new(1.0, PRESSURE),
        "bar" => Unit::new(1e5, PRESSURE),
        "atm" | "atmosphere" => Unit::new(101325.0, PRESSURE),
        "N" | "newton" => Unit::new(1.0, FORCE),
        "J" | "joule" => Unit::new(1.0, ENERGY),
        "W" | "watt" => Unit::new(1.0, POWER),
        "Hz" | "hertz" => Unit::new(1.0, FREQUENCY),
        "L" | "l" | "liter" | "litre" => Unit::new(1e-3, VOLUME),

        "degC" | "°C" | "celsius" | "degree_Celsius" | "degrees_Celsius" => {
            Unit::with_offset(1.0, 273.15, TEMPERATURE)
        }
        "degF" | "°F" | "fahrenheit" | "degree_Fahrenheit" | "degrees_Fahrenheit" => {
            Unit::with_offset(5.0 / 9.0, 273.15 - 32.0 * 5.0 / 9.0, TEMPERATURE)
        }

        "min" | "minute" => Unit::new(60.0, TIME),
        "h" | "hr" | "hour" => Unit::new(3600.0, TIME),
        "d" | "day" => Unit::new(86400.0, TIME),
        "week" => Unit::new(7.0 * 86400.0, TIME),
        "yr" | "year" => Unit::new(SECONDS_PER_YEAR, TIME),

        "molec" | "molecule" => Unit::new(1.0 / AVOGADRO, AMOUNT),
        "DU" | "dobson" => Unit::new(DOBSON_MOLECULES_PER_M2 / AVOGADRO, COLUMN_DENSITY),
        _ => return None,
    };
    Some(unit)
}

/// Multiply-add converter between two parsed units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConverter {
    factor: f64,
    shift: f64,
}

impl UnitConverter {
    /// Create a converter from the unit string `from` to the unit string `to`.
    ///
    /// # Errors
    /// Fails if either string is not a valid unit, or if the units do not have the same
    /// dimensions.
    pub fn new(from: &str, to: &str) -> Result<Self, UnitError> {
        let from_unit = Unit::parse(from)?;
        let to_unit = Unit::parse(to)?;
        Self::between(&from_unit, &to_unit).ok_or_else(|| UnitError::not_convertible(from, to))
    }

    /// Create a converter between two already parsed units, or `None` if they are not
    /// convertible.
    pub fn between(from: &Unit, to: &Unit) -> Option<Self> {
        if !from.is_convertible_to(to) {
            return None;
        }
        Some(Self {
            factor: from.scale / to.scale,
            shift: (from.offset - to.offset) / to.scale,
        })
    }

    pub fn is_identity(&self) -> bool {
        self.factor == 1.0 && self.shift == 0.0
    }

    pub fn convert(&self, value: f64) -> f64 {
        value * self.factor + self.shift
    }

    /// Convert every value in place. Single precision values are converted in double
    /// precision and rounded back. NaNs stay NaN.
    pub fn convert_slice<F>(&self, values: &mut [F])
    where
        F: AsPrimitive<f64>,
        f64: AsPrimitive<F>,
    {
        if self.is_identity() {
            return;
        }
        for v in values.iter_mut() {
            *v = self.convert((*v).as_()).as_();
        }
    }

    /// Convert a sequence of values into a new vector.
    pub fn convert_values<I: IntoIterator<Item = f64>>(&self, values: I) -> Vec<f64> {
        values.into_iter().map(|v| self.convert(v)).collect()
    }
}

/// Convert `values` in place from unit `from` to unit `to`.
pub fn convert_unit(from: &str, to: &str, values: &mut [f64]) -> Result<(), UnitError> {
    let converter = UnitConverter::new(from, to)?;
    log::trace!("Converting {} values from '{from}' to '{to}'", values.len());
    converter.convert_slice(values);
    Ok(())
}

/// Returns `true` if `text` parses as a unit.
pub fn unit_is_valid(text: &str) -> bool {
    Unit::parse(text).is_ok()
}

/// Returns `true` if values in unit `from` can be converted to unit `to`. Invalid unit
/// strings are never convertible.
pub fn units_convertible(from: &str, to: &str) -> bool {
    match (Unit::parse(from), Unit::parse(to)) {
        (Ok(a), Ok(b)) => a.is_convertible_to(&b),
        _ => false,
    }
}

/// Returns `true` if two unit strings describe the same unit, e.g. `"W"` and `"J/s"`.
pub fn units_equal(a: &str, b: &str) -> Result<bool, UnitError> {
    let a = Unit::parse(a)?;
    let b = Unit::parse(b)?;
    Ok(a.dims == b.dims
        && a.time_reference == b.time_reference
        && approx::relative_eq!(a.scale, b.scale, max_relative = 1e-12)
        && approx::relative_eq!(a.offset, b.offset, max_relative = 1e-12))
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("hPa", "Pa", 1013.25, 101325.0)]
    #[case("km", "m", 1.5, 1500.0)]
    #[case("Pa", "mbar", 100.0, 1.0)]
    #[case("degC", "K", 0.0, 273.15)]
    #[case("K", "degC", 300.0, 26.85)]
    #[case("degF", "degC", 212.0, 100.0)]
    #[case("ppmv", "ppv", 400.0, 4e-4)]
    #[case("ppv", "1e6 ppmv", 1.0, 1.0)]
    #[case("%", "1", 50.0, 0.5)]
    #[case("degree", "rad", 180.0, std::f64::consts::PI)]
    #[case("DU", "molec/cm^2", 1.0, 2.6867e16)]
    #[case("molec/cm2", "molec/m^2", 1.0, 1e4)]
    #[case("mol/(s.m^2.nm.sr)", "mol s-1 m-3", 1.0, 1e9)]
    #[case("10^-6 m^-1", "1/km", 1.0, 1e-3)]
    #[case("K/m", "degC/km", 1.0, 1000.0)]
    #[case("g/m^3", "kg m**-3", 1000.0, 1.0)]
    #[case("days", "hours", 2.0, 48.0)]
    fn test_conversions(#[case] from: &str, #[case] to: &str, #[case] value: f64, #[case] expected: f64) {
        let converter = UnitConverter::new(from, to).unwrap();
        assert_relative_eq!(converter.convert(value), expected, max_relative = 1e-12);
    }

    #[rstest]
    #[case("days since 2000-01-01", "seconds since 2000-01-01", 1.5, 129600.0)]
    #[case("seconds since 2000-01-01", "seconds since 1970-01-01", 0.0, 946684800.0)]
    #[case("hours since 2000-01-01 06:00:00", "days since 2000-01-01", 18.0, 1.0)]
    #[case("s@2000-01-01T00:00:00Z", "days since 2000-01-02", 0.0, -1.0)]
    fn test_time_references(#[case] from: &str, #[case] to: &str, #[case] value: f64, #[case] expected: f64) {
        let converter = UnitConverter::new(from, to).unwrap();
        assert_relative_eq!(converter.convert(value), expected, max_relative = 1e-12);
    }

    #[test]
    fn test_time_reference_needs_reference() {
        let err = UnitConverter::new("seconds since 2000-01-01", "s").unwrap_err();
        assert!(matches!(err, UnitError::NotConvertible { .. }));
    }

    #[rstest]
    #[case("m since 2000-01-01")]
    #[case("s since yesterday")]
    fn test_bad_time_references(#[case] unit: &str) {
        let err = Unit::parse(unit).unwrap_err();
        assert!(matches!(err, UnitError::InvalidTimeReference { .. }), "{err:?}");
    }

    #[rstest]
    #[case("W", "J/s")]
    #[case("W", "kg m2 s-3")]
    #[case("N", "kg.m/s2")]
    #[case("hPa", "mbar")]
    #[case("", "1")]
    #[case("degrees", "degree_north")]
    fn test_units_equal(#[case] a: &str, #[case] b: &str) {
        assert!(units_equal(a, b).unwrap(), "{a} != {b}");
    }

    #[test]
    fn test_units_not_equal() {
        assert!(!units_equal("K", "degC").unwrap());
        assert!(!units_equal("Pa", "hPa").unwrap());
    }

    #[test]
    fn test_not_convertible() {
        let err = UnitConverter::new("K", "m").unwrap_err();
        assert_eq!(
            err,
            UnitError::NotConvertible {
                from: "K".to_string(),
                to: "m".to_string()
            }
        );
        assert!(!units_convertible("mol/m^2", "kg/m^2"));
        assert!(units_convertible("mol/m^2", "DU"));
    }

    #[test]
    fn test_invalid_units() {
        assert!(matches!(
            Unit::parse("furlong").unwrap_err(),
            UnitError::UnknownUnit { .. }
        ));
        assert!(matches!(
            Unit::parse("m^").unwrap_err(),
            UnitError::Syntax { .. }
        ));
        assert!(!unit_is_valid("kg//m"));
        assert!(unit_is_valid("kg m-2 s-1"));
        assert!(unit_is_valid(""));
        assert!(Unit::parse("  ").unwrap().is_dimensionless());
    }

    #[test]
    fn test_convert_f32_slice() {
        let converter = UnitConverter::new("hPa", "Pa").unwrap();
        let mut values = vec![1.0f32, f32::NAN, 2.5];
        converter.convert_slice(&mut values);
        assert_relative_eq!(values[0], 100.0);
        assert!(values[1].is_nan());
        assert_relative_eq!(values[2], 250.0);
    }

    #[test]
    fn test_convert_unit_in_place() {
        let mut values = vec![0.0, 100.0];
        convert_unit("degC", "K", &mut values).unwrap();
        assert_relative_eq!(values[0], 273.15);
        assert_relative_eq!(values[1], 373.15);
    }
}
