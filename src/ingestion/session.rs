use std::{cell::RefCell, rc::Rc};

use error_stack::ResultExt;
use indexmap::IndexMap;

use crate::config::{AdapterConfig, IngestionConfig};
use crate::error::{IngestError, IntoIngestReport};
use crate::hybrid::HybridCoefficients;
use crate::product::{DimensionLengths, DimensionType};
use crate::source::{FieldPath, ProductSource};

/// Where the hybrid coefficients of a product are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CoefficientSource {
    /// Two arrays holding `a` and `b`
    Separate { a: FieldPath, b: FieldPath },
    /// One array holding all of `a` followed by all of `b`, as in GRIB
    Packed(FieldPath),
}

impl std::fmt::Display for CoefficientSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoefficientSource::Separate { a, b } => write!(f, "{a} and {b}"),
            CoefficientSource::Packed(pv) => write!(f, "{pv}"),
        }
    }
}

/// State for ingesting one product.
///
/// Everything a variable reader needs beyond its own definition lives here: the source
/// product, the adapter's configuration, the lengths of the shared dimensions, and tables
/// that are read once and reused by several variables. A session is never shared between
/// ingestions.
pub struct IngestionSession<'a> {
    adapter: String,
    config: AdapterConfig,
    source: &'a dyn ProductSource,
    dimensions: DimensionLengths,
    coefficients: RefCell<IndexMap<CoefficientSource, Rc<HybridCoefficients>>>,
}

impl<'a> IngestionSession<'a> {
    pub fn new<S: ToString>(
        adapter: S,
        config: &IngestionConfig,
        source: &'a dyn ProductSource,
    ) -> Self {
        let adapter = adapter.to_string();
        let config = config.adapter(&adapter);
        Self {
            adapter,
            config,
            source,
            dimensions: DimensionLengths::new(),
            coefficients: RefCell::new(IndexMap::new()),
        }
    }

    pub fn with_dimension(mut self, dimension: DimensionType, length: usize) -> Self {
        self.set_dimension(dimension, length);
        self
    }

    pub fn set_dimension(&mut self, dimension: DimensionType, length: usize) {
        self.dimensions.insert(dimension, length);
    }

    /// Set the length of `dimension` from the number of elements of the array at `path`.
    pub fn set_dimension_from(
        &mut self,
        dimension: DimensionType,
        path: &FieldPath,
    ) -> error_stack::Result<usize, IngestError> {
        let length = self.source.num_elements(path).into_ingest().attach_printable_lazy(|| {
            format!("while determining the length of the {dimension} dimension")
        })?;
        self.set_dimension(dimension, length);
        Ok(length)
    }

    pub fn dimension_length(&self, dimension: DimensionType) -> Option<usize> {
        self.dimensions.get(&dimension).copied()
    }

    pub fn dimensions(&self) -> &DimensionLengths {
        &self.dimensions
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn source(&self) -> &dyn ProductSource {
        self.source
    }

    /// The hybrid coefficients stored at `location`. They are read from the source the
    /// first time they are needed and shared by every later caller in this session.
    pub fn hybrid_coefficients(
        &self,
        location: &CoefficientSource,
    ) -> error_stack::Result<Rc<HybridCoefficients>, IngestError> {
        if let Some(coefs) = self.coefficients.borrow().get(location) {
            return Ok(Rc::clone(coefs));
        }

        log::debug!("Reading hybrid coefficients from {location}");
        let coefs = self
            .read_coefficients(location)
            .attach_printable_lazy(|| format!("while reading hybrid coefficients from {location}"))?;
        let coefs = Rc::new(coefs);
        self.coefficients
            .borrow_mut()
            .insert(location.clone(), Rc::clone(&coefs));
        Ok(coefs)
    }

    fn read_coefficients(
        &self,
        location: &CoefficientSource,
    ) -> error_stack::Result<HybridCoefficients, IngestError> {
        match location {
            CoefficientSource::Separate { a, b } => {
                let n = self.source.num_elements(a).into_ingest()?;
                let a = self.source.read_double(a, n).into_ingest()?;
                let b = self.source.read_double(b, n).into_ingest()?;
                HybridCoefficients::new(a, b).into_ingest()
            }
            CoefficientSource::Packed(pv) => {
                let n = self.source.num_elements(pv).into_ingest()?;
                let values = self.source.read_double(pv, n).into_ingest()?;
                HybridCoefficients::from_packed(&values).into_ingest()
            }
        }
    }

    /// Read the surface pressure for `num_profiles` profiles from `path` and convert it
    /// from the adapter's configured unit to Pa.
    pub fn surface_pressure(
        &self,
        path: &FieldPath,
        num_profiles: usize,
    ) -> error_stack::Result<Vec<f64>, IngestError> {
        let mut sp = self.source.read_double(path, num_profiles).into_ingest()?;
        let unit = &self.config.surface_pressure_unit;
        crate::units::convert_unit(unit, "Pa", &mut sp)
            .into_ingest()
            .attach_printable_lazy(|| format!("while converting surface pressure at {path} to Pa"))?;
        Ok(sp)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::buffer::{DataType, TypedBuffer};
    use crate::source::{AttributeValue, MemoryProduct, SourceError};

    /// Wraps a product and counts the arrays read from it
    struct CountingSource {
        inner: MemoryProduct,
        reads: Cell<usize>,
    }

    impl ProductSource for CountingSource {
        fn read_array(&self, path: &FieldPath, data_type: DataType) -> Result<TypedBuffer, SourceError> {
            self.reads.set(self.reads.get() + 1);
            self.inner.read_array(path, data_type)
        }

        fn dimensions(&self, path: &FieldPath) -> Result<Vec<usize>, SourceError> {
            self.inner.dimensions(path)
        }

        fn attribute(&self, path: &FieldPath, name: &str) -> Result<Option<AttributeValue>, SourceError> {
            self.inner.attribute(path, name)
        }

        fn has_field(&self, path: &FieldPath) -> bool {
            self.inner.has_field(path)
        }
    }

    fn packed_source() -> (CountingSource, CoefficientSource) {
        let mut product = MemoryProduct::new();
        let pv = product
            .insert_array("/pv", &[6], vec![0.0, 50.0, 100.0, 0.0, 0.25, 0.5])
            .unwrap();
        let source = CountingSource {
            inner: product,
            reads: Cell::new(0),
        };
        (source, CoefficientSource::Packed(pv))
    }

    #[test]
    fn test_coefficients_read_once() {
        let (source, location) = packed_source();
        let config = IngestionConfig::default();
        let session = IngestionSession::new("ecmwf_grib", &config, &source);

        let first = session.hybrid_coefficients(&location).unwrap();
        let second = session.hybrid_coefficients(&location).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(source.reads.get(), 1);
        assert_eq!(first.b(), [0.0, 0.25, 0.5]);
    }

    #[test]
    fn test_sessions_do_not_share_state() {
        let (source, location) = packed_source();
        let config = IngestionConfig::default();
        let s1 = IngestionSession::new("ecmwf_grib", &config, &source);
        let s2 = IngestionSession::new("ecmwf_grib", &config, &source);
        s1.hybrid_coefficients(&location).unwrap();
        s2.hybrid_coefficients(&location).unwrap();
        assert_eq!(source.reads.get(), 2);
    }

    #[test]
    fn test_surface_pressure_unit() {
        let mut product = MemoryProduct::new();
        let sp = product.insert_array("/sp", &[2], vec![1000.0f32, 850.0]).unwrap();
        let config = IngestionConfig::from_toml_str("[adapters.ecmwf_grib]\nsurface_pressure_unit = \"hPa\"").unwrap();
        let session = IngestionSession::new("ecmwf_grib", &config, &product);
        let values = session.surface_pressure(&sp, 2).unwrap();
        assert_abs_diff_eq!(values.as_slice(), [100000.0, 85000.0].as_slice(), epsilon = 1e-6);

        let err = session.surface_pressure(&sp, 3).unwrap_err();
        assert!(matches!(err.current_context(), IngestError::Source(_)));
    }

    #[test]
    fn test_dimension_from_field() {
        let mut product = MemoryProduct::new();
        let lat = product.insert_array("/lat", &[5], vec![0.0f64; 5]).unwrap();
        let config = IngestionConfig::default();
        let mut session = IngestionSession::new("osiris_l2", &config, &product);
        assert_eq!(session.set_dimension_from(DimensionType::Time, &lat).unwrap(), 5);
        assert_eq!(session.dimension_length(DimensionType::Time), Some(5));
        assert_eq!(session.dimension_length(DimensionType::Vertical), None);
    }
}
