//! Access to the source product being ingested.
//!
//! Decoding of the actual file formats (HDF, netCDF, GRIB and so on) is done by an external
//! reader. This module defines the interface that reader must provide, [`ProductSource`],
//! and the [`FieldPath`] values used to address fields in the product tree.
//! [`MemoryProduct`] implements the interface over data that has already been decoded.
use std::{fmt::Display, str::FromStr, sync::Arc};

use indexmap::IndexMap;

use crate::buffer::{DataType, Scalar, TypedBuffer};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Field {0} does not exist in the product")]
    MissingField(String),
    #[error("Field {path} has type {actual}, cannot read it as {expected}")]
    WrongType {
        path: String,
        expected: DataType,
        actual: DataType,
    },
    #[error("Field {path} has {actual} elements, expected {expected}")]
    WrongCount {
        path: String,
        expected: usize,
        actual: usize,
    },
    #[error("Field {path} has no attribute '{name}'")]
    MissingAttribute { path: String, name: String },
    #[error("Invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("Error from the format reader: {0}")]
    Reader(String),
}

impl SourceError {
    pub fn missing_field(path: &FieldPath) -> Self {
        Self::MissingField(path.to_string())
    }

    pub fn wrong_count(path: &FieldPath, expected: usize, actual: usize) -> Self {
        Self::WrongCount {
            path: path.to_string(),
            expected,
            actual,
        }
    }

    pub fn missing_attribute<S: ToString>(path: &FieldPath, name: S) -> Self {
        Self::MissingAttribute {
            path: path.to_string(),
            name: name.to_string(),
        }
    }

    fn invalid_path<P: ToString, R: ToString>(path: P, reason: R) -> Self {
        Self::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// A position in the product tree, such as `/PRODUCT/SUPPORT_DATA/surface_pressure`.
///
/// Paths are immutable. Navigating returns a new path and leaves the original usable, so
/// a reader can hold on to a group and derive any number of fields from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Arc<[PathSegment]>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self {
            segments: Arc::from(Vec::new()),
        }
    }

    /// The path to the child field `name` of this path.
    pub fn field<S: Into<String>>(&self, name: S) -> Self {
        self.with_segment(PathSegment::Field(name.into()))
    }

    /// The path to element `index` of the array at this path.
    pub fn index(&self, index: usize) -> Self {
        self.with_segment(PathSegment::Index(index))
    }

    /// The path one level up, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.segments.split_last()?;
        Some(Self {
            segments: init.into(),
        })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// The name of the last field in the path, ignoring trailing indices
    pub fn name(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|s| match s {
            PathSegment::Field(name) => Some(name.as_str()),
            PathSegment::Index(_) => None,
        })
    }

    fn with_segment(&self, segment: PathSegment) -> Self {
        let mut segments = self.segments.to_vec();
        segments.push(segment);
        Self {
            segments: segments.into(),
        }
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in self.segments.iter() {
            match segment {
                PathSegment::Field(name) => write!(f, "/{name}")?,
                PathSegment::Index(i) => write!(f, "[{i}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for FieldPath {
    type Err = SourceError;

    /// Parse paths written as `/group/field[3]/subfield`. The leading slash is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut path = Self::root();
        for part in s.split('/').filter(|p| !p.is_empty()) {
            let (name, mut rest) = match part.find('[') {
                Some(i) => part.split_at(i),
                None => (part, ""),
            };
            if name.is_empty() {
                return Err(SourceError::invalid_path(s, "index without a field name"));
            }
            path = path.field(name);

            while let Some(after_open) = rest.strip_prefix('[') {
                let close = after_open
                    .find(']')
                    .ok_or_else(|| SourceError::invalid_path(s, "unclosed '['"))?;
                let index = after_open[..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| SourceError::invalid_path(s, format!("bad index: {e}")))?;
                path = path.index(index);
                rest = &after_open[close + 1..];
            }
            if !rest.is_empty() {
                return Err(SourceError::invalid_path(s, format!("unexpected '{rest}'")));
            }
        }
        Ok(path)
    }
}

/// An attribute attached to a field in the source product.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(Scalar),
}

/// The operations the ingestion needs from a format reader.
pub trait ProductSource {
    /// Read all values of the array at `path` as `data_type`.
    fn read_array(&self, path: &FieldPath, data_type: DataType) -> Result<TypedBuffer, SourceError>;

    /// The dimensions of the array at `path`.
    fn dimensions(&self, path: &FieldPath) -> Result<Vec<usize>, SourceError>;

    /// The attribute `name` of the field at `path`, or `None` if it does not have one.
    fn attribute(&self, path: &FieldPath, name: &str) -> Result<Option<AttributeValue>, SourceError>;

    fn has_field(&self, path: &FieldPath) -> bool;

    fn num_elements(&self, path: &FieldPath) -> Result<usize, SourceError> {
        Ok(self.dimensions(path)?.iter().product())
    }

    /// Read the array at `path` and check that it has exactly `expected` elements.
    fn read_array_checked(
        &self,
        path: &FieldPath,
        data_type: DataType,
        expected: usize,
    ) -> Result<TypedBuffer, SourceError> {
        let data = self.read_array(path, data_type)?;
        if data.len() != expected {
            return Err(SourceError::wrong_count(path, expected, data.len()));
        }
        Ok(data)
    }

    /// Read the array at `path` as doubles, checking the element count.
    fn read_double(&self, path: &FieldPath, expected: usize) -> Result<Vec<f64>, SourceError> {
        let data = self.read_array_checked(path, DataType::Double, expected)?;
        Ok(data.into_double())
    }

    /// The text attribute `name` of the field at `path`.
    fn string_attribute(&self, path: &FieldPath, name: &str) -> Result<Option<String>, SourceError> {
        match self.attribute(path, name)? {
            Some(AttributeValue::Text(s)) => Ok(Some(s)),
            Some(AttributeValue::Number(_)) | None => Ok(None),
        }
    }

    /// The numeric attribute `name` of the field at `path`.
    fn scalar_attribute(&self, path: &FieldPath, name: &str) -> Result<Option<Scalar>, SourceError> {
        match self.attribute(path, name)? {
            Some(AttributeValue::Number(v)) => Ok(Some(v)),
            Some(AttributeValue::Text(_)) | None => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryField {
    dims: Vec<usize>,
    data: TypedBuffer,
    attributes: IndexMap<String, AttributeValue>,
}

/// A product held in memory, for host programs that decode the format themselves and
/// for tests.
///
/// Arrays can be read as their stored type or as double precision.
#[derive(Debug, Clone, Default)]
pub struct MemoryProduct {
    fields: IndexMap<FieldPath, MemoryField>,
}

impl MemoryProduct {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an array at `path`. `data` must have one value per element of `dims`.
    pub fn insert_array<D: Into<TypedBuffer>>(
        &mut self,
        path: &str,
        dims: &[usize],
        data: D,
    ) -> Result<FieldPath, SourceError> {
        let field_path: FieldPath = path.parse()?;
        let data = data.into();
        let expected = dims.iter().product();
        if data.len() != expected {
            return Err(SourceError::wrong_count(&field_path, expected, data.len()));
        }
        self.fields.insert(
            field_path.clone(),
            MemoryField {
                dims: dims.to_vec(),
                data,
                attributes: IndexMap::new(),
            },
        );
        Ok(field_path)
    }

    /// Attach an attribute to an existing field.
    pub fn insert_attribute<S: ToString>(
        &mut self,
        path: &FieldPath,
        name: S,
        value: AttributeValue,
    ) -> Result<(), SourceError> {
        let field = self
            .fields
            .get_mut(path)
            .ok_or_else(|| SourceError::missing_field(path))?;
        field.attributes.insert(name.to_string(), value);
        Ok(())
    }

    fn get(&self, path: &FieldPath) -> Result<&MemoryField, SourceError> {
        self.fields
            .get(path)
            .ok_or_else(|| SourceError::missing_field(path))
    }
}

impl ProductSource for MemoryProduct {
    fn read_array(&self, path: &FieldPath, data_type: DataType) -> Result<TypedBuffer, SourceError> {
        let field = self.get(path)?;
        let stored = field.data.data_type();
        if stored == data_type {
            Ok(field.data.clone())
        } else if data_type == DataType::Double {
            Ok(TypedBuffer::Double(field.data.clone().into_double()))
        } else {
            Err(SourceError::WrongType {
                path: path.to_string(),
                expected: data_type,
                actual: stored,
            })
        }
    }

    fn dimensions(&self, path: &FieldPath) -> Result<Vec<usize>, SourceError> {
        Ok(self.get(path)?.dims.clone())
    }

    fn attribute(&self, path: &FieldPath, name: &str) -> Result<Option<AttributeValue>, SourceError> {
        Ok(self.get(path)?.attributes.get(name).cloned())
    }

    fn has_field(&self, path: &FieldPath) -> bool {
        self.fields.contains_key(path)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn test_navigation_is_immutable() {
        let product = FieldPath::root().field("PRODUCT");
        let sp = product.field("surface_pressure");
        let qa = product.field("qa_value").index(2);
        assert_eq!(product.to_string(), "/PRODUCT");
        assert_eq!(sp.to_string(), "/PRODUCT/surface_pressure");
        assert_eq!(qa.to_string(), "/PRODUCT/qa_value[2]");
        assert_eq!(qa.name(), Some("qa_value"));
        assert_eq!(qa.parent().unwrap().parent(), Some(product));
        assert!(FieldPath::root().parent().is_none());
        assert_eq!(FieldPath::root().to_string(), "/");
    }

    #[rstest]
    #[case("/PRODUCT/SUPPORT_DATA/surface_pressure")]
    #[case("/data[1]/values[0][3]")]
    #[case("/")]
    fn test_parse_display(#[case] path: &str) {
        let p: FieldPath = path.parse().unwrap();
        assert_eq!(p.to_string(), path);
    }

    #[rstest]
    #[case("/a/[1]")]
    #[case("/a[1")]
    #[case("/a[x]")]
    #[case("/a[1]b")]
    fn test_parse_invalid(#[case] path: &str) {
        assert!(matches!(
            path.parse::<FieldPath>().unwrap_err(),
            SourceError::InvalidPath { .. }
        ));
    }

    #[test]
    fn test_memory_product() {
        let mut product = MemoryProduct::new();
        let path = product
            .insert_array("/PRODUCT/layer", &[2, 2], vec![1i32, 2, 3, 4])
            .unwrap();
        product
            .insert_attribute(&path, "units", AttributeValue::Text("1".to_string()))
            .unwrap();
        product
            .insert_attribute(&path, "_FillValue", AttributeValue::Number(Scalar::Int32(-1)))
            .unwrap();

        assert!(product.has_field(&path));
        assert_eq!(product.num_elements(&path).unwrap(), 4);
        assert_eq!(product.read_double(&path, 4).unwrap(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            product.read_array(&path, DataType::Int32).unwrap(),
            TypedBuffer::Int32(vec![1, 2, 3, 4])
        );
        assert!(matches!(
            product.read_array(&path, DataType::Int8).unwrap_err(),
            SourceError::WrongType { .. }
        ));
        assert!(matches!(
            product.read_double(&path, 3).unwrap_err(),
            SourceError::WrongCount { expected: 3, actual: 4, .. }
        ));
        assert_eq!(product.string_attribute(&path, "units").unwrap().as_deref(), Some("1"));
        assert_eq!(
            product.scalar_attribute(&path, "_FillValue").unwrap(),
            Some(Scalar::Int32(-1))
        );
        assert_eq!(product.string_attribute(&path, "_FillValue").unwrap(), None);

        let missing = FieldPath::root().field("nope");
        assert_eq!(
            product.read_double(&missing, 1).unwrap_err(),
            SourceError::MissingField("/nope".to_string())
        );
    }

    #[test]
    fn test_memory_product_count_check() {
        let mut product = MemoryProduct::new();
        let err = product.insert_array("/x", &[3], vec![1.0f32, 2.0]).unwrap_err();
        assert!(matches!(err, SourceError::WrongCount { expected: 3, actual: 2, .. }));
    }
}
