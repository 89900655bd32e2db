//! The normalized product that an ingestion produces.
//!
//! A [`Product`] is a set of named [`Variable`]s whose dimensions are either one of the
//! shared [`DimensionType`]s, which have a single length across the whole product, or an
//! independent dimension whose length is given by the variable's definition.
use indexmap::IndexMap;

use crate::buffer::{DataType, TypedBuffer};
use crate::error::ArrayError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProductError {
    #[error("Variable '{variable}' uses the {dimension} dimension, but its length has not been set")]
    UndefinedDimension {
        variable: String,
        dimension: DimensionType,
    },
    #[error("Variable '{0}' has an independent dimension but no independent dimension length")]
    MissingIndependentLength(String),
    #[error("Variable '{variable}' should have type {expected}, but the data read has type {actual}")]
    WrongDataType {
        variable: String,
        expected: DataType,
        actual: DataType,
    },
    #[error("Product already has a variable named '{0}'")]
    DuplicateVariable(String),
    #[error("Variable '{variable}': {source}")]
    Array {
        variable: String,
        source: ArrayError,
    },
}

/// The kinds of dimension a variable can have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum DimensionType {
    Time,
    Vertical,
    Latitude,
    Longitude,
    Spectral,
    /// A dimension specific to one variable, such as the two bounds of a layer
    Independent,
}

/// Lengths of the shared dimensions of a product.
pub type DimensionLengths = IndexMap<DimensionType, usize>;

/// Declaration of an output variable: its name, type, dimensions and metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub data_type: DataType,
    pub dimensions: Vec<DimensionType>,
    pub independent_length: Option<usize>,
    pub unit: Option<String>,
    pub description: String,
}

impl VariableDefinition {
    pub fn new<S: ToString>(name: S, data_type: DataType, dimensions: &[DimensionType]) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            dimensions: dimensions.to_vec(),
            independent_length: None,
            unit: None,
            description: String::new(),
        }
    }

    pub fn with_unit<S: ToString>(mut self, unit: S) -> Self {
        self.unit = Some(unit.to_string());
        self
    }

    pub fn with_description<S: ToString>(mut self, description: S) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn with_independent_length(mut self, length: usize) -> Self {
        self.independent_length = Some(length);
        self
    }

    /// The shape of this variable given the lengths of the shared dimensions.
    pub fn shape(&self, lengths: &DimensionLengths) -> Result<Vec<usize>, ProductError> {
        self.dimensions
            .iter()
            .map(|dim| match dim {
                DimensionType::Independent => self
                    .independent_length
                    .ok_or_else(|| ProductError::MissingIndependentLength(self.name.clone())),
                _ => lengths
                    .get(dim)
                    .copied()
                    .ok_or_else(|| ProductError::UndefinedDimension {
                        variable: self.name.clone(),
                        dimension: *dim,
                    }),
            })
            .collect()
    }
}

/// A variable with its data.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    definition: VariableDefinition,
    shape: Vec<usize>,
    data: TypedBuffer,
}

impl Variable {
    /// Create a variable, checking that `data` has the declared type and exactly one
    /// value per element of `shape`.
    pub fn new(
        definition: VariableDefinition,
        shape: Vec<usize>,
        data: TypedBuffer,
    ) -> Result<Self, ProductError> {
        if data.data_type() != definition.data_type {
            return Err(ProductError::WrongDataType {
                variable: definition.name.clone(),
                expected: definition.data_type,
                actual: data.data_type(),
            });
        }
        crate::arrays::check_num_elements(data.len(), &shape).map_err(|e| ProductError::Array {
            variable: definition.name.clone(),
            source: e,
        })?;
        Ok(Self {
            definition,
            shape,
            data,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &VariableDefinition {
        &self.definition
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &TypedBuffer {
        &self.data
    }

    pub fn into_data(self) -> TypedBuffer {
        self.data
    }
}

/// A complete normalized product.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Product {
    dimensions: DimensionLengths,
    variables: IndexMap<String, Variable>,
}

impl Product {
    pub fn new(dimensions: DimensionLengths) -> Self {
        Self {
            dimensions,
            variables: IndexMap::new(),
        }
    }

    pub fn dimension_length(&self, dimension: DimensionType) -> Option<usize> {
        self.dimensions.get(&dimension).copied()
    }

    pub fn dimensions(&self) -> &DimensionLengths {
        &self.dimensions
    }

    pub fn add_variable(&mut self, variable: Variable) -> Result<(), ProductError> {
        if self.variables.contains_key(variable.name()) {
            return Err(ProductError::DuplicateVariable(variable.name().to_string()));
        }
        self.variables.insert(variable.name().to_string(), variable);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// Variables in the order they were added
    pub fn variables(&self) -> impl Iterator<Item = &Variable> {
        self.variables.values()
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }
}
