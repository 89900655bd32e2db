//! Per-adapter numerical policy.
//!
//! A few adapters need constants whose values are specific to one product format, such as
//! the floor applied to the top of atmosphere pressure or the relative tolerance used to
//! recognize noisy fill values. Those live here instead of in the adapters, so that they
//! can be overridden without rebuilding.
//!
//! The configuration is layered with [`figment`]: the built-in defaults come first, then
//! an optional TOML file, then environment variables prefixed with `HARP_`, using `__` to
//! separate nested keys. For example, `HARP_ADAPTERS__S5_L2__TOA_PRESSURE_FLOOR=0.01`
//! overrides the S5 L2 floor. A TOML file looks like:
//!
//! ```toml
//! [adapters.s5_l2]
//! toa_pressure_floor = 1e-3
//!
//! [adapters.gome2_l1]
//! fill_relative_tolerance = 1e-12
//!
//! [adapters.ecmwf_grib]
//! surface_pressure_unit = "hPa"
//! ```
use std::{io::Write, path::Path};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const ENV_PREFIX: &str = "HARP_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not load the ingestion configuration: {0}")]
    Extract(String),
    #[error("Invalid value for {field} in adapter '{adapter}': {reason}")]
    InvalidValue {
        adapter: String,
        field: &'static str,
        reason: String,
    },
    #[error("Error writing configuration template to {path}: {reason}")]
    Template { path: String, reason: String },
}

impl ConfigError {
    fn invalid_value<A: ToString, R: ToString>(adapter: A, field: &'static str, reason: R) -> Self {
        Self::InvalidValue {
            adapter: adapter.to_string(),
            field,
            reason: reason.to_string(),
        }
    }

    fn template<R: ToString>(path: &Path, reason: R) -> Self {
        Self::Template {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Settings for one ingestion adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// Minimum pressure (Pa) for the top of atmosphere boundary when reconstructing
    /// pressure bounds from hybrid coefficients. `None` leaves the boundary as computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toa_pressure_floor: Option<f64>,

    /// Default relative tolerance for fill values that are declared as approximate (see
    /// [`FillValue::Approx`](crate::ingestion::FillValue::Approx)). Fill values declared
    /// as exact are never affected. `None` makes approximate fills match exactly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill_relative_tolerance: Option<f64>,

    /// Unit of the surface pressure field in the source product.
    #[serde(default = "default_surface_pressure_unit")]
    pub surface_pressure_unit: String,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            toa_pressure_floor: None,
            fill_relative_tolerance: None,
            surface_pressure_unit: default_surface_pressure_unit(),
        }
    }
}

impl AdapterConfig {
    fn validate(&self, adapter: &str) -> Result<(), ConfigError> {
        if let Some(floor) = self.toa_pressure_floor {
            if !floor.is_finite() || floor <= 0.0 {
                return Err(ConfigError::invalid_value(
                    adapter,
                    "toa_pressure_floor",
                    format!("must be a positive number, got {floor}"),
                ));
            }
        }

        if let Some(tol) = self.fill_relative_tolerance {
            if !tol.is_finite() || tol < 0.0 {
                return Err(ConfigError::invalid_value(
                    adapter,
                    "fill_relative_tolerance",
                    format!("must be a non-negative number, got {tol}"),
                ));
            }
        }

        if !crate::units::unit_is_valid(&self.surface_pressure_unit) {
            return Err(ConfigError::invalid_value(
                adapter,
                "surface_pressure_unit",
                format!("'{}' is not a valid unit", self.surface_pressure_unit),
            ));
        }
        Ok(())
    }
}

fn default_surface_pressure_unit() -> String {
    "Pa".to_string()
}

/// Configuration for all adapters, keyed by adapter name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestionConfig {
    #[serde(default)]
    pub adapters: IndexMap<String, AdapterConfig>,
}

impl Default for IngestionConfig {
    /// The built-in settings: the S5 L2 adapter floors the top of atmosphere pressure at
    /// 1e-3 Pa and the GOME-2 L1 adapter compares radiance fills with a relative
    /// tolerance of 1e-12.
    fn default() -> Self {
        let mut adapters = IndexMap::new();
        adapters.insert(
            "s5_l2".to_string(),
            AdapterConfig {
                toa_pressure_floor: Some(1e-3),
                ..Default::default()
            },
        );
        adapters.insert(
            "gome2_l1".to_string(),
            AdapterConfig {
                fill_relative_tolerance: Some(1e-12),
                ..Default::default()
            },
        );
        Self { adapters }
    }
}

impl IngestionConfig {
    /// Load the configuration from the built-in defaults, the TOML file at `path` (if given)
    /// and `HARP_` environment variables, with later sources taking precedence.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(p) = path {
            figment = figment.merge(Toml::file_exact(p));
        }
        // Other HARP_ variables (e.g. HARP_AUX_AFGL86) are not ingestion settings
        let env = Env::prefixed(ENV_PREFIX)
            .filter(|k| k.as_str().to_lowercase().starts_with("adapters__"))
            .split("__");
        figment = figment.merge(env);
        Self::from_figment(figment)
    }

    /// Extract and validate the configuration from an already assembled [`Figment`].
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Extract(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML string on top of the built-in defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Self::from_figment(Figment::from(Serialized::defaults(Self::default())).merge(Toml::string(s)))
    }

    /// Settings for `adapter`; adapters without an entry get [`AdapterConfig::default`].
    pub fn adapter(&self, adapter: &str) -> AdapterConfig {
        self.adapters.get(adapter).cloned().unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, adapter) in self.adapters.iter() {
            adapter.validate(name)?;
        }
        Ok(())
    }

    /// Write the built-in configuration, with explanatory comments, to `path`.
    pub fn write_template_example(path: &Path) -> Result<(), ConfigError> {
        let comments = [
            "Numerical settings for the ingestion adapters. Each [adapters.<name>] table",
            "applies to one adapter; adapters without a table use the defaults.",
            "",
            "  - toa_pressure_floor: minimum pressure (Pa) for the top of atmosphere bound",
            "    of reconstructed pressure bounds. Omit to leave the bound as computed.",
            "  - fill_relative_tolerance: for fill values the adapter marks as approximate,",
            "    treat values within |fill| * tolerance as fills. Omit to match exactly.",
            "  - surface_pressure_unit: unit of the surface pressure in the source product.",
            "",
            "Any value can be overridden with an environment variable, for example",
            "HARP_ADAPTERS__S5_L2__TOA_PRESSURE_FLOOR=0.01",
        ];

        let s = toml::to_string_pretty(&Self::default())
            .map_err(|e| ConfigError::template(path, e))?;
        let mut f = std::fs::File::create(path).map_err(|e| ConfigError::template(path, e))?;
        for line in comments {
            writeln!(f, "# {line}").map_err(|e| ConfigError::template(path, e))?;
        }
        write!(f, "{s}").map_err(|e| ConfigError::template(path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_data_dir, toml_blocks};

    #[test]
    fn test_builtin_defaults() {
        let config = IngestionConfig::default();
        assert_eq!(config.adapter("s5_l2").toa_pressure_floor, Some(1e-3));
        assert_eq!(config.adapter("s5_l2").fill_relative_tolerance, None);
        assert_eq!(config.adapter("gome2_l1").fill_relative_tolerance, Some(1e-12));
        assert_eq!(config.adapter("osiris_l2"), AdapterConfig::default());
        assert_eq!(config.adapter("osiris_l2").surface_pressure_unit, "Pa");
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = IngestionConfig::from_toml_str(
            r#"
            [adapters.s5_l2]
            toa_pressure_floor = 0.01

            [adapters.ecmwf_grib]
            surface_pressure_unit = "hPa"
            "#,
        )
        .unwrap();
        assert_eq!(config.adapter("s5_l2").toa_pressure_floor, Some(0.01));
        assert_eq!(config.adapter("gome2_l1").fill_relative_tolerance, Some(1e-12));
        assert_eq!(config.adapter("ecmwf_grib").surface_pressure_unit, "hPa");
    }

    #[test]
    fn test_load_file() {
        let path = test_data_dir().join("configs/override.toml");
        let config = IngestionConfig::from_figment(
            Figment::from(Serialized::defaults(IngestionConfig::default())).merge(Toml::file_exact(&path)),
        )
        .unwrap();
        assert_eq!(config.adapter("s5_l2").toa_pressure_floor, Some(5e-3));
        assert_eq!(config.adapter("gome2_l1").fill_relative_tolerance, Some(1e-10));
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("HARP_AUX_AFGL86", "/opt/harp/afgl86");
            jail.set_env("HARP_AUX_USSTD76", "/opt/harp/usstd76");
            jail.set_env("HARP_ADAPTERS__S5_L2__TOA_PRESSURE_FLOOR", "0.01");
            let config = IngestionConfig::load(None).map_err(|e| e.to_string())?;
            assert_eq!(config.adapter("s5_l2").toa_pressure_floor, Some(0.01));
            assert_eq!(config.adapter("gome2_l1").fill_relative_tolerance, Some(1e-12));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = test_data_dir().join("configs/does_not_exist.toml");
        assert!(IngestionConfig::load(Some(&path)).is_err());
    }

    #[test]
    fn test_invalid_values() {
        let err = IngestionConfig::from_toml_str("[adapters.s5_l2]\ntoa_pressure_floor = -1.0").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "toa_pressure_floor", .. }));

        let path = test_data_dir().join("configs/bad_unit.toml");
        let err = IngestionConfig::from_figment(Figment::new().merge(Toml::file_exact(&path))).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "surface_pressure_unit", .. }));

        let err = IngestionConfig::from_toml_str("[adapters.s5_l2]\nfloor = 1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Extract(_)));
    }

    #[test]
    fn test_module_doc_example() {
        let src = include_str!("config.rs");
        let mut n = 0;
        for block in toml_blocks(src) {
            IngestionConfig::from_toml_str(&block).unwrap();
            n += 1;
        }
        assert_eq!(n, 1);
    }

    #[test]
    fn test_template_round_trip() {
        let path = std::env::temp_dir().join(format!("harp_rs_template_{}.toml", std::process::id()));
        IngestionConfig::write_template_example(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(IngestionConfig::from_toml_str(&text).unwrap(), IngestionConfig::default());
    }
}
