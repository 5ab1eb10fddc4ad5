//! Declarative types configuration.
//!
//! ```json
//! {
//!   "004344": {
//!     "features": { "speed": { "idx": 0, "encoding": { "type": "number" } } },
//!     "types": { "car": { "features": { "rpm": { "idx": 1 } } } }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use twinsight_core::{Result, TwinError, DEFAULT_SEGMENT};

use crate::table::{MetaFeature, TypeTable};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeConfig {
    #[serde(default)]
    pub features: BTreeMap<String, MetaFeature>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentConfig {
    #[serde(default)]
    pub features: BTreeMap<String, MetaFeature>,
    #[serde(default)]
    pub types: BTreeMap<String, TypeConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypesConfig {
    pub segments: BTreeMap<String, SegmentConfig>,
}

impl TypesConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            TwinError::Configuration(format!("Validation of types configuration failed: {}", e))
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TwinError::Configuration(format!("Failed to read types configuration {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Register every configured segment, type and feature in `table`.
    pub fn apply_to(&self, table: &mut TypeTable) -> Result<()> {
        for (segment, config) in &self.segments {
            if segment == DEFAULT_SEGMENT {
                return Err(TwinError::Configuration(format!(
                    "Dynamic segment {} cannot be configured via configuration file",
                    segment
                )));
            }

            for (feature, meta) in &config.features {
                table.register_feature(segment, None, feature, meta.clone())?;
            }

            for (type_name, type_config) in &config.types {
                if table.contains(type_name) {
                    return Err(TwinError::Configuration(format!(
                        "Duplicate type {} found in {}",
                        type_name, segment
                    )));
                }

                if type_config.features.is_empty() {
                    table.register_type(segment, type_name)?;
                    continue;
                }

                for (feature, meta) in &type_config.features {
                    table.register_feature(segment, Some(type_name), feature, meta.clone())?;
                }
            }
        }

        tracing::debug!(segments = self.segments.len(), "Types configuration applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "004344": {
            "features": { "speed": { "idx": 0, "unit": "km/h" } },
            "types": {
                "car": { "features": { "rpm": { "idx": 1 } } },
                "trailer": { "features": {} }
            }
        }
    }"#;

    #[test]
    fn applies_segments_types_and_features() {
        let config = TypesConfig::from_json(CONFIG).unwrap();
        let mut table = TypeTable::new();
        config.apply_to(&mut table).unwrap();

        assert_eq!(table.resolve_types("004344").unwrap(), vec!["car", "trailer"]);
        assert_eq!(table.resolve_feature_at("car", 1).unwrap(), "rpm");
        assert_eq!(table.resolve_feature_at("trailer", 0).unwrap(), "speed");
    }

    #[test]
    fn default_segment_cannot_be_configured() {
        let config = TypesConfig::from_json(r#"{"000000": {"features": {}}}"#).unwrap();
        let err = config.apply_to(&mut TypeTable::new()).unwrap_err();
        assert!(matches!(err, TwinError::Configuration(_)));
    }

    #[test]
    fn duplicate_types_across_segments_are_rejected() {
        let config = TypesConfig::from_json(
            r#"{
                "100000": { "types": { "car": {} } },
                "200000": { "types": { "car": {} } }
            }"#,
        )
        .unwrap();
        assert!(config.apply_to(&mut TypeTable::new()).is_err());
    }

    #[test]
    fn malformed_configuration() {
        assert!(matches!(
            TypesConfig::from_json(r#"{"004344": {"features": []}}"#),
            Err(TwinError::Configuration(_))
        ));
        assert!(TypesConfig::from_path("/nonexistent/types.json").is_err());
    }
}
