//! TOML schema files
//!
//! ```toml
//! [[entity]]
//! name = "Device"
//!
//! [[entity.relations]]
//! name = "interfaces"
//! cardinality = "tomanycont"
//! remote_type = "Interface"
//! remote_name = "device"
//!
//! [[entity]]
//! name = "Interface"
//!
//! [[entity.relations]]
//! name = "device"
//! cardinality = "toone"
//! remote_type = "Device"
//! remote_name = "interfaces"
//! ```

use std::fs;
use std::path::Path;

use super::{Schema, SchemaDefinition};
use crate::error::{RelationsError, RelationsResult};

impl Schema {
    /// Parse and validate a schema from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> RelationsResult<Schema> {
        let content = fs::read_to_string(&path).map_err(|e| {
            RelationsError::Configuration(format!(
                "Failed to read schema file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate a schema from a TOML string
    pub fn from_toml_str(content: &str) -> RelationsResult<Schema> {
        let definition: SchemaDefinition = ::toml::from_str(content).map_err(|e| {
            RelationsError::Configuration(format!("Failed to parse TOML schema: {}", e))
        })?;
        Schema::from_definition(definition)
    }

    /// Convert the schema declaration back to a TOML string.
    pub fn to_toml(&self) -> String {
        ::toml::to_string_pretty(self.definition())
            .unwrap_or_else(|e| format!("# Error serializing to TOML: {}", e))
    }
}
