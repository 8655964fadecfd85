//! Allocator options with TOML preset support.
//!
//! Options serialize to/from TOML so a host application can keep them next
//! to its other renderer settings.

mod eviction;
mod layers;
mod slots;

use std::path::Path;

pub use eviction::EvictionOptions;
pub use layers::LayerOptions;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
pub use slots::SlotOptions;

use crate::error::InstancerError;

/// Top-level options container. All sub-structs use `#[serde(default)]` so
/// partial TOML files (e.g. only overriding `[eviction]`) work correctly.
#[derive(
    Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, JsonSchema,
)]
#[serde(default)]
pub struct Options {
    /// Slot allocation parameters.
    pub slots: SlotOptions,
    /// Texture layer size.
    pub layers: LayerOptions,
    /// Generation sweep parameters.
    pub eviction: EvictionOptions,
}

impl Options {
    /// Generate JSON Schema describing the options.
    #[must_use]
    pub fn json_schema() -> schemars::Schema {
        schemars::schema_for!(Options)
    }

    /// Load options from a TOML file. Missing fields use defaults.
    ///
    /// # Errors
    ///
    /// [`InstancerError::Io`] if the file cannot be read and
    /// [`InstancerError::OptionsParse`] if it is not valid TOML.
    pub fn load(path: &Path) -> Result<Self, InstancerError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse options from a TOML string.
    ///
    /// # Errors
    ///
    /// [`InstancerError::OptionsParse`] if `content` is not valid TOML.
    pub fn from_toml(content: &str) -> Result<Self, InstancerError> {
        toml::from_str(content)
            .map_err(|e| InstancerError::OptionsParse(e.to_string()))
    }

    /// Save options to a TOML file (pretty-printed).
    ///
    /// # Errors
    ///
    /// [`InstancerError::OptionsParse`] on serialization failure and
    /// [`InstancerError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), InstancerError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| InstancerError::OptionsParse(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}
