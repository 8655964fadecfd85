use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Layers", inline)]
#[serde(default)]
/// Size of the per-slot texture layers.
pub struct LayerOptions {
    /// Layer width in pixels.
    #[schemars(title = "Width", range(min = 1, max = 4096))]
    pub width: u32,
    /// Layer height in pixels.
    #[schemars(title = "Height", range(min = 1, max = 4096))]
    pub height: u32,
}

impl Default for LayerOptions {
    fn default() -> Self {
        Self {
            width: 128,
            height: 32,
        }
    }
}
