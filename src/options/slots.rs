use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Slots", inline)]
#[serde(default)]
/// Slot allocation parameters.
pub struct SlotOptions {
    /// Requested instances per group. The effective value is clamped to
    /// what the backend can address in one draw call.
    #[schemars(title = "Max Per Group", range(min = 1))]
    pub max_per_group: u32,
    /// Debug label prefix for GPU resources.
    #[schemars(skip)]
    pub label: String,
}

impl Default for SlotOptions {
    fn default() -> Self {
        Self {
            max_per_group: 256,
            label: "Bitmaps".to_owned(),
        }
    }
}
