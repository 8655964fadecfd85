use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[schemars(title = "Eviction", inline)]
#[serde(default)]
/// Generation sweep parameters.
pub struct EvictionOptions {
    /// Generations an instance survives without being re-added or kept.
    #[schemars(title = "Max Age", range(min = 1, max = 600))]
    pub max_age: u32,
}

impl Default for EvictionOptions {
    fn default() -> Self {
        Self { max_age: 2 }
    }
}
