//! CPU-side slot allocation: the instance record layout, the fixed-capacity
//! slot store, and generation sweeps over it.

/// Generation sweeps with a keep set.
pub mod eviction;
/// Fixed-capacity slot store with tag lookup.
pub mod store;
/// Instance transform cells, visibility modes and quad placement.
pub mod transform;

pub use eviction::SweepReport;
pub use store::{NewInstance, OwnedPayload, SlotStore};
pub use transform::{
    AlphaFade, BitmapPlacement, InstanceTransform, VisibilityRotation,
};
