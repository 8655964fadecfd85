//! Crate-level error types.

use std::fmt;

use crate::gpu::context::RenderContextError;

/// Hard failures of a single slot store.
///
/// Tag and index misses are never errors; lookups and removals report them
/// as `false` or a sentinel value instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotError {
    /// Every slot is live and no tombstone is available for reuse.
    CapacityExceeded {
        /// Fixed capacity of the store that rejected the add.
        capacity: u32,
    },
    /// The tag is already bound to a live slot.
    DuplicateTag,
    /// A store or group manager was configured with zero slots.
    ZeroCapacity,
}

impl fmt::Display for SlotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityExceeded { capacity } => {
                write!(f, "slot store full ({capacity} slots)")
            }
            Self::DuplicateTag => write!(f, "tag already bound to a live slot"),
            Self::ZeroCapacity => write!(f, "slot capacity must be non-zero"),
        }
    }
}

impl std::error::Error for SlotError {}

/// Failures reported by a [`GroupBackend`](crate::backend::GroupBackend).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend refuses to create another group.
    GroupLimit {
        /// Number of groups the backend supports.
        limit: usize,
    },
    /// The supplied resource does not fit the group's resource table
    /// (wrong image size, handle out of range, ...).
    ResourceMismatch(String),
    /// A slot index outside the group's capacity was addressed.
    InvalidSlot {
        /// Offending slot index.
        slot: u32,
    },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupLimit { limit } => {
                write!(f, "backend group limit reached ({limit} groups)")
            }
            Self::ResourceMismatch(msg) => {
                write!(f, "resource rejected: {msg}")
            }
            Self::InvalidSlot { slot } => write!(f, "invalid slot {slot}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// Failure while releasing an owned per-slot payload.
///
/// Never propagated out of the allocator: the slot is tombstoned anyway and
/// the error is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadError(pub String);

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "payload disposal failed: {}", self.0)
    }
}

impl std::error::Error for PayloadError {}

/// Errors produced by the instancer crate.
#[derive(Debug)]
pub enum InstancerError {
    /// Slot store rejected an operation.
    Slot(SlotError),
    /// Backend failed to create a group or upload a resource.
    Backend(BackendError),
    /// GPU context initialization failure.
    Gpu(RenderContextError),
    /// Generic I/O failure.
    Io(std::io::Error),
    /// TOML options parsing/serialization failure.
    OptionsParse(String),
}

impl fmt::Display for InstancerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(e) => write!(f, "slot error: {e}"),
            Self::Backend(e) => write!(f, "backend error: {e}"),
            Self::Gpu(e) => write!(f, "GPU error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::OptionsParse(msg) => {
                write!(f, "options parse error: {msg}")
            }
        }
    }
}

impl std::error::Error for InstancerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Slot(e) => Some(e),
            Self::Backend(e) => Some(e),
            Self::Gpu(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::OptionsParse(_) => None,
        }
    }
}

impl From<SlotError> for InstancerError {
    fn from(e: SlotError) -> Self {
        Self::Slot(e)
    }
}

impl From<BackendError> for InstancerError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<RenderContextError> for InstancerError {
    fn from(e: RenderContextError) -> Self {
        Self::Gpu(e)
    }
}

impl From<std::io::Error> for InstancerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_error_converts_and_keeps_source() {
        let err: InstancerError =
            SlotError::CapacityExceeded { capacity: 4 }.into();
        assert_eq!(err.to_string(), "slot error: slot store full (4 slots)");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn options_parse_has_no_source() {
        let err = InstancerError::OptionsParse("bad".to_owned());
        assert!(std::error::Error::source(&err).is_none());
    }
}
