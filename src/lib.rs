// -- Lint policy ---------------------------------------------------------
// This is the single source of truth for crate-wide lints.

// Broad lint groups
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
// Documentation
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]
#![deny(rustdoc::bare_urls)]
// No panicking in library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
// No debug/print artifacts
#![deny(clippy::dbg_macro)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
// Import hygiene
#![deny(clippy::wildcard_imports)]
// Complexity limits (thresholds in clippy.toml)
#![deny(clippy::cognitive_complexity)]
#![deny(clippy::too_many_lines)]
#![deny(clippy::excessive_nesting)]
// Function signature hygiene
#![deny(clippy::too_many_arguments)]
#![deny(clippy::fn_params_excessive_bools)]
// Clone / pass-by-value hygiene
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::implicit_clone)]
// String hygiene
#![deny(clippy::inefficient_to_string)]
#![deny(clippy::redundant_closure_for_method_calls)]
#![deny(clippy::manual_string_new)]
#![deny(clippy::str_to_string)]
// Cargo lints (warn, not deny since cargo lints can be noisy)
#![warn(clippy::cargo)]
// Unused / redundant code
#![deny(unused_results)]
#![deny(unused_qualifications)]
// Cast hygiene
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]

//! Generational instance slot allocator for instanced GPU drawing.
//!
//! Many small textured quads (labels, markers, sprites) share a handful of
//! instanced draw calls. Each instance lives in a fixed slot of a group;
//! removed slots become culled tombstones that are reused lowest-first, and
//! a generation clock lets callers evict everything they stopped refreshing
//! in one sweep.
//!
//! # Key entry points
//!
//! - [`bitmaps::BitmapSet`] - tagged quads with a generation clock
//! - [`groups::GroupedSlots`] - overflow across fixed-capacity groups
//! - [`slots::SlotStore`] - one fixed-capacity slot table
//! - [`backend::GroupBackend`] - the seam to GPU storage, with
//!   [`gpu::backend::WgpuBackend`] and [`backend::memory::MemoryBackend`]
//! - [`options::Options`] - TOML-backed configuration
//!
//! # Frame flow
//!
//! Mutations only touch CPU-side records and mark dirty spans. Once per
//! frame the host calls `prepare`, which flushes each group's dirty transform
//! range, refreshes resource tables that changed, and leaves every group
//! ready for one instanced draw of `instance_count` instances.

pub mod backend;
pub mod binder;
pub mod bitmaps;
pub mod error;
pub mod gpu;
pub mod groups;
pub mod options;
pub mod slots;

pub use bitmaps::BitmapSet;
pub use error::InstancerError;
pub use groups::GroupedSlots;
pub use options::Options;
pub use slots::{InstanceTransform, SlotStore, VisibilityRotation};
