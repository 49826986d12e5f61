//! Interface ids and interface offset tables.
//!
//! Every interface gets a small integer id when it is linked. A class records, for each
//! interface it implements, the vtable slot where the interface's methods start. That table
//! is sorted by interface id and paired with a membership bitmap, so "does class C implement
//! interface I" is a single bit test.
//!
//! # Key Components
//!
//! - [`InterfaceIdAllocator`] - process-wide id allocation with per-image release
//! - [`InterfaceOffsets`] - the published per-class offset table
//! - [`crate::TypeSystem::compute_offsets`] - builds the table for a class

mod ids;
mod offsets;

pub use ids::InterfaceIdAllocator;
pub use offsets::{InterfaceOffsetEntry, InterfaceOffsets};
