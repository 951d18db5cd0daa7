//! Super/sub sequence hierarchies and multi-host batches.

mod batch;
mod registry;

pub use batch::{build_batch, leaf_final_label, root_enter_label, BatchUnits};
pub use registry::{HierarchyRegistry, SequenceInfo};
