//! Import caches
//!
//! Everything here is sized once per import and addressed by node id:
//! - [`NodeRelationshipCache`]: degrees, density and chain heads for linking
//! - [`NodeLabelsCache`]: labels per node for the counts stages
//! - chunked atomic arrays backing both, with analytic memory estimates

mod array;
mod memory;
mod node_labels;
mod node_relationship;

pub use array::{DynamicLongArray, IntArray, LongArray, MemoryUsage, DEFAULT_CHUNK_SIZE};
pub use memory::{bytes_to_string, fraction_of, probe_memory, MemoryStats};
pub use node_labels::NodeLabelsCache;
pub use node_relationship::{
    Direction, GroupVisit, NodeRelationshipCache, NodeType, GROUP_ENTRY_SIZE, MAX_COUNT,
    MAX_RELATIONSHIP_ID, MAX_SMALL_COUNT, NODE_ENTRY_SIZE,
};
