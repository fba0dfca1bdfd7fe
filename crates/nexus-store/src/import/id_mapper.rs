//! Input id to node id mapping

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Maps input ids to node ids
pub trait IdMapper: Send + Sync {
    /// Map `input_id` to `node_id`; returns the earlier node id when the
    /// input id was already mapped, leaving that mapping in place
    fn put(&self, input_id: &str, node_id: u64) -> Option<u64>;

    /// Node id of `input_id`
    fn get(&self, input_id: &str) -> Option<u64>;

    /// Drop the mapping of `input_id` if it still points at `node_id`
    fn remove(&self, input_id: &str, node_id: u64) -> bool;

    /// Number of mapped input ids
    fn len(&self) -> usize;

    /// Whether nothing is mapped
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent [`IdMapper`] over a sharded hash map
#[derive(Debug, Default)]
pub struct DashIdMapper {
    ids: DashMap<String, u64>,
}

/// Rough bytes per mapped id, key text excluded
pub const ID_MAPPER_ENTRY_SIZE: u64 = 48;

impl DashIdMapper {
    /// Empty mapper
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty mapper with room for `capacity` ids
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: DashMap::with_capacity(capacity),
        }
    }

    /// Estimated bytes for `nodes` mapped ids
    pub fn memory_estimation(nodes: u64) -> u64 {
        nodes * ID_MAPPER_ENTRY_SIZE
    }
}

impl IdMapper for DashIdMapper {
    fn put(&self, input_id: &str, node_id: u64) -> Option<u64> {
        match self.ids.entry(input_id.to_string()) {
            Entry::Occupied(existing) => Some(*existing.get()),
            Entry::Vacant(slot) => {
                slot.insert(node_id);
                None
            }
        }
    }

    fn get(&self, input_id: &str) -> Option<u64> {
        self.ids.get(input_id).map(|id| *id)
    }

    fn remove(&self, input_id: &str, node_id: u64) -> bool {
        self.ids.remove_if(input_id, |_, id| *id == node_id).is_some()
    }

    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_mapping_wins() {
        let mapper = DashIdMapper::new();
        assert_eq!(mapper.put("alice", 0), None);
        assert_eq!(mapper.put("bob", 1), None);
        assert_eq!(mapper.put("alice", 2), Some(0));
        assert_eq!(mapper.get("alice"), Some(0));
        assert_eq!(mapper.get("carol"), None);
        assert_eq!(mapper.len(), 2);
    }

    #[test]
    fn test_remove_only_matching() {
        let mapper = DashIdMapper::with_capacity(4);
        mapper.put("alice", 3);
        assert!(!mapper.remove("alice", 4));
        assert!(mapper.remove("alice", 3));
        assert!(mapper.is_empty());
    }
}
