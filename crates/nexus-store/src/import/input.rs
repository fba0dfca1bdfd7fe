//! Import input model

use crate::property::PropertyValue;
use crate::Result;

/// A node as supplied by an input source
///
/// Labels and property keys are token ids resolved by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct InputNode {
    /// Id used by relationships of the same input to refer to this node
    pub input_id: String,
    /// Label ids
    pub labels: Vec<u32>,
    /// Property key ids and values
    pub properties: Vec<(u32, PropertyValue)>,
}

/// A relationship as supplied by an input source
#[derive(Debug, Clone, PartialEq)]
pub struct InputRelationship {
    /// Input id of the start node
    pub start: String,
    /// Input id of the end node
    pub end: String,
    /// Relationship type id
    pub rel_type: u32,
    /// Property key ids and values
    pub properties: Vec<(u32, PropertyValue)>,
}

/// Batches read lazily from an input source
pub type InputBatches<'a, T> = Box<dyn Iterator<Item = Result<Vec<T>>> + Send + 'a>;

/// Rough sizes of an input, used to size caches before reading it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Estimates {
    /// Number of nodes
    pub nodes: u64,
    /// Number of relationships
    pub relationships: u64,
    /// Highest label id plus one
    pub labels: u64,
}

/// Source of nodes and relationships
///
/// Both streams may be read once each; nodes are always read first.
pub trait Input: Sync {
    /// Node batches of at most `batch_size` nodes
    fn nodes(&self, batch_size: usize) -> Result<InputBatches<'_, InputNode>>;

    /// Relationship batches of at most `batch_size` relationships
    fn relationships(&self, batch_size: usize) -> Result<InputBatches<'_, InputRelationship>>;

    /// Size estimates; zeros when unknown
    fn estimates(&self) -> Estimates {
        Estimates::default()
    }
}

/// Input held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryInput {
    /// Nodes in input order
    pub nodes: Vec<InputNode>,
    /// Relationships in input order
    pub relationships: Vec<InputRelationship>,
}

impl InMemoryInput {
    /// Input over the given entities
    pub fn new(nodes: Vec<InputNode>, relationships: Vec<InputRelationship>) -> Self {
        Self { nodes, relationships }
    }
}

fn batches<T: Clone + Send + Sync>(items: &[T], batch_size: usize) -> InputBatches<'_, T> {
    Box::new(items.chunks(batch_size.max(1)).map(|chunk| Ok(chunk.to_vec())))
}

impl Input for InMemoryInput {
    fn nodes(&self, batch_size: usize) -> Result<InputBatches<'_, InputNode>> {
        Ok(batches(&self.nodes, batch_size))
    }

    fn relationships(&self, batch_size: usize) -> Result<InputBatches<'_, InputRelationship>> {
        Ok(batches(&self.relationships, batch_size))
    }

    fn estimates(&self) -> Estimates {
        let labels = self
            .nodes
            .iter()
            .flat_map(|n| n.labels.iter())
            .max()
            .map_or(0, |&label| label as u64 + 1);
        Estimates {
            nodes: self.nodes.len() as u64,
            relationships: self.relationships.len() as u64,
            labels,
        }
    }
}
