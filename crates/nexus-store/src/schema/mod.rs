//! Schema rules - index and constraint descriptors
//!
//! Only the descriptors are kept here; the index structures they describe
//! live elsewhere. Rules are serialized with [`serialize`] and stored as
//! schema-typed dynamic record chains by [`SchemaStore`].

mod serialization;
mod store;

pub use serialization::{deserialize, serialize};
pub use store::SchemaStore;

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of entity a schema applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Nodes, keyed by label
    Node = 0,
    /// Relationships, keyed by type
    Relationship = 1,
}

/// How a multi-token schema matches entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertySchemaType {
    /// Entity must have all properties
    CompleteAllTokens = 0,
    /// Entity may have any of the properties
    PartialAnyToken = 1,
}

/// Which entities and properties a rule covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaDescriptor {
    /// Nodes with one label
    Label {
        /// Label id
        label: u32,
        /// Property key ids
        properties: Vec<u32>,
    },
    /// Relationships of one type
    RelationshipType {
        /// Relationship type id
        rel_type: u32,
        /// Property key ids
        properties: Vec<u32>,
    },
    /// Entities with any of several tokens
    MultiToken {
        /// Nodes or relationships
        entity: EntityType,
        /// Matching mode
        schema_type: PropertySchemaType,
        /// Label or type ids
        tokens: Vec<u32>,
        /// Property key ids
        properties: Vec<u32>,
    },
}

impl SchemaDescriptor {
    /// Single-label, single-or-composite property schema
    pub fn for_label(label: u32, properties: &[u32]) -> Self {
        Self::Label {
            label,
            properties: properties.to_vec(),
        }
    }

    /// Single-type, single-or-composite property schema
    pub fn for_rel_type(rel_type: u32, properties: &[u32]) -> Self {
        Self::RelationshipType {
            rel_type,
            properties: properties.to_vec(),
        }
    }

    /// Property key ids covered
    pub fn properties(&self) -> &[u32] {
        match self {
            Self::Label { properties, .. }
            | Self::RelationshipType { properties, .. }
            | Self::MultiToken { properties, .. } => properties,
        }
    }

    /// Entity kind the schema applies to
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Label { .. } => EntityType::Node,
            Self::RelationshipType { .. } => EntityType::Relationship,
            Self::MultiToken { entity, .. } => *entity,
        }
    }

    /// Label or type ids
    pub fn tokens(&self) -> Vec<u32> {
        match self {
            Self::Label { label, .. } => vec![*label],
            Self::RelationshipType { rel_type, .. } => vec![*rel_type],
            Self::MultiToken { tokens, .. } => tokens.clone(),
        }
    }
}

/// Index provider identification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexProvider {
    /// Provider key
    pub key: String,
    /// Provider version
    pub version: String,
}

impl IndexProvider {
    /// Provider with the given key and version
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
        }
    }
}

/// General or unique index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndexKind {
    /// Plain index
    General,
    /// Index backing a uniqueness constraint
    Unique {
        /// Constraint owning this index, once it has been created
        owning_constraint: Option<u64>,
    },
}

/// An index rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexRule {
    /// Rule id
    pub id: u64,
    /// Indexed schema
    pub descriptor: SchemaDescriptor,
    /// Index provider
    pub provider: IndexProvider,
    /// General or unique
    pub kind: IndexKind,
    /// Rule name
    pub name: String,
}

/// Constraint flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConstraintKind {
    /// Property existence
    Exists,
    /// Property uniqueness
    Unique {
        /// Index enforcing the constraint
        owned_index: Option<u64>,
    },
    /// Uniqueness plus existence (node key)
    UniqueExists {
        /// Index enforcing the constraint
        owned_index: Option<u64>,
    },
}

impl ConstraintKind {
    /// Whether the constraint requires unique values
    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Unique { .. } | Self::UniqueExists { .. })
    }
}

/// A constraint rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintRule {
    /// Rule id
    pub id: u64,
    /// Constrained schema
    pub descriptor: SchemaDescriptor,
    /// Constraint flavour
    pub kind: ConstraintKind,
    /// Rule name
    pub name: String,
}

/// A stored schema rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SchemaRule {
    /// Index rule
    Index(IndexRule),
    /// Constraint rule
    Constraint(ConstraintRule),
}

impl SchemaRule {
    /// Rule id
    pub fn id(&self) -> u64 {
        match self {
            Self::Index(rule) => rule.id,
            Self::Constraint(rule) => rule.id,
        }
    }

    /// Rule name
    pub fn name(&self) -> &str {
        match self {
            Self::Index(rule) => &rule.name,
            Self::Constraint(rule) => &rule.name,
        }
    }

    /// Schema covered by the rule
    pub fn descriptor(&self) -> &SchemaDescriptor {
        match self {
            Self::Index(rule) => &rule.descriptor,
            Self::Constraint(rule) => &rule.descriptor,
        }
    }

    /// `(entity, token, property)` when this is a single-property uniqueness constraint
    pub fn unique_single_property(&self) -> Option<(EntityType, u32, u32)> {
        let Self::Constraint(rule) = self else {
            return None;
        };
        if !rule.kind.is_unique() {
            return None;
        }
        match &rule.descriptor {
            SchemaDescriptor::Label { label, properties } if properties.len() == 1 => {
                Some((EntityType::Node, *label, properties[0]))
            }
            SchemaDescriptor::RelationshipType { rel_type, properties } if properties.len() == 1 => {
                Some((EntityType::Relationship, *rel_type, properties[0]))
            }
            _ => None,
        }
    }

    /// Name given to rules stored without one
    pub fn default_name(&self) -> String {
        match self {
            Self::Index(rule) => default_index_name(rule.id),
            Self::Constraint(rule) => default_constraint_name(rule.id),
        }
    }
}

pub(crate) fn default_index_name(id: u64) -> String {
    format!("index_{}", id)
}

pub(crate) fn default_constraint_name(id: u64) -> String {
    format!("constraint_{}", id)
}

/// Reject names that cannot be stored
pub fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid_argument("Schema rule name cannot be empty"));
    }
    if name.contains('\0') {
        return Err(Error::invalid_argument(format!(
            "Schema rule name {:?} contains a null character",
            name
        )));
    }
    Ok(())
}

impl fmt::Display for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label { label, properties } => write!(f, ":label[{}]({:?})", label, properties),
            Self::RelationshipType { rel_type, properties } => {
                write!(f, "-[type[{}]]-({:?})", rel_type, properties)
            }
            Self::MultiToken {
                entity,
                tokens,
                properties,
                ..
            } => write!(f, "{:?}{:?}({:?})", entity, tokens, properties),
        }
    }
}
