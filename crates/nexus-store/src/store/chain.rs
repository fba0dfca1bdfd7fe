//! Chain traversal with loop detection
//!
//! Every walk is bounded by the store's high id: a chain can never be longer
//! than the number of slots, so exceeding it means the chain loops.

use super::record::{
    ChainLink, DynamicRecord, DynamicRecordFormat, PropertyRecord, PropertyRecordFormat,
    RelationshipFormat, RelationshipGroupFormat, RelationshipGroupRecord, RelationshipRecord,
    NULL_REFERENCE,
};
use super::RecordStore;
use crate::{Error, Result};

fn max_hops<F: super::record::RecordFormat>(store: &RecordStore<F>) -> u64 {
    store.high_id() + 1
}

/// Read a dynamic chain starting at its start record
pub fn read_dynamic_chain(
    store: &RecordStore<DynamicRecordFormat>,
    first_record: u64,
) -> Result<Vec<DynamicRecord>> {
    let limit = max_hops(store);
    let mut chain = Vec::new();
    let mut next = first_record as i64;
    while next != NULL_REFERENCE {
        if chain.len() as u64 >= limit {
            return Err(Error::chain(format!(
                "{} chain starting at {} loops",
                store.name(),
                first_record
            )));
        }
        let record = store.get_record(next as u64)?;
        if !record.in_use {
            return Err(Error::chain(format!(
                "{} chain starting at {} reaches unused record {}",
                store.name(),
                first_record,
                next
            )));
        }
        if chain.is_empty() != record.start_record {
            return Err(Error::chain(format!(
                "{} record {} has an unexpected start flag",
                store.name(),
                next
            )));
        }
        next = record.next_block;
        chain.push(record);
    }
    Ok(chain)
}

/// Read the property chain of an entity
pub fn property_chain(
    store: &RecordStore<PropertyRecordFormat>,
    first_property: i64,
) -> Result<Vec<PropertyRecord>> {
    let limit = max_hops(store);
    let mut chain = Vec::new();
    let mut next = first_property;
    while next != NULL_REFERENCE {
        if chain.len() as u64 >= limit {
            return Err(Error::chain(format!("Property chain starting at {} loops", first_property)));
        }
        let record = store.get_record(next as u64)?;
        if !record.in_use {
            return Err(Error::chain(format!(
                "Property chain starting at {} reaches unused record {}",
                first_property, next
            )));
        }
        next = record.next_prop;
        chain.push(record);
    }
    Ok(chain)
}

/// Read the group chain of a dense node
pub fn group_chain(
    store: &RecordStore<RelationshipGroupFormat>,
    first_group: i64,
) -> Result<Vec<RelationshipGroupRecord>> {
    let limit = max_hops(store);
    let mut chain: Vec<RelationshipGroupRecord> = Vec::new();
    let mut next = first_group;
    while next != NULL_REFERENCE {
        if chain.len() as u64 >= limit {
            return Err(Error::chain(format!("Group chain starting at {} loops", first_group)));
        }
        let mut record = store.get_record(next as u64)?;
        if !record.in_use {
            return Err(Error::chain(format!(
                "Group chain starting at {} reaches unused record {}",
                first_group, next
            )));
        }
        record.prev = chain.last().map_or(NULL_REFERENCE, |g| g.id as i64);
        next = record.next;
        chain.push(record);
    }
    Ok(chain)
}

/// Iterator over the relationship chain of one node
///
/// The head record must carry the degree in its prev field for `node`; the
/// degree is available through [`RelationshipChain::degree`] after the first
/// record was read.
pub struct RelationshipChain<'a> {
    store: &'a RecordStore<RelationshipFormat>,
    node: u64,
    next: i64,
    hops: u64,
    limit: u64,
    degree: Option<u64>,
    failed: bool,
}

impl<'a> RelationshipChain<'a> {
    /// Walk the chain of `node` starting at `first_relationship`
    pub fn new(store: &'a RecordStore<RelationshipFormat>, node: u64, first_relationship: i64) -> Self {
        Self {
            store,
            node,
            next: first_relationship,
            hops: 0,
            limit: max_hops(store),
            degree: None,
            failed: false,
        }
    }

    /// Degree stored in the chain head, once the head was read
    pub fn degree(&self) -> Option<u64> {
        self.degree
    }

    fn step(&mut self) -> Result<RelationshipRecord> {
        if self.hops >= self.limit {
            return Err(Error::chain(format!("Relationship chain of node {} loops", self.node)));
        }
        let record = self.store.get_record(self.next as u64)?;
        if !record.in_use {
            return Err(Error::chain(format!(
                "Relationship chain of node {} reaches unused record {}",
                self.node, self.next
            )));
        }
        let link = record.prev_for(self.node).ok_or_else(|| {
            Error::chain(format!(
                "Relationship {} in chain of node {} does not touch it",
                record.id, self.node
            ))
        })?;
        match (self.hops, link) {
            (0, ChainLink::Degree(degree)) => self.degree = Some(degree),
            (0, ChainLink::Previous(_)) => {
                return Err(Error::chain(format!(
                    "Relationship {} heads the chain of node {} without a degree",
                    record.id, self.node
                )));
            }
            (_, ChainLink::Degree(_)) => {
                return Err(Error::chain(format!(
                    "Relationship {} is flagged as chain head inside the chain of node {}",
                    record.id, self.node
                )));
            }
            (_, ChainLink::Previous(_)) => {}
        }
        self.hops += 1;
        self.next = record.next_for(self.node).unwrap_or(NULL_REFERENCE);
        Ok(record)
    }
}

impl Iterator for RelationshipChain<'_> {
    type Item = Result<RelationshipRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next == NULL_REFERENCE {
            return None;
        }
        let result = self.step();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}
