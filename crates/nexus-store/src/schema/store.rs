use super::{deserialize, serialize, SchemaRule};
use crate::property::{allocate_records, DynamicRecordAllocator};
use crate::store::chain::read_dynamic_chain;
use crate::store::record::{DynamicRecord, DynamicRecordFormat};
use crate::store::{DynamicStoreAllocator, RecordStore};
use crate::Result;
use tracing::debug;

/// Schema rules stored as dynamic record chains; a rule id is the id of its
/// first record
pub struct SchemaStore<'a> {
    store: &'a RecordStore<DynamicRecordFormat>,
}

/// Allocator whose first record takes a pre-reserved id
struct RuleAllocator<'a> {
    first: Option<u64>,
    inner: DynamicStoreAllocator<'a>,
    store: &'a RecordStore<DynamicRecordFormat>,
}

impl DynamicRecordAllocator for RuleAllocator<'_> {
    fn record_data_size(&self) -> usize {
        self.inner.record_data_size()
    }

    fn next_record(&mut self) -> Result<DynamicRecord> {
        match self.first.take() {
            Some(id) => Ok(self.store.new_record(id)),
            None => self.inner.next_record(),
        }
    }
}

impl<'a> SchemaStore<'a> {
    /// Schema access over the schema record store
    pub fn new(store: &'a RecordStore<DynamicRecordFormat>) -> Self {
        Self { store }
    }

    /// Reserve the id for a rule about to be created
    pub fn next_rule_id(&self) -> Result<u64> {
        self.store.next_id()
    }

    /// Serialize and write a rule under its id
    pub fn write_rule(&self, rule: &SchemaRule) -> Result<()> {
        let bytes = serialize(rule)?;
        let mut allocator = RuleAllocator {
            first: Some(rule.id()),
            inner: self.store.allocator(),
            store: self.store,
        };
        let records = allocate_records(&bytes, &mut allocator)?;
        self.store.update_chain(&records)?;
        debug!("Wrote schema rule {} '{}' in {} records", rule.id(), rule.name(), records.len());
        Ok(())
    }

    /// Read one rule
    pub fn load_rule(&self, rule_id: u64) -> Result<SchemaRule> {
        let records = read_dynamic_chain(self.store, rule_id)?;
        let bytes: Vec<u8> = records.iter().flat_map(|r| r.data.iter().copied()).collect();
        deserialize(rule_id, &bytes)
    }

    /// Every stored rule, ordered by id
    pub fn load_all(&self) -> Result<Vec<SchemaRule>> {
        let mut rules = Vec::new();
        for record in self.store.scan(0..self.store.high_id())? {
            if record.in_use && record.start_record {
                rules.push(self.load_rule(record.id)?);
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ConstraintKind, ConstraintRule, IndexKind, IndexProvider, IndexRule, SchemaDescriptor};
    use crate::store::{NeoStores, StoreSettings};

    #[test]
    fn test_rules_round_trip_through_store() {
        let stores = NeoStores::in_memory(&StoreSettings {
            schema_block_size: 8,
            ..Default::default()
        })
        .unwrap();
        let schema = SchemaStore::new(&stores.schema);

        let index_id = schema.next_rule_id().unwrap();
        let constraint_id = schema.next_rule_id().unwrap();
        let index = SchemaRule::Index(IndexRule {
            id: index_id,
            descriptor: SchemaDescriptor::for_label(1, &[2]),
            provider: IndexProvider::new("range", "1.0"),
            kind: IndexKind::Unique {
                owning_constraint: Some(constraint_id),
            },
            name: "person_email".to_string(),
        });
        let constraint = SchemaRule::Constraint(ConstraintRule {
            id: constraint_id,
            descriptor: SchemaDescriptor::for_label(1, &[2]),
            kind: ConstraintKind::Unique {
                owned_index: Some(index_id),
            },
            name: "unique_email".to_string(),
        });
        schema.write_rule(&index).unwrap();
        schema.write_rule(&constraint).unwrap();

        assert_eq!(schema.load_all().unwrap(), vec![index, constraint]);
    }
}
