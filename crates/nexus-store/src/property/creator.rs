use super::{encode_value, PropertyBlock, PropertyValue};
use crate::store::record::{PropertyOwner, PropertyRecord, NULL_REFERENCE};
use crate::store::NeoStores;
use crate::Result;

/// Builds property chains for entities
///
/// Blocks are packed in key order into as few records as the payload allows;
/// a block never spans two records.
pub struct PropertyCreator<'a> {
    stores: &'a NeoStores,
}

impl<'a> PropertyCreator<'a> {
    /// Creator writing into `stores`
    pub fn new(stores: &'a NeoStores) -> Self {
        Self { stores }
    }

    /// Encode key/value pairs; for repeated keys the last value wins
    pub fn encode(&self, properties: &[(u32, PropertyValue)]) -> Result<Vec<PropertyBlock>> {
        let mut sorted: Vec<&(u32, PropertyValue)> = properties.iter().collect();
        // stable: the last of equal keys stays last
        sorted.sort_by_key(|(key, _)| *key);
        let mut blocks: Vec<PropertyBlock> = Vec::with_capacity(sorted.len());
        for (index, (key, value)) in sorted.iter().enumerate() {
            if sorted.get(index + 1).is_some_and(|(next, _)| next == key) {
                continue;
            }
            blocks.push(encode_value(
                *key,
                value,
                &mut self.stores.strings.allocator(),
                &mut self.stores.arrays.allocator(),
            )?);
        }
        Ok(blocks)
    }

    /// Pack blocks into a linked chain of fresh records owned by `owner`
    pub fn create_chain(&self, owner: PropertyOwner, blocks: Vec<PropertyBlock>) -> Result<Vec<PropertyRecord>> {
        let mut records: Vec<PropertyRecord> = Vec::new();
        for block in blocks {
            let needs_record = records.last().is_none_or(|r| !r.has_space_for(&block));
            if needs_record {
                let mut record = PropertyRecord::new(self.stores.properties.next_id()?);
                record.in_use = true;
                record.created = true;
                record.owner = Some(owner);
                if let Some(previous) = records.last_mut() {
                    previous.next_prop = record.id as i64;
                    record.prev_prop = previous.id as i64;
                }
                records.push(record);
            }
            if let Some(record) = records.last_mut() {
                record.add_block(block)?;
            }
        }
        Ok(records)
    }

    /// Write records together with the dynamic chains of their blocks
    pub fn write_chain(&self, records: &mut [PropertyRecord]) -> Result<()> {
        for record in records.iter_mut() {
            for block in &mut record.blocks {
                let chain = block.take_value_records();
                if chain.is_empty() {
                    continue;
                }
                match block.property_type() {
                    Some(super::PropertyType::Array) => self.stores.arrays.update_chain(&chain)?,
                    _ => self.stores.strings.update_chain(&chain)?,
                }
                block.set_value_records(chain);
            }
            self.stores.properties.update_record(record)?;
        }
        Ok(())
    }

    /// Encode, pack and write the properties of one entity
    ///
    /// Returns the first property record id, or `NULL_REFERENCE` when there
    /// are no properties.
    pub fn create_properties(&self, owner: PropertyOwner, properties: &[(u32, PropertyValue)]) -> Result<i64> {
        if properties.is_empty() {
            return Ok(NULL_REFERENCE);
        }
        let blocks = self.encode(properties)?;
        let mut records = self.create_chain(owner, blocks)?;
        self.write_chain(&mut records)?;
        Ok(records.first().map_or(NULL_REFERENCE, |r| r.id as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::ArrayValue;
    use crate::store::StoreSettings;
    use crate::store::chain::property_chain;

    fn create_test_stores() -> NeoStores {
        NeoStores::in_memory(&StoreSettings::default()).unwrap()
    }

    #[test]
    fn test_no_properties() {
        let stores = create_test_stores();
        let creator = PropertyCreator::new(&stores);
        assert_eq!(creator.create_properties(PropertyOwner::Node(0), &[]).unwrap(), NULL_REFERENCE);
        assert_eq!(stores.properties.high_id(), 0);
    }

    #[test]
    fn test_blocks_packed_across_records() {
        let stores = create_test_stores();
        let creator = PropertyCreator::new(&stores);
        let properties: Vec<(u32, PropertyValue)> = vec![
            (1, PropertyValue::Int(1)),
            (2, PropertyValue::Double(2.0)),
            (3, PropertyValue::Bool(true)),
            (4, PropertyValue::Long(i64::MIN)),
            (5, "a string that is far too long to be stored inline in a block".into()),
            (6, PropertyValue::Array(ArrayValue::Double(vec![1.0; 40]))),
        ];
        let first = creator.create_properties(PropertyOwner::Relationship(3), &properties).unwrap();

        let chain = property_chain(&stores.properties, first).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].prev_prop, NULL_REFERENCE);
        assert_eq!(chain[1].prev_prop, chain[0].id as i64);
        assert!(chain.iter().all(|r| r.owner == Some(PropertyOwner::Relationship(3))));

        let mut values = stores.read_properties(first).unwrap();
        values.sort_by_key(|(key, _)| *key);
        assert_eq!(values, properties);
    }

    #[test]
    fn test_repeated_key_last_wins() {
        let stores = create_test_stores();
        let creator = PropertyCreator::new(&stores);
        let first = creator
            .create_properties(
                PropertyOwner::Node(1),
                &[(7, PropertyValue::Int(1)), (7, PropertyValue::Int(2))],
            )
            .unwrap();
        assert_eq!(stores.read_properties(first).unwrap(), vec![(7, PropertyValue::Int(2))]);
    }
}
