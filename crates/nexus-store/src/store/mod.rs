//! Storage layer - record stores for nodes, relationships, groups and properties
//!
//! A store directory holds one file per record store:
//! - `neostore.nodestore.db`: node records
//! - `neostore.relationshipstore.db`: relationship records
//! - `neostore.relationshipgroupstore.db`: relationship group records
//! - `neostore.propertystore.db`: property records
//! - `neostore.propertystore.db.strings` / `.arrays`: dynamic value chains
//! - `neostore.nodestore.db.labels`: dynamic label chains
//! - `neostore.schemastore.db`: serialized schema rules
//!
//! During an import a temporary group store collects groups in cache order
//! before they are defragmented into the real group store.

pub mod block;
pub mod chain;
pub mod id;
pub mod labels;
pub mod record;
mod record_store;

pub use block::{BlockCursor, BlockStore, MappedBlockStore, MemoryBlockStore};
pub use id::{BatchingIdGenerator, IdBatch, IdGenerator};
pub use record_store::{DynamicStoreAllocator, RecordStore};

use crate::property::{decode_value, DynamicChainReader, PropertyValue};
use crate::{Error, Result};
use record::{
    DynamicKind, DynamicRecord, DynamicRecordFormat, NodeRecordFormat, PropertyRecordFormat,
    RecordFormat, RelationshipFormat, RelationshipGroupFormat, DYNAMIC_HEADER_SIZE,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const NODE_STORE: &str = "neostore.nodestore.db";
const RELATIONSHIP_STORE: &str = "neostore.relationshipstore.db";
const GROUP_STORE: &str = "neostore.relationshipgroupstore.db";
const TEMP_GROUP_STORE: &str = "temp.relationshipgroupstore.db";
const PROPERTY_STORE: &str = "neostore.propertystore.db";
const STRING_STORE: &str = "neostore.propertystore.db.strings";
const ARRAY_STORE: &str = "neostore.propertystore.db.arrays";
const LABEL_STORE: &str = "neostore.nodestore.db.labels";
const SCHEMA_STORE: &str = "neostore.schemastore.db";
const FREE_IDS_FILE: &str = "neostore.freeids.db";

/// Data block sizes of the dynamic stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Bytes per string record
    pub string_block_size: usize,
    /// Bytes per array record
    pub array_block_size: usize,
    /// Bytes per label record
    pub label_block_size: usize,
    /// Bytes per schema record
    pub schema_block_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            string_block_size: 120,
            array_block_size: 120,
            label_block_size: 60,
            schema_block_size: 56,
        }
    }
}

/// All record stores of one database directory
pub struct NeoStores {
    dir: Option<PathBuf>,
    /// Node store
    pub nodes: RecordStore<NodeRecordFormat>,
    /// Relationship store
    pub relationships: RecordStore<RelationshipFormat>,
    /// Final relationship group store
    pub groups: RecordStore<RelationshipGroupFormat>,
    /// Scratch group store written in cache order during linking
    pub temporary_groups: RecordStore<RelationshipGroupFormat>,
    /// Property store
    pub properties: RecordStore<PropertyRecordFormat>,
    /// Dynamic string values
    pub strings: RecordStore<DynamicRecordFormat>,
    /// Dynamic array values
    pub arrays: RecordStore<DynamicRecordFormat>,
    /// Dynamic node labels
    pub labels: RecordStore<DynamicRecordFormat>,
    /// Serialized schema rules
    pub schema: RecordStore<DynamicRecordFormat>,
}

type BlockFactory<'a> = dyn Fn(&str, usize) -> Result<Box<dyn BlockStore>> + 'a;

impl NeoStores {
    /// Create or open the stores in `dir`
    pub fn open<P: AsRef<Path>>(dir: P, settings: &StoreSettings) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let factory = |file: &str, record_size: usize| -> Result<Box<dyn BlockStore>> {
            Ok(Box::new(MappedBlockStore::open(dir.join(file), record_size)?))
        };
        let stores = Self::build(Some(dir.clone()), settings, &factory)?;
        info!("Opened stores in {}", dir.display());
        Ok(stores)
    }

    /// Stores backed by memory only, for tests and dry runs
    pub fn in_memory(settings: &StoreSettings) -> Result<Self> {
        let factory = |_: &str, record_size: usize| -> Result<Box<dyn BlockStore>> {
            Ok(Box::new(MemoryBlockStore::new(record_size)))
        };
        Self::build(None, settings, &factory)
    }

    fn build(dir: Option<PathBuf>, settings: &StoreSettings, factory: &BlockFactory<'_>) -> Result<Self> {
        fn store<F: RecordFormat>(
            name: &'static str,
            file: &str,
            format: F,
            factory: &BlockFactory<'_>,
        ) -> Result<RecordStore<F>> {
            let blocks = factory(file, format.record_size())?;
            RecordStore::new(name, format, blocks)
        }
        fn dynamic(
            name: &'static str,
            file: &str,
            data_size: usize,
            kind: DynamicKind,
            factory: &BlockFactory<'_>,
        ) -> Result<RecordStore<DynamicRecordFormat>> {
            if data_size == 0 {
                return Err(Error::config(format!("{} block size must be positive", name)));
            }
            let blocks = factory(file, DYNAMIC_HEADER_SIZE + data_size)?;
            RecordStore::new(name, DynamicRecordFormat::new(data_size, kind), blocks)
        }

        Ok(Self {
            nodes: store("node", NODE_STORE, NodeRecordFormat, factory)?,
            relationships: store("relationship", RELATIONSHIP_STORE, RelationshipFormat, factory)?,
            groups: store("relationship group", GROUP_STORE, RelationshipGroupFormat, factory)?,
            temporary_groups: store("temporary group", TEMP_GROUP_STORE, RelationshipGroupFormat, factory)?,
            properties: store("property", PROPERTY_STORE, PropertyRecordFormat, factory)?,
            strings: dynamic("string", STRING_STORE, settings.string_block_size, DynamicKind::String, factory)?,
            arrays: dynamic("array", ARRAY_STORE, settings.array_block_size, DynamicKind::Array, factory)?,
            labels: dynamic("label", LABEL_STORE, settings.label_block_size, DynamicKind::Labels, factory)?,
            schema: dynamic("schema", SCHEMA_STORE, settings.schema_block_size, DynamicKind::Schema, factory)?,
            dir,
        })
    }

    /// Directory of a file-backed store
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Dynamic store for a chain kind
    pub fn dynamic_store(&self, kind: DynamicKind) -> &RecordStore<DynamicRecordFormat> {
        match kind {
            DynamicKind::String => &self.strings,
            DynamicKind::Array => &self.arrays,
            DynamicKind::Labels => &self.labels,
            DynamicKind::Schema => &self.schema,
        }
    }

    /// All property values in the chain starting at `first_property`
    pub fn read_properties(&self, first_property: i64) -> Result<Vec<(u32, PropertyValue)>> {
        let mut values = Vec::new();
        for record in chain::property_chain(&self.properties, first_property)? {
            for block in &record.blocks {
                values.push((block.key_id(), decode_value(block, self)?));
            }
        }
        Ok(values)
    }

    /// High ids of every persistent store, keyed by store name
    pub fn high_ids(&self) -> BTreeMap<&'static str, u64> {
        let mut ids = BTreeMap::new();
        ids.insert(self.nodes.name(), self.nodes.high_id());
        ids.insert(self.relationships.name(), self.relationships.high_id());
        ids.insert(self.groups.name(), self.groups.high_id());
        ids.insert(self.properties.name(), self.properties.high_id());
        ids.insert(self.strings.name(), self.strings.high_id());
        ids.insert(self.arrays.name(), self.arrays.high_id());
        ids.insert(self.labels.name(), self.labels.high_id());
        ids.insert(self.schema.name(), self.schema.high_id());
        ids
    }

    /// Flush every store
    pub fn flush(&self) -> Result<()> {
        self.nodes.flush()?;
        self.relationships.flush()?;
        self.groups.flush()?;
        self.temporary_groups.flush()?;
        self.properties.flush()?;
        self.strings.flush()?;
        self.arrays.flush()?;
        self.labels.flush()?;
        self.schema.flush()
    }

    fn free_ids(&self) -> BTreeMap<String, Vec<u64>> {
        let mut free = BTreeMap::new();
        let stores: [(&str, &dyn IdGenerator); 8] = [
            (self.nodes.name(), self.nodes.ids()),
            (self.relationships.name(), self.relationships.ids()),
            (self.groups.name(), self.groups.ids()),
            (self.properties.name(), self.properties.ids()),
            (self.strings.name(), self.strings.ids()),
            (self.arrays.name(), self.arrays.ids()),
            (self.labels.name(), self.labels.ids()),
            (self.schema.name(), self.schema.ids()),
        ];
        for (name, ids) in stores {
            let ids = ids.free_ids();
            if !ids.is_empty() {
                free.insert(name.to_string(), ids);
            }
        }
        free
    }

    /// Flush everything, persist freed ids and drop the temporary group store
    pub fn close(self) -> Result<()> {
        self.flush()?;
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };

        let free = self.free_ids();
        let bytes = bincode::serialize(&free)
            .map_err(|e| Error::storage(format!("Failed to encode free ids: {}", e)))?;
        std::fs::write(dir.join(FREE_IDS_FILE), bytes)?;
        debug!("Persisted free ids for {} stores", free.len());

        drop(self);
        let temp = dir.join(TEMP_GROUP_STORE);
        if temp.exists() {
            std::fs::remove_file(temp)?;
        }
        Ok(())
    }

    /// Free ids persisted by [`NeoStores::close`]
    pub fn read_free_ids<P: AsRef<Path>>(dir: P) -> Result<BTreeMap<String, Vec<u64>>> {
        let path = dir.as_ref().join(FREE_IDS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = std::fs::read(&path)?;
        bincode::deserialize(&bytes)
            .map_err(|e| Error::storage(format!("Failed to decode {}: {}", path.display(), e)))
    }
}

impl DynamicChainReader for NeoStores {
    fn read_chain(&self, kind: DynamicKind, first_record: u64) -> Result<Vec<DynamicRecord>> {
        let records = chain::read_dynamic_chain(self.dynamic_store(kind), first_record)?;
        if let Some(record) = records.iter().find(|r| r.kind != kind) {
            return Err(Error::chain(format!(
                "Record {} in {:?} chain {} is typed {:?}",
                record.id, kind, first_record, record.kind
            )));
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::encode_value;
    use crate::store::record::{NodeRecord, PropertyOwner, PropertyRecord};
    use tempfile::TempDir;

    fn create_test_store() -> (NeoStores, TempDir) {
        let dir = TempDir::new().unwrap();
        let stores = NeoStores::open(dir.path(), &StoreSettings::default()).unwrap();
        (stores, dir)
    }

    #[test]
    fn test_open_creates_files() {
        let (_stores, dir) = create_test_store();
        for file in [NODE_STORE, RELATIONSHIP_STORE, GROUP_STORE, PROPERTY_STORE, STRING_STORE, SCHEMA_STORE] {
            assert!(dir.path().join(file).exists(), "{} missing", file);
        }
    }

    #[test]
    fn test_properties_survive_reopen() {
        let (stores, dir) = create_test_store();
        let long_text = "x".repeat(300);
        let mut record = PropertyRecord::new(stores.properties.next_id().unwrap());
        record.in_use = true;
        record.owner = Some(PropertyOwner::Node(0));
        let mut block = encode_value(
            1,
            &PropertyValue::String(long_text.clone()),
            &mut stores.strings.allocator(),
            &mut stores.arrays.allocator(),
        )
        .unwrap();
        stores.strings.update_chain(&block.take_value_records()).unwrap();
        record.add_block(block).unwrap();
        stores.properties.update_record(&record).unwrap();

        let mut node = NodeRecord::new(stores.nodes.next_id().unwrap());
        node.initialize(true, record.id as i64, false, -1, 0);
        stores.nodes.update_record(&node).unwrap();
        stores.nodes.ids().mark_free(12);
        stores.close().unwrap();

        assert!(!dir.path().join(TEMP_GROUP_STORE).exists());
        assert_eq!(NeoStores::read_free_ids(dir.path()).unwrap()["node"], vec![12]);

        let stores = NeoStores::open(dir.path(), &StoreSettings::default()).unwrap();
        let node = stores.nodes.get_record(0).unwrap();
        let values = stores.read_properties(node.next_prop).unwrap();
        assert_eq!(values, vec![(1, PropertyValue::String(long_text))]);
        assert_eq!(stores.nodes.next_id().unwrap(), 1);
    }

    #[test]
    fn test_chain_kind_is_checked() {
        let stores = NeoStores::in_memory(&StoreSettings::default()).unwrap();
        let mut record = DynamicRecord::new(0, DynamicKind::Array);
        record.in_use = true;
        stores.strings.update_record(&record).unwrap();
        assert!(stores.read_chain(DynamicKind::String, 0).is_err());
    }

    #[test]
    fn test_zero_block_size_rejected() {
        let settings = StoreSettings {
            label_block_size: 0,
            ..Default::default()
        };
        assert!(matches!(NeoStores::in_memory(&settings), Err(Error::Config(_))));
    }
}
