use super::array::{DynamicLongArray, LongArray, MemoryUsage, DEFAULT_CHUNK_SIZE};
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};

const SPILL_FLAG: u64 = 1 << 63;
const INLINE_BITS: u32 = 63;

fn put_bits(words: &mut [u64], offset: u32, bits: u32, value: u64) {
    let word = (offset / 64) as usize;
    let shift = offset % 64;
    let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
    words[word] |= (value & mask) << shift;
    if shift + bits > 64 {
        words[word + 1] |= (value & mask) >> (64 - shift);
    }
}

fn get_bits(words: &[u64], offset: u32, bits: u32) -> u64 {
    let word = (offset / 64) as usize;
    let shift = offset % 64;
    let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
    let mut value = words[word] >> shift;
    if shift + bits > 64 {
        value |= words[word + 1] << (64 - shift);
    }
    value & mask
}

/// Labels of every node, bit-packed, for the counts stages
///
/// Each node has one 63-bit slot holding `[count][label]...` with
/// `bits_per_label` bits per field. Nodes with too many labels for the slot
/// spill into a shared overflow array and keep only its index.
pub struct NodeLabelsCache {
    high_label_id: u32,
    bits_per_label: u32,
    worst_case_words: u64,
    nodes: LongArray,
    spill: DynamicLongArray,
    spill_cursor: AtomicU64,
}

impl NodeLabelsCache {
    /// Cache for `node_count` nodes with label ids up to `high_label_id`
    pub fn new(node_count: u64, high_label_id: u32) -> Self {
        // wide enough for a label id and for a count of every label
        let widest = high_label_id as u64 + 1;
        let bits_per_label = (u64::BITS - widest.leading_zeros()).max(1);
        let worst_case_bits = bits_per_label as u64 * (widest + 1);
        Self {
            high_label_id,
            bits_per_label,
            worst_case_words: worst_case_bits.div_ceil(64),
            nodes: LongArray::new(node_count, 0),
            spill: DynamicLongArray::new(0, DEFAULT_CHUNK_SIZE),
            spill_cursor: AtomicU64::new(0),
        }
    }

    /// Bytes for the node slots of `node_count` nodes
    pub fn memory_estimation(node_count: u64) -> u64 {
        node_count * 8
    }

    /// Number of nodes covered
    pub fn node_count(&self) -> u64 {
        self.nodes.length()
    }

    /// Store the labels of `node`; each node is written at most once
    pub fn put(&self, node: u64, labels: &[u32]) -> Result<()> {
        if node >= self.nodes.length() {
            return Err(Error::invalid_argument(format!(
                "Node {} outside of labels cache for {} nodes",
                node,
                self.nodes.length()
            )));
        }
        if let Some(label) = labels.iter().find(|&&l| l > self.high_label_id) {
            return Err(Error::invalid_argument(format!(
                "Label {} above the high label id {}",
                label, self.high_label_id
            )));
        }
        if labels.len() as u64 > self.high_label_id as u64 + 1 {
            return Err(Error::capacity(format!("Node {} has {} labels", node, labels.len())));
        }

        let fields = labels.len() as u32 + 1;
        let words = (fields * self.bits_per_label).div_ceil(64).max(1) as usize;
        let mut packed = vec![0u64; words];
        put_bits(&mut packed, 0, self.bits_per_label, labels.len() as u64);
        for (i, &label) in labels.iter().enumerate() {
            put_bits(&mut packed, (i as u32 + 1) * self.bits_per_label, self.bits_per_label, label as u64);
        }

        if fields * self.bits_per_label <= INLINE_BITS {
            self.nodes.set(node, packed[0] as i64);
        } else {
            let index = self.spill_cursor.fetch_add(self.worst_case_words, Ordering::Relaxed);
            for (i, word) in packed.iter().enumerate() {
                self.spill.set(index + i as u64, *word as i64);
            }
            self.nodes.set(node, (SPILL_FLAG | index) as i64);
        }
        Ok(())
    }

    /// Labels of `node` into `target`, which is cleared first
    pub fn get(&self, node: u64, target: &mut Vec<u32>) {
        target.clear();
        if node >= self.nodes.length() {
            return;
        }
        let slot = self.nodes.get(node) as u64;
        let words: Vec<u64> = if slot & SPILL_FLAG != 0 {
            let index = slot & !SPILL_FLAG;
            (0..self.worst_case_words)
                .map(|i| self.spill.get(index + i) as u64)
                .collect()
        } else {
            vec![slot]
        };
        let count = get_bits(&words, 0, self.bits_per_label) as u32;
        target.extend((1..=count).map(|i| get_bits(&words, i * self.bits_per_label, self.bits_per_label) as u32));
    }
}

impl MemoryUsage for NodeLabelsCache {
    fn memory_usage(&self) -> u64 {
        self.nodes.memory_usage() + self.spill.memory_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_and_spilled_labels() {
        let cache = NodeLabelsCache::new(4, 300);
        cache.put(0, &[1, 2, 3]).unwrap();
        cache.put(2, &(0..20).collect::<Vec<_>>()).unwrap();

        let mut labels = Vec::new();
        cache.get(0, &mut labels);
        assert_eq!(labels, vec![1, 2, 3]);
        cache.get(1, &mut labels);
        assert!(labels.is_empty());
        cache.get(2, &mut labels);
        assert_eq!(labels, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_bits_cross_word_boundaries() {
        let mut words = vec![0u64; 2];
        put_bits(&mut words, 60, 9, 0b1_0110_1011);
        assert_eq!(get_bits(&words, 60, 9), 0b1_0110_1011);
    }

    #[test]
    fn test_rejects_labels_above_high_id() {
        let cache = NodeLabelsCache::new(1, 3);
        assert!(cache.put(0, &[4]).is_err());
        assert!(cache.put(1, &[0]).is_err());

        cache.put(0, &[0, 1, 2, 3]).unwrap();
        let mut labels = Vec::new();
        cache.get(0, &mut labels);
        assert_eq!(labels, vec![0, 1, 2, 3]);
    }
}
