//! Per-node relationship state used while linking
//!
//! Every node has a relationship slot and a count slot:
//! - for a sparse node the relationship slot holds the current head of its
//!   chain and the count slot its total degree;
//! - for a dense node the relationship slot indexes the node's first entry in
//!   the group arena, which keeps one entry per relationship type with the
//!   current head and count per direction.
//!
//! The top four bits of a count slot are flags. Two of them are change
//! markers whose meaning flips with the scan direction, so forward and
//! backward passes never need a clearing pass in between.

use super::array::{DynamicLongArray, IntArray, LongArray, MemoryUsage, DEFAULT_CHUNK_SIZE};
use crate::store::record::MAX_RELATIONSHIP_TYPE;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

const EMPTY: i64 = -1;

const DENSE_CHANGED: u32 = 0x8000_0000;
const SPARSE_CHANGED: u32 = 0x4000_0000;
const BIG_COUNT: u32 = 0x2000_0000;
const EXPLICITLY_DENSE: u32 = 0x1000_0000;
const COUNT_FLAGS: u32 = DENSE_CHANGED | SPARSE_CHANGED | BIG_COUNT | EXPLICITLY_DENSE;
const COUNT_MASK: u32 = !COUNT_FLAGS;

/// Largest count kept inline in a count slot
pub const MAX_SMALL_COUNT: u64 = (1 << 28) - 2;

/// Largest degree one import supports
pub const MAX_COUNT: u64 = (1 << 35) - 1;

/// Largest relationship id the cache can hold
pub const MAX_RELATIONSHIP_ID: u64 = (1 << 48) - 2;

/// Bytes per node in the node arrays
pub const NODE_ENTRY_SIZE: u64 = 8 + 4;

/// Bytes per entry in the group arena
pub const GROUP_ENTRY_SIZE: u64 = std::mem::size_of::<GroupEntry>() as u64;

/// Chain a relationship takes part in, seen from one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Node is the start node
    Outgoing = 0,
    /// Node is the end node
    Incoming = 1,
    /// Node is both ends
    Loop = 2,
}

impl Direction {
    /// Direction of `node` in a relationship between `first` and `second`
    pub fn of(first: u64, second: u64, node: u64) -> Self {
        if first == second {
            Self::Loop
        } else if node == first {
            Self::Outgoing
        } else {
            Self::Incoming
        }
    }
}

/// Which nodes a visit covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Sparse nodes only
    Sparse,
    /// Dense nodes only
    Dense,
    /// Every node
    All,
}

impl NodeType {
    /// Whether a node with the given density is covered
    pub fn matches(self, dense: bool) -> bool {
        match self {
            Self::Sparse => !dense,
            Self::Dense => dense,
            Self::All => true,
        }
    }
}

/// One group handed to a [`NodeRelationshipCache::get_first_rel`] visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupVisit {
    /// Owning node
    pub node: u64,
    /// Relationship type
    pub rel_type: u32,
    /// Head of the outgoing chain
    pub first_out: Option<u64>,
    /// Head of the incoming chain
    pub first_in: Option<u64>,
    /// Head of the loop chain
    pub first_loop: Option<u64>,
}

/// Arena entry: one relationship type of one dense node
struct GroupEntry {
    rel_type: AtomicU32,
    next: AtomicI64,
    ids: [AtomicI64; 3],
    counts: [AtomicU32; 3],
}

impl GroupEntry {
    fn blank() -> Self {
        Self {
            rel_type: AtomicU32::new(0),
            next: AtomicI64::new(EMPTY),
            ids: [AtomicI64::new(EMPTY), AtomicI64::new(EMPTY), AtomicI64::new(EMPTY)],
            counts: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }

    fn reset(&self, rel_type: u32) {
        self.rel_type.store(rel_type, Ordering::Relaxed);
        self.next.store(EMPTY, Ordering::Relaxed);
        for id in &self.ids {
            id.store(EMPTY, Ordering::Relaxed);
        }
        for count in &self.counts {
            count.store(0, Ordering::Relaxed);
        }
    }

    fn clear_ids(&self) {
        for id in &self.ids {
            id.store(EMPTY, Ordering::Relaxed);
        }
    }
}

/// Growable arena of group entries, reset between linking rounds
struct GroupArena {
    chunks: RwLock<Vec<Arc<[GroupEntry]>>>,
    chunk_size: usize,
    next_free: AtomicU64,
}

impl GroupArena {
    fn new(chunk_size: usize) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            chunk_size: chunk_size.max(1),
            next_free: AtomicU64::new(0),
        }
    }

    fn chunk(&self, index: u64) -> Arc<[GroupEntry]> {
        let wanted = (index / self.chunk_size as u64) as usize;
        if let Some(chunk) = self.chunks.read().get(wanted) {
            return Arc::clone(chunk);
        }
        let mut chunks = self.chunks.write();
        while chunks.len() <= wanted {
            let chunk: Arc<[GroupEntry]> = (0..self.chunk_size).map(|_| GroupEntry::blank()).collect();
            chunks.push(chunk);
        }
        Arc::clone(&chunks[wanted])
    }

    fn with<R>(&self, index: u64, f: impl FnOnce(&GroupEntry) -> R) -> R {
        let chunk = self.chunk(index);
        f(&chunk[(index % self.chunk_size as u64) as usize])
    }

    fn allocate(&self, rel_type: u32) -> u64 {
        let index = self.next_free.fetch_add(1, Ordering::Relaxed);
        self.with(index, |entry| entry.reset(rel_type));
        index
    }

    /// Entry for `rel_type` in the list starting at `first`, appended if missing
    fn find_or_allocate(&self, first: u64, rel_type: u32) -> u64 {
        let mut index = first;
        loop {
            let (found, next) = self.with(index, |e| {
                (e.rel_type.load(Ordering::Relaxed) == rel_type, e.next.load(Ordering::Relaxed))
            });
            if found {
                return index;
            }
            if next == EMPTY {
                let created = self.allocate(rel_type);
                self.with(index, |e| e.next.store(created as i64, Ordering::Relaxed));
                return created;
            }
            index = next as u64;
        }
    }

    fn find(&self, first: u64, rel_type: u32) -> Option<u64> {
        let mut index = first as i64;
        while index != EMPTY {
            let (found, next) = self.with(index as u64, |e| {
                (e.rel_type.load(Ordering::Relaxed) == rel_type, e.next.load(Ordering::Relaxed))
            });
            if found {
                return Some(index as u64);
            }
            index = next;
        }
        None
    }

    fn clear(&self) {
        self.next_free.store(0, Ordering::Relaxed);
    }

    fn clear_relationship_ids(&self) {
        let high = self.next_free.load(Ordering::Relaxed);
        for index in 0..high {
            self.with(index, GroupEntry::clear_ids);
        }
    }

    fn memory_usage(&self) -> u64 {
        (self.chunks.read().len() * self.chunk_size) as u64 * GROUP_ENTRY_SIZE
    }
}

fn as_option(id: i64) -> Option<u64> {
    (id != EMPTY).then_some(id as u64)
}

/// Node to relationship cache for the linking passes
///
/// Callers partition work by node id so that no two threads update the same
/// node at once; the arena and the big-count overflow are safe to share.
pub struct NodeRelationshipCache {
    dense_threshold: u64,
    chunk_size: usize,
    node_count: u64,
    relationships: LongArray,
    counts: IntArray,
    big_counts: DynamicLongArray,
    big_count_cursor: AtomicU64,
    groups: GroupArena,
    forward: AtomicBool,
    counting_completed: AtomicBool,
    dense_nodes: AtomicU64,
}

impl NodeRelationshipCache {
    /// Cache classifying nodes with at least `dense_threshold` relationships as dense
    pub fn new(dense_threshold: u64) -> Self {
        Self::with_chunk_size(dense_threshold, DEFAULT_CHUNK_SIZE)
    }

    /// Same as [`Self::new`] with an explicit chunk size
    pub fn with_chunk_size(dense_threshold: u64, chunk_size: usize) -> Self {
        Self {
            dense_threshold,
            chunk_size,
            node_count: 0,
            relationships: LongArray::with_chunk_size(0, EMPTY, chunk_size),
            counts: IntArray::with_chunk_size(0, 0, chunk_size),
            big_counts: DynamicLongArray::new(0, 1_000),
            big_count_cursor: AtomicU64::new(0),
            groups: GroupArena::new(chunk_size),
            forward: AtomicBool::new(true),
            counting_completed: AtomicBool::new(false),
            dense_nodes: AtomicU64::new(0),
        }
    }

    /// Size the node arrays; resets all per-node state
    pub fn set_node_count(&mut self, node_count: u64) -> Result<()> {
        if node_count > MAX_RELATIONSHIP_ID {
            return Err(Error::invalid_argument(format!(
                "Invalid number of nodes {}, max is {}",
                node_count, MAX_RELATIONSHIP_ID
            )));
        }
        self.node_count = node_count;
        self.relationships = LongArray::with_chunk_size(node_count, EMPTY, self.chunk_size);
        self.counts = IntArray::with_chunk_size(node_count, 0, self.chunk_size);
        self.counting_completed.store(false, Ordering::SeqCst);
        debug!("Node relationship cache sized for {} nodes", node_count);
        Ok(())
    }

    /// Number of nodes the cache was sized for
    pub fn node_count(&self) -> u64 {
        self.node_count
    }

    fn check_node(&self, node: u64) -> Result<()> {
        if node >= self.node_count {
            return Err(Error::invalid_argument(format!(
                "Node {} outside of cache sized for {} nodes",
                node, self.node_count
            )));
        }
        Ok(())
    }

    fn read_count(&self, raw: u32) -> u64 {
        let value = raw & COUNT_MASK;
        if raw & BIG_COUNT != 0 {
            self.big_counts.get(value as u64) as u64
        } else {
            value as u64
        }
    }

    fn write_count(&self, slot: &dyn Fn(Option<u32>) -> u32, count: u64, context: u64) -> Result<()> {
        if count > MAX_COUNT {
            return Err(Error::capacity(format!(
                "Count of node {} would reach {}, which is too big for one import",
                context, count
            )));
        }
        let raw = slot(None);
        if count > MAX_SMALL_COUNT {
            let index = if raw & BIG_COUNT != 0 {
                (raw & COUNT_MASK) as u64
            } else {
                let index = self.big_count_cursor.fetch_add(1, Ordering::Relaxed);
                slot(Some((raw & COUNT_FLAGS) | BIG_COUNT | index as u32));
                index
            };
            self.big_counts.set(index, count as i64);
        } else {
            slot(Some((raw & (COUNT_FLAGS & !BIG_COUNT)) | count as u32));
        }
        Ok(())
    }

    fn node_count_slot(&self, node: u64) -> impl Fn(Option<u32>) -> u32 + '_ {
        move |value| match value {
            Some(v) => {
                self.counts.set(node, v);
                v
            }
            None => self.counts.get(node),
        }
    }

    /// Add one to the degree of `node`, returning the new degree
    pub fn increment_count(&self, node: u64) -> Result<u64> {
        self.check_node(node)?;
        let count = self.read_count(self.counts.get(node)) + 1;
        self.write_count(&self.node_count_slot(node), count, node)?;
        Ok(count)
    }

    /// Overwrite the degree of `node`
    pub fn set_count(&self, node: u64, count: u64) -> Result<()> {
        self.check_node(node)?;
        self.write_count(&self.node_count_slot(node), count, node)
    }

    /// Degree of `node`; for a dense node the count of one type and direction
    pub fn get_count(&self, node: u64, rel_type: u32, direction: Direction) -> Result<u64> {
        self.check_node(node)?;
        if !self.is_dense(node) {
            return Ok(self.read_count(self.counts.get(node)));
        }
        let first = self.relationships.get(node);
        if first == EMPTY {
            return Ok(0);
        }
        Ok(self
            .groups
            .find(first as u64, rel_type)
            .map_or(0, |index| {
                self.groups
                    .with(index, |e| self.read_count(e.counts[direction as usize].load(Ordering::Relaxed)))
            }))
    }

    /// Force `node` to be dense regardless of its degree
    pub fn mark_as_explicitly_dense(&self, node: u64) -> Result<()> {
        self.check_node(node)?;
        let raw = self.counts.get(node);
        self.counts.set(node, raw | EXPLICITLY_DENSE);
        Ok(())
    }

    fn is_dense_unchecked(&self, node: u64) -> bool {
        let raw = self.counts.get(node);
        raw & EXPLICITLY_DENSE != 0 || self.read_count(raw) >= self.dense_threshold
    }

    /// Whether `node` is dense; always false until counting has completed
    pub fn is_dense(&self, node: u64) -> bool {
        self.counting_completed.load(Ordering::Acquire) && node < self.node_count && self.is_dense_unchecked(node)
    }

    /// End of the degree counting phase; classifies nodes
    pub fn counting_completed(&self) {
        let dense = (0..self.node_count).filter(|&n| self.is_dense_unchecked(n)).count() as u64;
        self.dense_nodes.store(dense, Ordering::SeqCst);
        self.counting_completed.store(true, Ordering::Release);
        debug!("Counting completed: {} of {} nodes are dense", dense, self.node_count);
    }

    /// Dense nodes found by [`Self::counting_completed`]
    pub fn number_of_dense_nodes(&self) -> u64 {
        self.dense_nodes.load(Ordering::SeqCst)
    }

    /// Flip the change marker for the current scan direction; true if this
    /// is the first touch of `node` in the scan
    fn mark_as_changed(&self, node: u64, mask: u32) -> bool {
        let raw = self.counts.get(node);
        let forward = self.forward.load(Ordering::Relaxed);
        let flipped = (raw & mask != 0) != forward;
        if flipped {
            self.counts.set(node, raw ^ mask);
        }
        flipped
    }

    /// Record `relationship` as the newest relationship of `node` and return
    /// the one it replaces
    ///
    /// For a sparse node the first call in a scan returns `None` whatever was
    /// cached by the previous scan. For a dense node the per-type entry is
    /// created on demand and, with `increment_count`, its count bumped.
    pub fn get_and_put_relationship(
        &self,
        node: u64,
        rel_type: u32,
        direction: Direction,
        relationship: u64,
        increment_count: bool,
    ) -> Result<Option<u64>> {
        self.check_node(node)?;
        if relationship > MAX_RELATIONSHIP_ID {
            return Err(Error::invalid_argument(format!(
                "Illegal relationship id {}, max is {}",
                relationship, MAX_RELATIONSHIP_ID
            )));
        }
        if rel_type > MAX_RELATIONSHIP_TYPE {
            return Err(Error::invalid_argument(format!("Relationship type {} out of range", rel_type)));
        }

        let dense = self.is_dense(node);
        let changed = self.mark_as_changed(node, if dense { DENSE_CHANGED } else { SPARSE_CHANGED });
        if dense {
            let first = match self.relationships.get(node) {
                EMPTY => {
                    let index = self.groups.allocate(rel_type);
                    self.relationships.set(node, index as i64);
                    index
                }
                index => index as u64,
            };
            let index = self.groups.find_or_allocate(first, rel_type);
            let previous = self.groups.with(index, |e| {
                e.ids[direction as usize].swap(relationship as i64, Ordering::Relaxed)
            });
            if increment_count {
                let raw = self.groups.with(index, |e| e.counts[direction as usize].load(Ordering::Relaxed));
                let count = self.read_count(raw) + 1;
                let slot = |value: Option<u32>| {
                    self.groups.with(index, |e| {
                        let counter = &e.counts[direction as usize];
                        match value {
                            Some(v) => {
                                counter.store(v, Ordering::Relaxed);
                                v
                            }
                            None => counter.load(Ordering::Relaxed),
                        }
                    })
                };
                self.write_count(&slot, count, node)?;
            }
            return Ok(as_option(previous));
        }

        let previous = self.relationships.swap(node, relationship as i64);
        Ok(if changed { None } else { as_option(previous) })
    }

    /// Head of a sparse node's chain, or the visitor's answer for the first
    /// non-empty group of a dense node
    pub fn get_first_rel<F>(&self, node: u64, mut visitor: F) -> Option<u64>
    where
        F: FnMut(GroupVisit) -> Option<u64>,
    {
        if node >= self.node_count {
            return None;
        }
        let id = self.relationships.get(node);
        if id == EMPTY || !self.is_dense(node) {
            return as_option(id);
        }

        let mut first = None;
        let mut index = id;
        while index != EMPTY {
            let (visit, next) = self.groups.with(index as u64, |e| {
                (
                    GroupVisit {
                        node,
                        rel_type: e.rel_type.load(Ordering::Relaxed),
                        first_out: as_option(e.ids[Direction::Outgoing as usize].load(Ordering::Relaxed)),
                        first_in: as_option(e.ids[Direction::Incoming as usize].load(Ordering::Relaxed)),
                        first_loop: as_option(e.ids[Direction::Loop as usize].load(Ordering::Relaxed)),
                    },
                    e.next.load(Ordering::Relaxed),
                )
            });
            if visit.first_out.is_some() || visit.first_in.is_some() || visit.first_loop.is_some() {
                let result = visitor(visit);
                if first.is_none() {
                    first = result;
                }
            }
            index = next;
        }
        first
    }

    /// Switch scan direction between linking passes
    ///
    /// Going forward starts a new round: dense nodes lose their arena entries.
    /// Going backward keeps the entries and counts but forgets the chain heads.
    pub fn set_forward_scan(&self, forward: bool, dense_nodes: bool) {
        if self.forward.load(Ordering::SeqCst) == forward {
            return;
        }
        if dense_nodes {
            if forward {
                for node in 0..self.node_count {
                    if self.is_dense(node) {
                        self.relationships.set(node, EMPTY);
                    }
                }
                self.groups.clear();
            } else {
                self.groups.clear_relationship_ids();
            }
        }
        self.forward.store(forward, Ordering::SeqCst);
    }

    /// Call `visitor` for every node of the given kind with a cached relationship
    pub fn visit_nodes_with_relationships(&self, node_type: NodeType, mut visitor: impl FnMut(u64)) {
        for node in 0..self.node_count {
            if self.relationships.get(node) != EMPTY && node_type.matches(self.is_dense(node)) {
                visitor(node);
            }
        }
    }

    /// Worst-case arena bytes for linking `relationships` of one type
    pub fn calculate_max_memory_usage(&self, relationships: u64) -> u64 {
        Self::max_memory_usage(self.number_of_dense_nodes(), relationships)
    }

    /// Worst-case arena bytes: every dense node touched by the type gets one entry
    pub fn max_memory_usage(dense_nodes: u64, relationships: u64) -> u64 {
        dense_nodes.min(relationships.saturating_mul(2)) * GROUP_ENTRY_SIZE
    }

    /// Node array bytes for `node_count` nodes
    pub fn memory_estimation(node_count: u64) -> u64 {
        node_count * NODE_ENTRY_SIZE
    }
}

impl MemoryUsage for NodeRelationshipCache {
    fn memory_usage(&self) -> u64 {
        self.relationships.memory_usage()
            + self.counts.memory_usage()
            + self.big_counts.memory_usage()
            + self.groups.memory_usage()
    }
}
