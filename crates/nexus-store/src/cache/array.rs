//! Chunked arrays of atomics indexed by id
//!
//! Slots are never freed during an import; clearing overwrites them with the
//! default value. Fixed arrays are sized once, dynamic arrays grow chunk by
//! chunk on write.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

/// Slots per chunk unless configured otherwise
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 20;

/// Bytes used by a value store
pub trait MemoryUsage {
    /// Bytes currently allocated
    fn memory_usage(&self) -> u64;
}

macro_rules! fixed_array {
    ($(#[$doc:meta])* $name:ident, $atomic:ty, $value:ty) => {
        $(#[$doc])*
        pub struct $name {
            chunks: Vec<Box<[$atomic]>>,
            chunk_size: usize,
            length: u64,
            default: $value,
        }

        impl $name {
            /// `length` slots set to `default`
            pub fn new(length: u64, default: $value) -> Self {
                Self::with_chunk_size(length, default, DEFAULT_CHUNK_SIZE)
            }

            /// Same as [`Self::new`] with an explicit chunk size
            pub fn with_chunk_size(length: u64, default: $value, chunk_size: usize) -> Self {
                let chunk_size = chunk_size.max(1);
                let mut chunks: Vec<Box<[$atomic]>> = Vec::new();
                let mut remaining = length;
                while remaining > 0 {
                    let size = remaining.min(chunk_size as u64) as usize;
                    chunks.push((0..size).map(|_| <$atomic>::new(default)).collect());
                    remaining -= size as u64;
                }
                Self {
                    chunks,
                    chunk_size,
                    length,
                    default,
                }
            }

            /// Number of slots
            pub fn length(&self) -> u64 {
                self.length
            }

            #[inline]
            fn slot(&self, index: u64) -> &$atomic {
                let chunk = (index / self.chunk_size as u64) as usize;
                let offset = (index % self.chunk_size as u64) as usize;
                &self.chunks[chunk][offset]
            }

            /// Value at `index`; panics when out of bounds like slice indexing
            #[inline]
            pub fn get(&self, index: u64) -> $value {
                self.slot(index).load(Ordering::Relaxed)
            }

            /// Store `value` at `index`
            #[inline]
            pub fn set(&self, index: u64, value: $value) {
                self.slot(index).store(value, Ordering::Relaxed);
            }

            /// Store `value` at `index`, returning the previous value
            #[inline]
            pub fn swap(&self, index: u64, value: $value) -> $value {
                self.slot(index).swap(value, Ordering::Relaxed)
            }

            /// Add `delta` at `index`, returning the new value
            #[inline]
            pub fn add(&self, index: u64, delta: $value) -> $value {
                self.slot(index).fetch_add(delta, Ordering::Relaxed).wrapping_add(delta)
            }

            /// Overwrite every slot with the default value
            pub fn clear(&self) {
                for chunk in &self.chunks {
                    for slot in chunk.iter() {
                        slot.store(self.default, Ordering::Relaxed);
                    }
                }
            }
        }

        impl MemoryUsage for $name {
            fn memory_usage(&self) -> u64 {
                self.length * std::mem::size_of::<$atomic>() as u64
            }
        }
    };
}

fixed_array!(
    /// Fixed number of atomic `i64` slots
    LongArray,
    AtomicI64,
    i64
);

fixed_array!(
    /// Fixed number of atomic `u32` slots
    IntArray,
    AtomicU32,
    u32
);

/// Atomic `i64` slots that grow on demand
///
/// Reads past the allocated end return the default value.
pub struct DynamicLongArray {
    chunks: RwLock<Vec<Arc<[AtomicI64]>>>,
    chunk_size: usize,
    default: i64,
}

impl DynamicLongArray {
    /// Empty array with the given default and chunk size
    pub fn new(default: i64, chunk_size: usize) -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            chunk_size: chunk_size.max(1),
            default,
        }
    }

    fn chunk(&self, index: u64) -> Option<Arc<[AtomicI64]>> {
        let chunk = (index / self.chunk_size as u64) as usize;
        self.chunks.read().get(chunk).cloned()
    }

    fn chunk_or_grow(&self, index: u64) -> Arc<[AtomicI64]> {
        if let Some(chunk) = self.chunk(index) {
            return chunk;
        }
        let wanted = (index / self.chunk_size as u64) as usize;
        let mut chunks = self.chunks.write();
        while chunks.len() <= wanted {
            let chunk: Arc<[AtomicI64]> = (0..self.chunk_size).map(|_| AtomicI64::new(self.default)).collect();
            chunks.push(chunk);
        }
        Arc::clone(&chunks[wanted])
    }

    /// Value at `index`
    pub fn get(&self, index: u64) -> i64 {
        let offset = (index % self.chunk_size as u64) as usize;
        self.chunk(index)
            .map_or(self.default, |chunk| chunk[offset].load(Ordering::Relaxed))
    }

    /// Store `value` at `index`, growing as needed
    pub fn set(&self, index: u64, value: i64) {
        let offset = (index % self.chunk_size as u64) as usize;
        self.chunk_or_grow(index)[offset].store(value, Ordering::Relaxed);
    }
}

impl MemoryUsage for DynamicLongArray {
    fn memory_usage(&self) -> u64 {
        (self.chunks.read().len() * self.chunk_size * std::mem::size_of::<AtomicI64>()) as u64
    }
}
