//! Block stores - fixed-size record slots addressed by id
//!
//! A store file starts with a 64-byte header followed by `record_size`-byte
//! slots. Slots that were never written read back as zeroes, which every
//! record format decodes as "not in use".

use crate::{Error, Result};
use bytemuck::{Pod, Zeroable};
use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

const STORE_MAGIC: [u8; 8] = *b"NXSTORE1";
const STORE_VERSION: u32 = 1;
const HEADER_SIZE: usize = 64;

/// Initial size of a new store file: 1MB
const INITIAL_SIZE: usize = 1024 * 1024;

/// Fixed-size record storage
pub trait BlockStore: Send + Sync {
    /// Size of one slot
    fn record_size(&self) -> usize;

    /// Read the slot for `id` into `buf`; unwritten slots read as zeroes
    fn read(&self, id: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` into the slot for `id`, growing the store if needed
    fn write(&self, id: u64, data: &[u8]) -> Result<()>;

    /// One past the highest slot ever written or declared
    fn high_id(&self) -> u64;

    /// Declare the high id, used when id generators hand out ids before writes
    fn set_high_id(&self, high_id: u64);

    /// Persist pending writes
    fn flush(&self) -> Result<()>;
}

/// Cursor over a block store with a reusable slot buffer
pub struct BlockCursor<'a> {
    store: &'a dyn BlockStore,
    buf: Vec<u8>,
}

impl<'a> BlockCursor<'a> {
    /// Open a cursor on `store`
    pub fn new(store: &'a dyn BlockStore) -> Self {
        Self {
            buf: vec![0u8; store.record_size()],
            store,
        }
    }

    /// Read the slot for `id`; the returned bytes stay valid until the next call
    pub fn read(&mut self, id: u64) -> Result<&[u8]> {
        self.store.read(id, &mut self.buf)?;
        Ok(&self.buf)
    }

    /// Write a full slot
    pub fn write(&mut self, id: u64, data: &[u8]) -> Result<()> {
        self.store.write(id, data)
    }
}

/// On-disk header of a mapped store file
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct StoreHeader {
    magic: [u8; 8],
    version: u32,
    record_size: u32,
    high_id: u64,
    _reserved: [u64; 5],
}

/// Memory-mapped file wrapper
struct MappedFile {
    file: File,
    mmap: MmapMut,
    current_size: usize,
}

impl MappedFile {
    fn open(path: &Path, initial_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let current_size = match file.metadata()?.len() as usize {
            0 => {
                file.set_len(initial_size as u64)?;
                initial_size
            }
            size => size,
        };

        let mmap = unsafe { MmapOptions::new().len(current_size).map_mut(&file)? };

        Ok(Self {
            file,
            mmap,
            current_size,
        })
    }

    fn resize(&mut self, new_size: usize) -> Result<()> {
        self.mmap.flush()?;
        self.file.set_len(new_size as u64)?;
        self.mmap = unsafe { MmapOptions::new().len(new_size).map_mut(&self.file)? };
        self.current_size = new_size;
        Ok(())
    }
}

/// File-backed block store using memmap2, growing by doubling
pub struct MappedBlockStore {
    path: PathBuf,
    record_size: usize,
    file: RwLock<MappedFile>,
    high_id: AtomicU64,
}

impl MappedBlockStore {
    /// Create or open a store file with the given slot size
    ///
    /// Opening an existing file checks the magic and that the stored slot
    /// size matches `record_size`.
    pub fn open<P: AsRef<Path>>(path: P, record_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = MappedFile::open(&path, INITIAL_SIZE.max(HEADER_SIZE + record_size))?;
        if file.current_size < HEADER_SIZE {
            return Err(Error::storage(format!(
                "{} is truncated: {} bytes, header needs {}",
                path.display(),
                file.current_size,
                HEADER_SIZE
            )));
        }

        let header: StoreHeader = bytemuck::pod_read_unaligned(&file.mmap[..HEADER_SIZE]);
        let high_id = if header.magic == [0u8; 8] {
            let fresh = StoreHeader {
                magic: STORE_MAGIC,
                version: STORE_VERSION,
                record_size: record_size as u32,
                high_id: 0,
                _reserved: [0; 5],
            };
            file.mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&fresh));
            0
        } else {
            if header.magic != STORE_MAGIC || header.version != STORE_VERSION {
                return Err(Error::storage(format!(
                    "{} is not a store file of version {}",
                    path.display(),
                    STORE_VERSION
                )));
            }
            if header.record_size as usize != record_size {
                return Err(Error::storage(format!(
                    "{} has record size {}, expected {}",
                    path.display(),
                    header.record_size,
                    record_size
                )));
            }
            header.high_id
        };

        Ok(Self {
            path,
            record_size,
            file: RwLock::new(file),
            high_id: AtomicU64::new(high_id),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the backing file in bytes
    pub fn file_size(&self) -> usize {
        self.file.read().current_size
    }

    fn offset(&self, id: u64) -> Result<usize> {
        usize::try_from(id)
            .ok()
            .and_then(|id| id.checked_mul(self.record_size))
            .and_then(|offset| offset.checked_add(HEADER_SIZE))
            .ok_or_else(|| Error::storage(format!("Record id {} is out of addressable range", id)))
    }
}

impl BlockStore for MappedBlockStore {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn read(&self, id: u64, buf: &mut [u8]) -> Result<()> {
        let offset = self.offset(id)?;
        let file = self.file.read();
        if offset + self.record_size > file.current_size {
            buf.fill(0);
            return Ok(());
        }
        buf.copy_from_slice(&file.mmap[offset..offset + self.record_size]);
        Ok(())
    }

    fn write(&self, id: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.record_size {
            return Err(Error::storage(format!(
                "Write of {} bytes into {}-byte slot",
                data.len(),
                self.record_size
            )));
        }
        let offset = self.offset(id)?;
        let required_size = offset + self.record_size;

        let mut file = self.file.write();
        if required_size > file.current_size {
            let new_size = (file.current_size * 2).max(required_size);
            file.resize(new_size)?;
        }
        file.mmap[offset..required_size].copy_from_slice(data);
        drop(file);

        self.high_id.fetch_max(id + 1, Ordering::AcqRel);
        Ok(())
    }

    fn high_id(&self) -> u64 {
        self.high_id.load(Ordering::Acquire)
    }

    fn set_high_id(&self, high_id: u64) {
        self.high_id.fetch_max(high_id, Ordering::AcqRel);
    }

    fn flush(&self) -> Result<()> {
        let mut file = self.file.write();
        let mut header: StoreHeader = bytemuck::pod_read_unaligned(&file.mmap[..HEADER_SIZE]);
        header.high_id = self.high_id();
        file.mmap[..HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        file.mmap.flush()?;
        Ok(())
    }
}

/// Heap-backed block store for tests and scratch stores
pub struct MemoryBlockStore {
    record_size: usize,
    data: RwLock<Vec<u8>>,
    high_id: AtomicU64,
}

impl MemoryBlockStore {
    /// Empty store with the given slot size
    pub fn new(record_size: usize) -> Self {
        Self {
            record_size,
            data: RwLock::new(Vec::new()),
            high_id: AtomicU64::new(0),
        }
    }
}

impl BlockStore for MemoryBlockStore {
    fn record_size(&self) -> usize {
        self.record_size
    }

    fn read(&self, id: u64, buf: &mut [u8]) -> Result<()> {
        let offset = id as usize * self.record_size;
        let data = self.data.read();
        match data.get(offset..offset + self.record_size) {
            Some(slot) => buf.copy_from_slice(slot),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write(&self, id: u64, data: &[u8]) -> Result<()> {
        if data.len() != self.record_size {
            return Err(Error::storage(format!(
                "Write of {} bytes into {}-byte slot",
                data.len(),
                self.record_size
            )));
        }
        let offset = id as usize * self.record_size;
        let mut store = self.data.write();
        if store.len() < offset + self.record_size {
            store.resize(offset + self.record_size, 0);
        }
        store[offset..offset + self.record_size].copy_from_slice(data);
        drop(store);
        self.high_id.fetch_max(id + 1, Ordering::AcqRel);
        Ok(())
    }

    fn high_id(&self) -> u64 {
        self.high_id.load(Ordering::Acquire)
    }

    fn set_high_id(&self, high_id: u64) {
        self.high_id.fetch_max(high_id, Ordering::AcqRel);
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
