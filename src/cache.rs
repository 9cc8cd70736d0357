//! The buffer cache (§4.1): a bounded, write-back, set-associative cache
//! mediating all access to the underlying [`BlockDevice`].
//!
//! Every sector read or written by the inode layer above passes through
//! here. The locking discipline follows a fixed acquisition order (§5): the
//! admission mutex (global, identity-level) is always acquired before any
//! slot's access mutex (per-slot, byte-level), and a slot's timestamp mutex
//! is only ever held on its own, briefly, to keep LRU bookkeeping from
//! stalling behind an in-progress sector I/O.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use array_macro::array;

use crate::clock::Clock;
use crate::device::{BlockDevice, SectorId, SECTOR_BYTES};

/// Number of resident sectors. Sector 0 (the free-map bitmap) and 1 (root
/// directory inode) compete for slots like any other sector; there is no
/// reserved cache capacity for them.
pub const CACHE_CAPACITY: usize = 64;

struct SlotBody {
    dirty: bool,
    data: [u8; SECTOR_BYTES],
}

/// One resident cache entry. `occupied`/`sector` are lock-free atomics so
/// that admission's victim-selection scan never has to take a slot's
/// (heavier) access mutex just to ask "are you free, and who are you".
struct Slot {
    occupied: AtomicBool,
    sector: AtomicU32,
    /// Mirrors `body.dirty` for the cheap pre-check in `flush_all`
    /// (design note: "dirty-bit double-check at write-back").
    dirty_hint: AtomicBool,
    /// The timestamp mutex (§3.2): guards `last_access` alone.
    last_access: Mutex<u64>,
    /// The access mutex (§3.2): guards `dirty` and `data` together.
    body: Mutex<SlotBody>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            occupied: AtomicBool::new(false),
            sector: AtomicU32::new(0),
            dirty_hint: AtomicBool::new(false),
            last_access: Mutex::new(0),
            body: Mutex::new(SlotBody {
                dirty: false,
                data: [0u8; SECTOR_BYTES],
            }),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

pub struct BufferCache {
    slots: [Slot; CACHE_CAPACITY],
    /// The modification mutex (§3.3): serializes slot-identity changes.
    admit_lock: Mutex<()>,
    device: Arc<dyn BlockDevice>,
    clock: Arc<dyn Clock>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferCache {
    /// `init()` (§4.1): builds a cache of all-unoccupied, zeroed slots over
    /// `device`.
    pub fn new(device: Arc<dyn BlockDevice>, clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: array![Slot::new(); CACHE_CAPACITY],
            admit_lock: Mutex::new(()),
            device,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Copies `size` bytes from the cached sector at intra-sector `offset`.
    pub fn read_at(&self, sector: SectorId, dst: &mut [u8], offset: usize) {
        let size = dst.len();
        assert!(offset + size <= SECTOR_BYTES);
        let (_index, body) = self.locate_or_admit(sector);
        dst.copy_from_slice(&body.data[offset..offset + size]);
    }

    /// Copies `size` bytes into the cached sector at intra-sector `offset`
    /// and marks the slot dirty.
    pub fn write_at(&self, sector: SectorId, src: &[u8], offset: usize) {
        let size = src.len();
        assert!(offset + size <= SECTOR_BYTES);
        let (index, mut body) = self.locate_or_admit(sector);
        body.data[offset..offset + size].copy_from_slice(src);
        body.dirty = true;
        self.slots[index].dirty_hint.store(true, Ordering::Release);
    }

    /// Writes back every occupied, dirty slot. May run concurrently with
    /// other cache activity; each slot is handled independently.
    pub fn flush_all(&self) {
        let mut written_back = 0u32;
        for slot in &self.slots {
            if !slot.occupied.load(Ordering::Acquire) {
                continue;
            }
            if !slot.dirty_hint.load(Ordering::Acquire) {
                continue;
            }
            let mut body = slot.body.lock().unwrap();
            // Re-check under the access mutex: the hint may be stale.
            if !body.dirty {
                continue;
            }
            let sector = slot.sector.load(Ordering::Acquire);
            self.device.write(sector, &body.data);
            body.dirty = false;
            slot.dirty_hint.store(false, Ordering::Release);
            written_back += 1;
        }
        log::debug!("flush_all: wrote back {} dirty slot(s)", written_back);
    }

    /// `shutdown()` (§4.1): force write-back of all dirty entries.
    pub fn shutdown(&self) {
        self.flush_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// The locate-or-admit algorithm (§4.1). Returns the slot index and a
    /// held access-mutex guard over its body.
    fn locate_or_admit(&self, target: SectorId) -> (usize, MutexGuard<'_, SlotBody>) {
        loop {
            // 1. Scan for a hit without the global admission mutex.
            if let Some(found) = self.scan_for_hit(target) {
                return found;
            }

            // 2. Admit under the modification mutex.
            let admit_guard = self.admit_lock.lock().unwrap();

            // Rescan: someone may have admitted `target` while we were
            // racing to acquire `admit_lock`.
            if let Some(found) = self.scan_for_hit(target) {
                drop(admit_guard);
                return found;
            }

            // 3. Select a victim: an unoccupied slot first, else the
            // occupied slot with the smallest `last_access`.
            let victim = self.select_victim();

            // 4. Commit the new identity under the access mutex, still
            // holding the modification mutex.
            let mut body = self.slots[victim].body.lock().unwrap();
            let prior_occupied = self.slots[victim].occupied.load(Ordering::Acquire);
            let prior_sector = self.slots[victim].sector.load(Ordering::Acquire);
            let prior_dirty = body.dirty;

            self.slots[victim].sector.store(target, Ordering::Release);
            self.slots[victim].occupied.store(true, Ordering::Release);
            *self.slots[victim].last_access.lock().unwrap() = self.clock.tick();
            self.misses.fetch_add(1, Ordering::Relaxed);

            // Slot identity is committed; release the global mutex before
            // doing device I/O so other admissions on other slots proceed.
            drop(admit_guard);

            log::trace!(
                "cache admit: sector {} into slot {} (evicted {:?})",
                target,
                victim,
                if prior_occupied {
                    Some(prior_sector)
                } else {
                    None
                }
            );

            // 5. Write back the evicted occupant if dirty, then load target.
            if prior_occupied && prior_dirty {
                self.device.write(prior_sector, &body.data);
            }
            self.device.read(target, &mut body.data);
            body.dirty = false;
            self.slots[victim].dirty_hint.store(false, Ordering::Release);

            return (victim, body);
        }
    }

    fn scan_for_hit(&self, target: SectorId) -> Option<(usize, MutexGuard<'_, SlotBody>)> {
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.occupied.load(Ordering::Acquire) {
                continue;
            }
            if slot.sector.load(Ordering::Acquire) != target {
                continue;
            }
            let body = slot.body.lock().unwrap();
            // Double-check: the slot may have been reassigned between the
            // atomic peek above and acquiring the access mutex.
            if !slot.occupied.load(Ordering::Acquire) || slot.sector.load(Ordering::Acquire) != target {
                continue;
            }
            *slot.last_access.lock().unwrap() = self.clock.tick();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some((index, body));
        }
        None
    }

    /// Prefers any unoccupied slot; otherwise the occupied slot with the
    /// smallest `last_access`, tie-broken by the first one seen. Caller
    /// must hold `admit_lock`.
    fn select_victim(&self) -> usize {
        let mut best: Option<(usize, u64)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            if !slot.occupied.load(Ordering::Acquire) {
                return index;
            }
            let ts = *slot.last_access.lock().unwrap();
            if best.map_or(true, |(_, best_ts)| ts < best_ts) {
                best = Some((index, ts));
            }
        }
        best.expect("CACHE_CAPACITY must be nonzero").0
    }
}
