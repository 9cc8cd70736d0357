//! The inode layer (§4.2): multi-level indexed files (direct, indirect,
//! doubly indirect) with sparse growth on write.
//!
//! The on-disk inode (§3.4, §6.3) is reproduced bit-for-bit, including the
//! three bytes of alignment padding a C compiler would insert between
//! `is_dir` and `length`. `DiskInode` is too wide an array (`[u32; 123]`)
//! for a zerocopy derive to cover with confidence, so it serializes itself
//! by hand through explicit `OFF_*` byte offsets instead, pinned to exactly
//! [`SECTOR_BYTES`] by a `const_assert_eq!`.
//!
//! In-memory inodes (§3.5) live in an [`InodeTable`] keyed by home sector —
//! a plain map rather than an intrusive list: correctness only depends on
//! "one in-memory object per sector", which a map gives for free.

use std::collections::HashMap;
use std::convert::TryInto;
use std::sync::{Arc, Mutex};

use static_assertions::const_assert_eq;

use crate::cache::BufferCache;
use crate::device::{SectorId, SECTOR_BYTES};
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;

/// Direct sector pointers per inode; chosen so that `DiskInode` lands on
/// exactly one sector.
pub const NUM_DIRECT: usize = 123;

/// Sector pointers per indirect block.
pub const PTRS_PER_INDIRECT: usize = SECTOR_BYTES / 4;

pub const MAX_FILE_SECTORS: usize =
    NUM_DIRECT + PTRS_PER_INDIRECT + PTRS_PER_INDIRECT * PTRS_PER_INDIRECT;

/// Maximum addressable file length: `(123 + 128 + 128*128) * 512`.
pub const MAX_FILE_BYTES: i64 = (MAX_FILE_SECTORS * SECTOR_BYTES) as i64;

const INODE_MAGIC: u32 = 0x494e4f44;

const OFF_DIRECT: usize = 0;
const OFF_INDIRECT: usize = NUM_DIRECT * 4;
const OFF_DOUBLY_INDIRECT: usize = OFF_INDIRECT + 4;
const OFF_IS_DIR: usize = OFF_DOUBLY_INDIRECT + 4;
// Three bytes of alignment padding land here, between `is_dir` and `length`;
// `DiskInode` below reserves them explicitly rather than relying on
// `repr(C)` to insert them implicitly.
const OFF_LENGTH: usize = OFF_IS_DIR + 1 + 3;
const OFF_MAGIC: usize = OFF_LENGTH + 4;
const_assert_eq!(OFF_MAGIC + 4, SECTOR_BYTES);

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
}

fn write_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn bytes_to_sectors(len: i64) -> usize {
    (len.max(0) as usize + SECTOR_BYTES - 1) / SECTOR_BYTES
}

fn zero_sector(cache: &BufferCache, sector: SectorId) {
    let zeros = [0u8; SECTOR_BYTES];
    cache.write_at(sector, &zeros, 0);
}

/// The on-disk inode (§3.4, §6.3): exactly one sector.
#[derive(Clone)]
pub struct DiskInode {
    pub direct: [SectorId; NUM_DIRECT],
    pub indirect: SectorId,
    pub doubly_indirect: SectorId,
    pub is_dir: bool,
    pub length: i32,
    pub magic: u32,
}

impl DiskInode {
    fn zeroed(length: i32, is_dir: bool) -> Self {
        Self {
            direct: [0; NUM_DIRECT],
            indirect: 0,
            doubly_indirect: 0,
            is_dir,
            length,
            magic: INODE_MAGIC,
        }
    }

    fn decode(buf: &[u8; SECTOR_BYTES]) -> Self {
        let mut direct = [0u32; NUM_DIRECT];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = read_u32(buf, OFF_DIRECT + i * 4);
        }
        Self {
            direct,
            indirect: read_u32(buf, OFF_INDIRECT),
            doubly_indirect: read_u32(buf, OFF_DOUBLY_INDIRECT),
            is_dir: buf[OFF_IS_DIR] != 0,
            length: read_i32(buf, OFF_LENGTH),
            magic: read_u32(buf, OFF_MAGIC),
        }
    }

    fn encode(&self, buf: &mut [u8; SECTOR_BYTES]) {
        for (i, ptr) in self.direct.iter().enumerate() {
            write_u32(buf, OFF_DIRECT + i * 4, *ptr);
        }
        write_u32(buf, OFF_INDIRECT, self.indirect);
        write_u32(buf, OFF_DOUBLY_INDIRECT, self.doubly_indirect);
        buf[OFF_IS_DIR] = self.is_dir as u8;
        write_i32(buf, OFF_LENGTH, self.length);
        write_u32(buf, OFF_MAGIC, self.magic);
    }

    fn read(cache: &BufferCache, sector: SectorId) -> Self {
        let mut buf = [0u8; SECTOR_BYTES];
        cache.read_at(sector, &mut buf, 0);
        Self::decode(&buf)
    }

    fn write(&self, cache: &BufferCache, sector: SectorId) {
        let mut buf = [0u8; SECTOR_BYTES];
        self.encode(&mut buf);
        cache.write_at(sector, &buf, 0);
    }
}

/// `byte_to_sector` (§4.2.1): translates a byte offset to a data sector,
/// or `None` if `pos` is beyond `length` or falls in an unallocated gap.
fn byte_to_sector(cache: &BufferCache, disk: &DiskInode, pos: i64) -> Option<SectorId> {
    if pos < 0 || pos >= disk.length as i64 {
        return None;
    }
    let index = pos as usize / SECTOR_BYTES;

    if index < NUM_DIRECT {
        let sector = disk.direct[index];
        return (sector != 0).then(|| sector);
    }
    let index = index - NUM_DIRECT;

    if index < PTRS_PER_INDIRECT {
        if disk.indirect == 0 {
            return None;
        }
        let mut block = [0u8; SECTOR_BYTES];
        cache.read_at(disk.indirect, &mut block, 0);
        let sector = read_u32(&block, index * 4);
        return (sector != 0).then(|| sector);
    }
    let index = index - PTRS_PER_INDIRECT;

    if index < PTRS_PER_INDIRECT * PTRS_PER_INDIRECT {
        if disk.doubly_indirect == 0 {
            return None;
        }
        let mut outer = [0u8; SECTOR_BYTES];
        cache.read_at(disk.doubly_indirect, &mut outer, 0);
        let inner_sector = read_u32(&outer, (index / PTRS_PER_INDIRECT) * 4);
        if inner_sector == 0 {
            return None;
        }
        let mut inner = [0u8; SECTOR_BYTES];
        cache.read_at(inner_sector, &mut inner, 0);
        let sector = read_u32(&inner, (index % PTRS_PER_INDIRECT) * 4);
        return (sector != 0).then(|| sector);
    }

    None
}

/// Allocates sectors (direct first, then indirect, then doubly indirect)
/// until `disk` can address `target_length` bytes (§4.2.3). Already
/// allocated slots are left untouched; newly allocated data sectors are
/// zero-filled.
fn allocate_for(
    cache: &BufferCache,
    freemap: &dyn FreeMap,
    disk: &mut DiskInode,
    target_length: i64,
) -> FsResult<()> {
    let mut remaining = bytes_to_sectors(target_length);

    let direct_needed = remaining.min(NUM_DIRECT);
    for slot in disk.direct.iter_mut().take(direct_needed) {
        if *slot == 0 {
            let sector = freemap.allocate(1).ok_or(FsError::ResourceExhausted)?;
            zero_sector(cache, sector);
            *slot = sector;
        }
    }
    remaining -= direct_needed;
    if remaining == 0 {
        return Ok(());
    }

    let indirect_needed = remaining.min(PTRS_PER_INDIRECT);
    alloc_indirect(cache, freemap, &mut disk.indirect, indirect_needed, 1)?;
    remaining -= indirect_needed;
    if remaining == 0 {
        return Ok(());
    }

    let doubly_needed = remaining.min(PTRS_PER_INDIRECT * PTRS_PER_INDIRECT);
    alloc_indirect(cache, freemap, &mut disk.doubly_indirect, doubly_needed, 2)?;
    remaining -= doubly_needed;
    if remaining == 0 {
        Ok(())
    } else {
        Err(FsError::ResourceExhausted)
    }
}

/// Recursive allocation helper (§4.2.3). `depth` is 2 for the doubly
/// indirect level, 1 for a (possibly nested) indirect level, 0 for a leaf
/// data sector.
fn alloc_indirect(
    cache: &BufferCache,
    freemap: &dyn FreeMap,
    ptr: &mut SectorId,
    remaining: usize,
    depth: u8,
) -> FsResult<()> {
    if depth == 0 {
        if *ptr == 0 {
            let sector = freemap.allocate(1).ok_or(FsError::ResourceExhausted)?;
            zero_sector(cache, sector);
            *ptr = sector;
        }
        return Ok(());
    }

    if *ptr == 0 {
        let sector = freemap.allocate(1).ok_or(FsError::ResourceExhausted)?;
        zero_sector(cache, sector);
        *ptr = sector;
    }

    let mut block = [0u8; SECTOR_BYTES];
    cache.read_at(*ptr, &mut block, 0);

    let unit = if depth == 1 { 1 } else { PTRS_PER_INDIRECT };
    let entries = (remaining + unit - 1) / unit;
    let mut remaining_left = remaining;
    for i in 0..entries {
        let chunk = remaining_left.min(unit);
        let mut child = read_u32(&block, i * 4);
        alloc_indirect(cache, freemap, &mut child, chunk, depth - 1)?;
        write_u32(&mut block, i * 4, child);
        remaining_left -= chunk;
    }

    cache.write_at(*ptr, &block, 0);
    Ok(())
}

/// Releases every sector reachable from `disk` (§4.2.4). Called only after
/// the in-memory inode's refcount has reached zero with `removed` set.
pub(crate) fn deallocate(cache: &BufferCache, freemap: &dyn FreeMap, disk: &DiskInode) {
    let mut remaining = bytes_to_sectors(disk.length as i64);

    let direct_n = remaining.min(NUM_DIRECT);
    for sector in disk.direct.iter().take(direct_n) {
        if *sector != 0 {
            freemap.release(*sector, 1);
        }
    }
    remaining -= direct_n;

    let indirect_n = remaining.min(PTRS_PER_INDIRECT);
    if indirect_n > 0 {
        dealloc_indirect(cache, freemap, disk.indirect, indirect_n, 1);
        remaining -= indirect_n;
    }

    let doubly_n = remaining.min(PTRS_PER_INDIRECT * PTRS_PER_INDIRECT);
    if doubly_n > 0 {
        dealloc_indirect(cache, freemap, disk.doubly_indirect, doubly_n, 2);
        remaining -= doubly_n;
    }
    debug_assert_eq!(remaining, 0);
}

fn dealloc_indirect(cache: &BufferCache, freemap: &dyn FreeMap, ptr: SectorId, remaining: usize, depth: u8) {
    if ptr == 0 {
        // Tolerates a partially-allocated index left behind by a failed
        // extension (design note: "partial-allocation unwind on extension
        // failure").
        return;
    }
    if depth > 0 {
        let mut block = [0u8; SECTOR_BYTES];
        cache.read_at(ptr, &mut block, 0);
        let unit = if depth == 1 { 1 } else { PTRS_PER_INDIRECT };
        let entries = (remaining + unit - 1) / unit;
        let mut remaining_left = remaining;
        for i in 0..entries {
            let chunk = remaining_left.min(unit);
            let child = read_u32(&block, i * 4);
            dealloc_indirect(cache, freemap, child, chunk, depth - 1);
            remaining_left -= chunk;
        }
    }
    freemap.release(ptr, 1);
}

/// `inode_create` (§4.2.2): formats a fresh disk inode at `sector`.
pub fn inode_create(
    cache: &BufferCache,
    freemap: &dyn FreeMap,
    sector: SectorId,
    length: i32,
    is_dir: bool,
) -> FsResult<()> {
    let mut disk = DiskInode::zeroed(length, is_dir);
    allocate_for(cache, freemap, &mut disk, length as i64)?;
    disk.write(cache, sector);
    Ok(())
}

struct InodeState {
    open_cnt: i32,
    deny_write_cnt: i32,
    removed: bool,
}

/// The in-memory inode (§3.5): one per open disk inode, refcounted by
/// `open_cnt`, not by `Arc`'s own strong count (the `Arc` only provides the
/// `Send + Sync` sharing Rust requires; closing is driven by the explicit
/// counter).
pub struct Inode {
    pub sector: SectorId,
    state: Mutex<InodeState>,
}

impl Inode {
    fn new(sector: SectorId) -> Arc<Self> {
        Arc::new(Self {
            sector,
            state: Mutex::new(InodeState {
                open_cnt: 1,
                deny_write_cnt: 0,
                removed: false,
            }),
        })
    }

    pub fn inumber(&self) -> SectorId {
        self.sector
    }

    pub fn open_cnt(&self) -> i32 {
        self.state.lock().unwrap().open_cnt
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    /// `remove_mark` (§4.2.8): unconditionally marks the inode for removal
    /// once the last opener closes it.
    pub fn remove_mark(&self) {
        self.state.lock().unwrap().removed = true;
    }

    /// `remove_if_unique` (§4.2.8): marks the inode for removal only if no
    /// other opener holds it, atomically. Used by the directory layer to
    /// refuse removing a directory someone else has open.
    pub fn remove_if_unique(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.open_cnt == 1 {
            state.removed = true;
            true
        } else {
            false
        }
    }

    /// `deny_write` (§4.2.9).
    pub fn deny_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.deny_write_cnt += 1;
        assert!(state.deny_write_cnt <= state.open_cnt);
    }

    /// `allow_write` (§4.2.9).
    pub fn allow_write(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.deny_write_cnt > 0);
        state.deny_write_cnt -= 1;
    }

    /// `length` metadata accessor (§4.2.10).
    pub fn length(&self, cache: &BufferCache) -> i64 {
        let mut buf = [0u8; 4];
        cache.read_at(self.sector, &mut buf, OFF_LENGTH);
        i32::from_le_bytes(buf) as i64
    }

    /// `is_dir` metadata accessor (§4.2.10).
    pub fn is_dir(&self, cache: &BufferCache) -> bool {
        let mut buf = [0u8; 1];
        cache.read_at(self.sector, &mut buf, OFF_IS_DIR);
        buf[0] != 0
    }

    /// `set_dir` metadata accessor (§4.2.10).
    pub fn set_dir(&self, cache: &BufferCache, is_dir: bool) {
        cache.write_at(self.sector, &[is_dir as u8], OFF_IS_DIR);
    }

    /// `inode_read_at` (§4.2.5). The inode mutex is held only while
    /// translating `offset` to a sector; the data copy itself runs without
    /// it, so concurrent reads of distinct sectors overlap freely.
    pub fn read_at(&self, cache: &BufferCache, dst: &mut [u8], offset: i64) -> usize {
        let mut bytes_read = 0usize;
        let mut offset = offset;
        while bytes_read < dst.len() {
            let (sector, length) = {
                let _guard = self.state.lock().unwrap();
                let disk = DiskInode::read(cache, self.sector);
                (byte_to_sector(cache, &disk, offset), disk.length as i64)
            };
            let sector = match sector {
                Some(sector) => sector,
                None => break,
            };
            let sector_ofs = offset as usize % SECTOR_BYTES;
            let sector_left = SECTOR_BYTES - sector_ofs;
            let inode_left = (length - offset).max(0) as usize;
            let chunk = (dst.len() - bytes_read).min(sector_left).min(inode_left);
            if chunk == 0 {
                break;
            }
            cache.read_at(sector, &mut dst[bytes_read..bytes_read + chunk], sector_ofs);
            bytes_read += chunk;
            offset += chunk as i64;
        }
        bytes_read
    }

    /// `inode_write_at` (§4.2.6). The inode mutex is held for the whole
    /// call, including any extension and every chunk written through the
    /// cache, so concurrent extensions of the same inode serialize to a
    /// single consistent final length. The cache's own mutexes are always
    /// leaf locks (they never try to acquire an inode or open-inodes
    /// mutex), so nesting them inside this one cannot deadlock even though
    /// it runs against the numeric mutex ranking in §5.
    pub fn write_at(&self, cache: &BufferCache, freemap: &dyn FreeMap, src: &[u8], offset: i64) -> usize {
        if src.is_empty() {
            return 0;
        }
        let guard = self.state.lock().unwrap();
        if guard.deny_write_cnt > 0 {
            return 0;
        }

        let last_byte = offset + src.len() as i64 - 1;
        if last_byte >= MAX_FILE_BYTES {
            // Writing past the maximum file length: refuse and do not
            // extend (§8 boundary behavior).
            return 0;
        }

        let mut disk = DiskInode::read(cache, self.sector);
        if byte_to_sector(cache, &disk, last_byte).is_none() {
            let new_length = offset + src.len() as i64;
            if allocate_for(cache, freemap, &mut disk, new_length).is_err() {
                return 0;
            }
            disk.length = new_length as i32;
            disk.write(cache, self.sector);
        }

        let mut bytes_written = 0usize;
        let mut offset = offset;
        while bytes_written < src.len() {
            let sector =
                byte_to_sector(cache, &disk, offset).expect("extension above populated this index");
            let sector_ofs = offset as usize % SECTOR_BYTES;
            let sector_left = SECTOR_BYTES - sector_ofs;
            let inode_left = (disk.length as i64 - offset).max(0) as usize;
            let chunk = (src.len() - bytes_written).min(sector_left).min(inode_left);
            if chunk == 0 {
                break;
            }
            cache.write_at(sector, &src[bytes_written..bytes_written + chunk], sector_ofs);
            bytes_written += chunk;
            offset += chunk as i64;
        }
        drop(guard);
        bytes_written
    }
}

/// The process-wide open-inode table (§4.2.7), a direct `sector -> inode`
/// map protected by the open-inodes mutex, per the design note preferring
/// this over an intrusive list.
pub struct InodeTable {
    open: Mutex<HashMap<SectorId, Arc<Inode>>>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        Self {
            open: Mutex::new(HashMap::new()),
        }
    }

    /// `open` (§4.2.7): returns the existing in-memory inode for `sector`
    /// with its `open_cnt` incremented, or creates one.
    pub fn open(&self, sector: SectorId) -> Arc<Inode> {
        let mut open = self.open.lock().unwrap();
        if let Some(existing) = open.get(&sector) {
            existing.state.lock().unwrap().open_cnt += 1;
            return existing.clone();
        }
        let inode = Inode::new(sector);
        open.insert(sector, inode.clone());
        inode
    }

    /// `close` (§4.2.7): decrements `open_cnt`; on reaching zero, removes
    /// the inode from the table and, if marked `removed`, releases its
    /// sectors. All table/inode-mutex bookkeeping happens first and is
    /// released before touching the cache or free map, so this never holds
    /// a mutex from the upper ranks (open-inodes, per-inode) while
    /// acquiring one from the lower ranks (cache, free-map).
    pub fn close(&self, inode: &Arc<Inode>, cache: &BufferCache, freemap: &dyn FreeMap) {
        let should_deallocate = {
            let mut open = self.open.lock().unwrap();
            let mut state = inode.state.lock().unwrap();
            state.open_cnt -= 1;
            let at_zero = state.open_cnt == 0;
            let removed = state.removed;
            drop(state);
            if at_zero {
                open.remove(&inode.sector);
            }
            at_zero && removed
        };
        if should_deallocate {
            let disk = DiskInode::read(cache, inode.sector);
            deallocate(cache, freemap, &disk);
            freemap.release(inode.sector, 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickClock;
    use crate::device::MemBlockDevice;
    use crate::freemap::BitmapFreeMap;
    use std::sync::Arc as StdArc;

    struct Harness {
        cache: BufferCache,
        freemap: BitmapFreeMap,
        table: InodeTable,
    }

    impl Harness {
        fn new(sectors: u32) -> Self {
            let device = StdArc::new(MemBlockDevice::new(sectors));
            let clock = StdArc::new(TickClock::new());
            Self {
                cache: BufferCache::new(device, clock),
                freemap: BitmapFreeMap::new(sectors),
                table: InodeTable::new(),
            }
        }
    }

    #[test]
    fn write_extends_zero_length_file() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        let buf = vec![7u8; 1000];
        let written = inode.write_at(&h.cache, &h.freemap, &buf, 0);
        assert_eq!(written, 1000);
        assert_eq!(inode.length(&h.cache), 1000);

        let mut out = vec![0u8; 1000];
        let read = inode.read_at(&h.cache, &mut out, 0);
        assert_eq!(read, 1000);
        assert_eq!(out, buf);
    }

    #[test]
    fn sparse_extension_reads_back_zeroes() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        let buf = [1u8, 2, 3, 4];
        let written = inode.write_at(&h.cache, &h.freemap, &buf, 2048);
        assert_eq!(written, 4);
        assert_eq!(inode.length(&h.cache), 2052);

        let mut gap = vec![0xffu8; 2048];
        let read = inode.read_at(&h.cache, &mut gap, 0);
        assert_eq!(read, 2048);
        assert!(gap.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_spanning_direct_indirect_boundary_allocates_indirect_block() {
        let h = Harness::new(400);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        let offset = 122 * SECTOR_BYTES as i64;
        let buf = vec![9u8; SECTOR_BYTES + 10];
        let written = inode.write_at(&h.cache, &h.freemap, &buf, offset);
        assert_eq!(written, buf.len());

        let disk = DiskInode::read(&h.cache, 2);
        assert_ne!(disk.indirect, 0);

        let mut out = vec![0u8; buf.len()];
        inode.read_at(&h.cache, &mut out, offset);
        assert_eq!(out, buf);
    }

    #[test]
    fn write_spanning_indirect_doubly_indirect_boundary_allocates_doubly_indirect() {
        let h = Harness::new(600);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        let offset = 250 * SECTOR_BYTES as i64;
        let buf = vec![3u8; SECTOR_BYTES + 1];
        let written = inode.write_at(&h.cache, &h.freemap, &buf, offset);
        assert_eq!(written, buf.len());

        let disk = DiskInode::read(&h.cache, 2);
        assert_ne!(disk.doubly_indirect, 0);
    }

    #[test]
    fn write_one_byte_beyond_max_length_refuses_and_does_not_extend() {
        let h = Harness::new(4);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        let written = inode.write_at(&h.cache, &h.freemap, &[1u8], MAX_FILE_BYTES);
        assert_eq!(written, 0);
        assert_eq!(inode.length(&h.cache), 0);
    }

    #[test]
    fn deny_write_blocks_writes_until_allowed() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let inode = h.table.open(2);

        inode.deny_write();
        let written = inode.write_at(&h.cache, &h.freemap, &[1u8; 4], 0);
        assert_eq!(written, 0);

        inode.allow_write();
        let written = inode.write_at(&h.cache, &h.freemap, &[1u8; 4], 0);
        assert_eq!(written, 4);
    }

    #[test]
    fn open_twice_returns_same_inode_and_shares_inumber() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let a = h.table.open(2);
        let b = h.table.open(2);
        assert_eq!(a.inumber(), b.inumber());
        assert_eq!(a.open_cnt(), 2);
        assert!(StdArc::ptr_eq(&a, &b));
    }

    #[test]
    fn close_last_opener_of_removed_inode_releases_sectors() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 100, false).unwrap();
        let inode = h.table.open(2);
        assert!(inode.remove_if_unique());
        h.table.close(&inode, &h.cache, &h.freemap);

        // The data sector inode_create allocated for a 100-byte file
        // should now be free again.
        let reused = h.freemap.allocate(1);
        assert!(reused.is_some());
    }

    #[test]
    fn remove_if_unique_refuses_when_other_openers_exist() {
        let h = Harness::new(64);
        inode_create(&h.cache, &h.freemap, 2, 0, false).unwrap();
        let a = h.table.open(2);
        let _b = h.table.open(2);
        assert!(!a.remove_if_unique());
    }
}
