//! The block device collaborator contract (§6.1).
//!
//! The real device driver is out of scope for this crate; [`BlockDevice`] is
//! the interface the buffer cache consumes, and [`MemBlockDevice`] is a
//! synchronous in-memory stand-in used by the test suite and by anyone
//! embedding this crate without a physical disk.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Bytes per sector. Sector 0 and 1 are reserved (free-map bitmap and root
/// directory inode respectively); see [`crate::fs`].
pub const SECTOR_BYTES: usize = 512;

pub type SectorId = u32;

/// A flat array of fixed-size sectors with synchronous, sector-granular I/O.
///
/// Implementations must guarantee that `read`/`write` fully populate/consume
/// exactly `SECTOR_BYTES` bytes and that sector numbers `0..sector_count()`
/// are valid.
pub trait BlockDevice: Send + Sync {
    fn sector_count(&self) -> u32;

    fn read(&self, sector: SectorId, out: &mut [u8; SECTOR_BYTES]);

    fn write(&self, sector: SectorId, data: &[u8; SECTOR_BYTES]);

    /// Total number of sectors written to the device since creation. Used by
    /// tests to detect write coalescing in the buffer cache above.
    fn write_count(&self) -> u64;
}

/// An in-memory block device. Not a stub: it is a real, fully functional
/// `BlockDevice` suitable for embedding this crate in a process that has no
/// physical disk, and it is what the test suite formats filesystems onto.
pub struct MemBlockDevice {
    sectors: Mutex<Vec<[u8; SECTOR_BYTES]>>,
    write_count: AtomicU64,
}

impl MemBlockDevice {
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_BYTES]; sector_count as usize]),
            write_count: AtomicU64::new(0),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn sector_count(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }

    fn read(&self, sector: SectorId, out: &mut [u8; SECTOR_BYTES]) {
        let sectors = self.sectors.lock().unwrap();
        out.copy_from_slice(&sectors[sector as usize]);
    }

    fn write(&self, sector: SectorId, data: &[u8; SECTOR_BYTES]) {
        let mut sectors = self.sectors.lock().unwrap();
        sectors[sector as usize].copy_from_slice(data);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_after_write_is_visible() {
        let dev = MemBlockDevice::new(4);
        let mut buf = [7u8; SECTOR_BYTES];
        dev.write(2, &buf);
        let mut out = [0u8; SECTOR_BYTES];
        dev.read(2, &mut out);
        assert_eq!(out, buf);
        buf = [0u8; SECTOR_BYTES];
        dev.read(0, &mut out);
        assert_eq!(out, buf);
    }

    #[test]
    fn write_count_increments_per_write() {
        let dev = MemBlockDevice::new(4);
        assert_eq!(dev.write_count(), 0);
        let buf = [0u8; SECTOR_BYTES];
        dev.write(0, &buf);
        dev.write(1, &buf);
        assert_eq!(dev.write_count(), 2);
    }
}
