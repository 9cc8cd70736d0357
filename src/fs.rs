//! The top-level façade (§6.4, §4.3.7): wires a [`BlockDevice`] + [`FreeMap`]
//! + [`Clock`] together into a formatted filesystem, and exposes the
//! operations a syscall dispatcher would — `create`, `open`, `close`,
//! `read`, `write`, `seek`, `tell`, `filesize`, `remove`, `inumber`,
//! `mkdir`, `chdir`, `readdir`, `isdir`, plus the `hit_rate`/`miss_rate`/
//! `reset_cache`/`write_count` diagnostics — as inherent methods, so this
//! crate is directly drivable from tests without a real dispatcher in front
//! of it.

use std::sync::Arc;

use crate::cache::BufferCache;
use crate::clock::Clock;
use crate::device::{BlockDevice, SectorId};
use crate::dir::{
    self, close_dir, dir_add, dir_add_parent, dir_add_self, dir_remove, lookup_sector, open_dir,
    resolve, Dir, FsContext,
};
use crate::error::{FsError, FsResult};
use crate::freemap::{BitmapFreeMap, FreeMap};
use crate::inode::{inode_create, Inode};

pub use crate::dir::NAME_MAX;

/// Reserved sectors (§6.3): the free-map bitmap, then the root directory's
/// inode.
pub const FREE_MAP_SECTOR: SectorId = 0;
pub const ROOT_DIR_SECTOR: SectorId = 1;

/// An open file: a shared inode plus a byte cursor private to this handle
/// (mirroring the on-disk-inode-plus-position pair a UNIX-family kernel
/// hands back from `open`).
pub struct FileHandle {
    inode: Arc<Inode>,
    position: i64,
}

pub struct FileSystem {
    ctx: FsContext,
    device: Arc<dyn BlockDevice>,
    // The façade's persistent root handle. Not wrapped in `Option` for
    // `Drop`-based closing: the root is a mount-lifetime handle, and this
    // façade treats process/test teardown as an acceptable place for it to
    // simply stop existing, rather than threading a close call through
    // every exit path.
    root: Dir,
}

impl FileSystem {
    /// Formats a fresh filesystem onto `device`: reserves the bitmap and
    /// root directory sectors, then creates the root directory inode with
    /// its own `.` and `..` entries (both pointing at itself).
    pub fn format(device: Arc<dyn BlockDevice>, clock: Arc<dyn Clock>) -> FsResult<Self> {
        let total = device.sector_count();
        let bitmap = BitmapFreeMap::new(total);
        bitmap.reserve(FREE_MAP_SECTOR, 1);
        bitmap.reserve(ROOT_DIR_SECTOR, 1);
        let freemap: Arc<dyn FreeMap> = Arc::new(bitmap);
        let cache = Arc::new(BufferCache::new(device.clone(), clock));
        let table = Arc::new(crate::inode::InodeTable::new());
        let ctx = FsContext { cache, freemap, table };

        inode_create(&ctx.cache, &*ctx.freemap, ROOT_DIR_SECTOR, 0, true)?;
        let root = open_dir(&ctx, ROOT_DIR_SECTOR);
        dir_add_self(&ctx, &root, ROOT_DIR_SECTOR);
        dir_add_parent(&ctx, &root, ROOT_DIR_SECTOR);

        log::debug!("formatted filesystem over {} sectors", total);
        Ok(Self { ctx, device, root })
    }

    /// Returns a fresh, independently-closable handle onto the root
    /// directory, suitable as an initial working directory.
    pub fn root(&self) -> Dir {
        open_dir(&self.ctx, self.root.sector())
    }

    fn resolve_inode(&self, cwd: &Dir, path: &str) -> FsResult<Arc<Inode>> {
        let resolved = resolve(&self.ctx, &self.root, cwd, path)?;
        if resolved.final_name == "." {
            return Ok(self.ctx.table.open(resolved.parent().sector()));
        }
        let sector = lookup_sector(&self.ctx, resolved.parent(), &resolved.final_name)
            .ok_or(FsError::NotFound)?;
        Ok(self.ctx.table.open(sector))
    }

    /// `create` (§6.4): makes a new, empty (zero-length) file at `path`.
    /// Growth happens only via `write`.
    pub fn create(&self, cwd: &Dir, path: &str) -> FsResult<()> {
        let sector = self.ctx.freemap.allocate(1).ok_or(FsError::ResourceExhausted)?;
        if let Err(e) = inode_create(&self.ctx.cache, &*self.ctx.freemap, sector, 0, false) {
            self.ctx.freemap.release(sector, 1);
            return Err(e);
        }
        if let Err(e) = dir_add(&self.ctx, &self.root, cwd, path, sector) {
            self.ctx.freemap.release(sector, 1);
            return Err(e);
        }
        Ok(())
    }

    /// `open` (§6.4). `path == "/"` opens the root directory itself.
    pub fn open(&self, cwd: &Dir, path: &str) -> FsResult<FileHandle> {
        let inode = self.resolve_inode(cwd, path)?;
        Ok(FileHandle { inode, position: 0 })
    }

    /// `close` (§6.4).
    pub fn close(&self, handle: FileHandle) {
        self.ctx.table.close(&handle.inode, &self.ctx.cache, &*self.ctx.freemap);
    }

    /// `read` (§6.4): reads at the handle's cursor, advancing it by the
    /// number of bytes actually read.
    pub fn read(&self, handle: &mut FileHandle, buf: &mut [u8]) -> usize {
        let n = handle.inode.read_at(&self.ctx.cache, buf, handle.position);
        handle.position += n as i64;
        n
    }

    /// `write` (§6.4): writes at the handle's cursor, extending the file if
    /// needed, advancing the cursor by the number of bytes actually
    /// written.
    pub fn write(&self, handle: &mut FileHandle, buf: &[u8]) -> usize {
        let n = handle.inode.write_at(&self.ctx.cache, &*self.ctx.freemap, buf, handle.position);
        handle.position += n as i64;
        n
    }

    /// `seek` (§6.4): repositions the handle's cursor. Touches only the
    /// handle, never the inode.
    pub fn seek(&self, handle: &mut FileHandle, position: i64) {
        handle.position = position;
    }

    /// `tell` (§6.4).
    pub fn tell(&self, handle: &FileHandle) -> i64 {
        handle.position
    }

    /// `filesize` (§6.4).
    pub fn filesize(&self, handle: &FileHandle) -> i64 {
        handle.inode.length(&self.ctx.cache)
    }

    /// `inumber` (§6.4).
    pub fn inumber(&self, handle: &FileHandle) -> SectorId {
        handle.inode.inumber()
    }

    /// `isdir` (§6.4).
    pub fn isdir(&self, dir: &Dir) -> bool {
        dir.inode().is_dir(&self.ctx.cache)
    }

    /// `remove` (§6.4).
    pub fn remove(&self, cwd: &Dir, path: &str) -> FsResult<()> {
        dir_remove(&self.ctx, &self.root, cwd, path)
    }

    /// `readdir` (§6.4).
    pub fn readdir(&self, dir: &mut Dir, out_name: &mut String) -> bool {
        dir::dir_readdir(&self.ctx, dir, out_name)
    }

    /// `chdir` (§6.4): resolves `path` against `cwd`, closes `cwd`, and
    /// returns a handle onto the new working directory. Fails (leaving
    /// `cwd` open and returned as the error's payload is not attempted
    /// here, matching this façade's bool/count/sentinel error surface) if
    /// `path` does not resolve to a directory.
    pub fn chdir(&self, cwd: Dir, path: &str) -> FsResult<Dir> {
        let resolved = resolve(&self.ctx, &self.root, &cwd, path)?;
        let target_sector = if resolved.final_name == "." {
            resolved.parent().sector()
        } else {
            lookup_sector(&self.ctx, resolved.parent(), &resolved.final_name).ok_or(FsError::NotFound)?
        };
        drop(resolved);

        let target = open_dir(&self.ctx, target_sector);
        if !target.inode().is_dir(&self.ctx.cache) {
            close_dir(&self.ctx, target);
            return Err(FsError::NotADirectory);
        }
        close_dir(&self.ctx, cwd);
        Ok(target)
    }

    /// `mkdir` (§4.3.7): creates a directory-flagged inode, populates its
    /// `.`/`..` entries, then links it into the parent under the final
    /// path component.
    pub fn mkdir(&self, cwd: &Dir, path: &str) -> FsResult<()> {
        let (name, parent_sector, exists) = {
            let resolved = resolve(&self.ctx, &self.root, cwd, path)?;
            let name = resolved.final_name.clone();
            let parent_sector = resolved.parent().sector();
            let exists = lookup_sector(&self.ctx, resolved.parent(), &name).is_some();
            (name, parent_sector, exists)
        };
        if name.is_empty() || name.len() > NAME_MAX || exists {
            return Err(FsError::NameInvalid);
        }

        let sector = self.ctx.freemap.allocate(1).ok_or(FsError::ResourceExhausted)?;
        if let Err(e) = inode_create(&self.ctx.cache, &*self.ctx.freemap, sector, 0, true) {
            self.ctx.freemap.release(sector, 1);
            return Err(e);
        }

        let new_dir = open_dir(&self.ctx, sector);
        dir_add_self(&self.ctx, &new_dir, sector);
        dir_add_parent(&self.ctx, &new_dir, parent_sector);
        close_dir(&self.ctx, new_dir);

        if let Err(e) = dir_add(&self.ctx, &self.root, cwd, path, sector) {
            self.ctx.freemap.release(sector, 1);
            return Err(e);
        }
        Ok(())
    }

    /// `hit_rate` diagnostic (§6.4).
    pub fn hit_rate(&self) -> f64 {
        let stats = self.ctx.cache.stats();
        let total = stats.hits + stats.misses;
        if total == 0 {
            0.0
        } else {
            stats.hits as f64 / total as f64
        }
    }

    /// `miss_rate` diagnostic (§6.4).
    pub fn miss_rate(&self) -> f64 {
        1.0 - self.hit_rate()
    }

    /// `reset_cache` diagnostic (§6.4): zeros the hit/miss counters without
    /// evicting anything.
    pub fn reset_cache(&self) {
        self.ctx.cache.reset_stats();
    }

    /// `write_count` diagnostic (§6.4): total sectors written to the
    /// underlying device since creation.
    pub fn write_count(&self) -> u64 {
        self.device.write_count()
    }

    /// Forces write-back of every dirty cache slot without tearing
    /// anything down (the standalone `flush_all` operation of §4.1).
    pub fn flush(&self) {
        self.ctx.cache.flush_all();
    }

    /// `shutdown` (§4.1): force write-back of all dirty entries.
    pub fn shutdown(&self) {
        self.ctx.cache.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TickClock;
    use crate::device::MemBlockDevice;

    fn new_fs(sectors: u32) -> FileSystem {
        let device = Arc::new(MemBlockDevice::new(sectors));
        let clock = Arc::new(TickClock::new());
        FileSystem::format(device, clock).unwrap()
    }

    #[test]
    fn format_creates_navigable_root() {
        let fs = new_fs(64);
        let root = fs.root();
        assert!(fs.isdir(&root));
    }

    #[test]
    fn create_write_read_round_trip() {
        let fs = new_fs(64);
        let root = fs.root();
        fs.create(&root, "greeting").unwrap();

        let mut handle = fs.open(&root, "greeting").unwrap();
        let written = fs.write(&mut handle, b"hello, world");
        assert_eq!(written, 12);
        assert_eq!(fs.filesize(&handle), 12);

        fs.seek(&mut handle, 0);
        assert_eq!(fs.tell(&handle), 0);
        let mut out = [0u8; 12];
        let read = fs.read(&mut handle, &mut out);
        assert_eq!(read, 12);
        assert_eq!(&out, b"hello, world");
        fs.close(handle);
    }

    #[test]
    fn seek_tell_round_trip() {
        let fs = new_fs(64);
        let root = fs.root();
        fs.create(&root, "f").unwrap();
        let mut handle = fs.open(&root, "f").unwrap();

        let payload = vec![5u8; 1234];
        fs.write(&mut handle, &payload);
        assert_eq!(fs.tell(&handle), 1234);

        fs.seek(&mut handle, 0);
        assert_eq!(fs.tell(&handle), 0);
        fs.seek(&mut handle, 197);
        assert_eq!(fs.tell(&handle), 197);
        fs.close(handle);
    }

    #[test]
    fn mkdir_chdir_readdir_remove_lifecycle() {
        let fs = new_fs(128);
        let root = fs.root();

        fs.mkdir(&root, "/a").unwrap();
        fs.mkdir(&root, "/a/b").unwrap();

        let mut cwd = fs.chdir(fs.root(), "/a").unwrap();
        let mut name = String::new();
        assert!(fs.readdir(&mut cwd, &mut name));
        assert_eq!(name, "b");
        assert!(!fs.readdir(&mut cwd, &mut name));
        close_dir(&fs.ctx, cwd);

        assert!(fs.remove(&root, "/a").is_err());
        fs.remove(&root, "/a/b").unwrap();
        fs.remove(&root, "/a").unwrap();
    }

    #[test]
    fn create_rejects_duplicate_name() {
        let fs = new_fs(64);
        let root = fs.root();
        fs.create(&root, "f").unwrap();
        assert_eq!(fs.create(&root, "f").err(), Some(FsError::NameInvalid));
    }

    #[test]
    fn open_of_absent_path_fails() {
        let fs = new_fs(64);
        let root = fs.root();
        assert_eq!(fs.open(&root, "nope").err(), Some(FsError::NotFound));
    }
}
