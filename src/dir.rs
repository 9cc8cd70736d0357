//! The directory layer (§4.3): hierarchical name resolution over
//! inode-backed directory files.
//!
//! Name resolution (§4.3.1) is modeled as a scoped acquisition per the
//! design note in §9: [`resolve`] returns an owned [`ResolvedParent`] guard
//! whose `Drop` closes the parent directory handle exactly once, on every
//! exit path. Intermediate directories opened while walking non-final path
//! components are wrapped in a `scopeguard::guard` so a failure partway
//! through a multi-component path still closes whatever was opened so far,
//! without per-call-site bookkeeping at every `return`.

use std::sync::Arc;

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::cache::BufferCache;
use crate::device::SectorId;
use crate::error::{FsError, FsResult};
use crate::freemap::FreeMap;
use crate::inode::{Inode, InodeTable};

/// Maximum directory entry name length, not counting the NUL terminator.
pub const NAME_MAX: usize = 14;

const ENTRY_SIZE: usize = std::mem::size_of::<DirEntry>();

/// The on-disk directory entry (§3.6, §6.3): 20 bytes, no padding beyond
/// natural alignment.
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct DirEntry {
    pub inode_sector: SectorId,
    pub name: [u8; NAME_MAX + 1],
    pub in_use: u8,
}

const_assert_eq!(std::mem::size_of::<DirEntry>(), 20);

fn set_name(buf: &mut [u8; NAME_MAX + 1], name: &str) {
    *buf = [0u8; NAME_MAX + 1];
    buf[..name.len()].copy_from_slice(name.as_bytes());
}

fn get_name(buf: &[u8; NAME_MAX + 1]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// The collaborator bundle every directory-layer operation needs: the
/// cache, free map, and open-inode table, cheaply cloneable so owned RAII
/// guards like [`ResolvedParent`] can carry what they need to close
/// themselves without extra parameters to `Drop::drop`.
#[derive(Clone)]
pub struct FsContext {
    pub cache: Arc<BufferCache>,
    pub freemap: Arc<dyn FreeMap>,
    pub table: Arc<InodeTable>,
}

/// An in-memory directory handle (§3.7): an open inode plus a byte cursor
/// private to this handle, used only by [`dir_readdir`].
pub struct Dir {
    inode: Arc<Inode>,
    position: i64,
}

impl Dir {
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn sector(&self) -> SectorId {
        self.inode.inumber()
    }
}

pub fn open_dir(ctx: &FsContext, sector: SectorId) -> Dir {
    Dir {
        inode: ctx.table.open(sector),
        position: 0,
    }
}

pub fn close_dir(ctx: &FsContext, dir: Dir) {
    ctx.table.close(&dir.inode, &ctx.cache, &*ctx.freemap);
}

fn read_entry(ctx: &FsContext, dir: &Dir, offset: i64) -> Option<DirEntry> {
    let mut buf = [0u8; ENTRY_SIZE];
    let read = dir.inode.read_at(&ctx.cache, &mut buf, offset);
    if read < ENTRY_SIZE {
        return None;
    }
    DirEntry::read_from(&buf[..])
}

fn write_entry(ctx: &FsContext, dir: &Dir, offset: i64, entry: &DirEntry) {
    let mut buf = [0u8; ENTRY_SIZE];
    entry.write_to(&mut buf[..]).expect("DirEntry is exactly ENTRY_SIZE bytes");
    dir.inode.write_at(&ctx.cache, &*ctx.freemap, &buf, offset);
}

/// Shallow lookup (§4.3.2): linear scan for the first `in_use` entry whose
/// name matches.
fn lookup(ctx: &FsContext, dir: &Dir, name: &str) -> Option<(DirEntry, i64)> {
    let length = dir.inode.length(&ctx.cache);
    let mut offset = 0i64;
    while offset + ENTRY_SIZE as i64 <= length {
        if let Some(entry) = read_entry(ctx, dir, offset) {
            if entry.in_use != 0 && get_name(&entry.name) == name {
                return Some((entry, offset));
            }
        }
        offset += ENTRY_SIZE as i64;
    }
    None
}

/// Public shallow-lookup wrapper for callers (the filesystem façade) that
/// need only the target inode sector, not its on-disk offset.
pub fn lookup_sector(ctx: &FsContext, dir: &Dir, name: &str) -> Option<SectorId> {
    lookup(ctx, dir, name).map(|(entry, _)| entry.inode_sector)
}

fn find_free_slot_or_eof(ctx: &FsContext, dir: &Dir) -> i64 {
    let length = dir.inode.length(&ctx.cache);
    let mut offset = 0i64;
    while offset + ENTRY_SIZE as i64 <= length {
        if let Some(entry) = read_entry(ctx, dir, offset) {
            if entry.in_use == 0 {
                return offset;
            }
        }
        offset += ENTRY_SIZE as i64;
    }
    length
}

/// The owned result of [`resolve`] (§4.3.1): the parent directory handle
/// plus the unresolved final path component. Its `Drop` closes the parent
/// handle exactly once, however the caller finishes with it.
pub struct ResolvedParent {
    ctx: FsContext,
    parent: Option<Dir>,
    pub final_name: String,
}

impl ResolvedParent {
    fn new(ctx: FsContext, parent: Dir, final_name: String) -> Self {
        Self {
            ctx,
            parent: Some(parent),
            final_name,
        }
    }

    pub fn parent(&self) -> &Dir {
        self.parent.as_ref().expect("parent handle taken before drop")
    }
}

impl Drop for ResolvedParent {
    fn drop(&mut self) {
        if let Some(dir) = self.parent.take() {
            close_dir(&self.ctx, dir);
        }
    }
}

/// Name resolution (§4.3.1). `root` anchors absolute paths (those starting
/// with `/`); `start` anchors relative ones.
pub fn resolve(ctx: &FsContext, root: &Dir, start: &Dir, path: &str) -> FsResult<ResolvedParent> {
    if path == "/" {
        return Ok(ResolvedParent::new(ctx.clone(), open_dir(ctx, root.sector()), ".".to_string()));
    }

    let (base_sector, remainder) = match path.strip_prefix('/') {
        Some(rest) => (root.sector(), rest),
        None => (start.sector(), path),
    };

    let components: Vec<&str> = remainder.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        return Err(FsError::NameInvalid);
    }

    let mut current = open_dir(ctx, base_sector);
    for component in &components[..components.len() - 1] {
        let guard = scopeguard::guard(current, |d| close_dir(ctx, d));
        let (entry, _) = match lookup(ctx, &guard, component) {
            Some(found) => found,
            None => return Err(FsError::NotFound),
        };
        let next = ctx.table.open(entry.inode_sector);
        if !next.is_dir(&ctx.cache) {
            ctx.table.close(&next, &ctx.cache, &*ctx.freemap);
            return Err(FsError::NotADirectory);
        }
        // The lookup we needed `guard` for is done; close the directory it
        // guards now rather than waiting for end of scope.
        drop(guard);
        current = Dir {
            inode: next,
            position: 0,
        };
    }

    Ok(ResolvedParent::new(
        ctx.clone(),
        current,
        components[components.len() - 1].to_string(),
    ))
}

/// `dir_add` (§4.3.3).
pub fn dir_add(ctx: &FsContext, root: &Dir, start: &Dir, path: &str, inode_sector: SectorId) -> FsResult<()> {
    let resolved = resolve(ctx, root, start, path)?;
    let name = resolved.final_name.as_str();
    if name.is_empty() || name.len() > NAME_MAX {
        return Err(FsError::NameInvalid);
    }
    if lookup(ctx, resolved.parent(), name).is_some() {
        return Err(FsError::NameInvalid);
    }

    let offset = find_free_slot_or_eof(ctx, resolved.parent());
    let mut entry = DirEntry::default();
    entry.inode_sector = inode_sector;
    set_name(&mut entry.name, name);
    entry.in_use = 1;
    write_entry(ctx, resolved.parent(), offset, &entry);
    Ok(())
}

/// `dir_remove` (§4.3.4).
pub fn dir_remove(ctx: &FsContext, root: &Dir, start: &Dir, path: &str) -> FsResult<()> {
    if path == "/" {
        return Err(FsError::Busy);
    }

    let resolved = resolve(ctx, root, start, path)?;
    let name = resolved.final_name.as_str();
    let (entry, offset) = lookup(ctx, resolved.parent(), name).ok_or(FsError::NotFound)?;

    if entry.inode_sector == root.sector() {
        return Err(FsError::Busy);
    }

    let target = ctx.table.open(entry.inode_sector);

    if target.is_dir(&ctx.cache) {
        // A genuine second opener, not a clone of `target`'s `Arc`: closing
        // it must drop `open_cnt` from 2 back to 1 (just `target`'s own),
        // not to 0, or `remove_if_unique` below would see the wrong count.
        let mut probe = Dir {
            inode: ctx.table.open(entry.inode_sector),
            position: 0,
        };
        let mut scratch = String::new();
        let has_user_entries = dir_readdir(ctx, &mut probe, &mut scratch);
        close_dir(ctx, probe);

        if has_user_entries {
            ctx.table.close(&target, &ctx.cache, &*ctx.freemap);
            return Err(FsError::Busy);
        }
        if !target.remove_if_unique() {
            ctx.table.close(&target, &ctx.cache, &*ctx.freemap);
            return Err(FsError::Busy);
        }
    } else {
        target.remove_mark();
    }

    let mut cleared = DirEntry::default();
    cleared.in_use = 0;
    write_entry(ctx, resolved.parent(), offset, &cleared);

    ctx.table.close(&target, &ctx.cache, &*ctx.freemap);
    Ok(())
}

/// `dir_readdir` (§4.3.5): advances `dir`'s cursor, skipping unused entries
/// and `.`/`..`. Returns `false` at EOF.
pub fn dir_readdir(ctx: &FsContext, dir: &mut Dir, out_name: &mut String) -> bool {
    loop {
        let entry = match read_entry(ctx, dir, dir.position) {
            Some(entry) => entry,
            None => return false,
        };
        dir.position += ENTRY_SIZE as i64;
        if entry.in_use == 0 {
            continue;
        }
        let name = get_name(&entry.name);
        if name == "." || name == ".." {
            continue;
        }
        *out_name = name;
        return true;
    }
}

/// Writes `new_dir`'s own `.` entry, pointing at itself (§4.3.7).
pub fn dir_add_self(ctx: &FsContext, new_dir: &Dir, self_sector: SectorId) {
    let offset = find_free_slot_or_eof(ctx, new_dir);
    let mut entry = DirEntry::default();
    entry.inode_sector = self_sector;
    set_name(&mut entry.name, ".");
    entry.in_use = 1;
    write_entry(ctx, new_dir, offset, &entry);
}

/// `dir_add_parent` (§4.3.6): writes `new_dir`'s `..` entry, pointing at the
/// already-resolved parent sector.
pub fn dir_add_parent(ctx: &FsContext, new_dir: &Dir, parent_sector: SectorId) {
    let offset = find_free_slot_or_eof(ctx, new_dir);
    let mut entry = DirEntry::default();
    entry.inode_sector = parent_sector;
    set_name(&mut entry.name, "..");
    entry.in_use = 1;
    write_entry(ctx, new_dir, offset, &entry);
}
