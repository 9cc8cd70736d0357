//! A small UNIX-style filesystem core: a buffer cache, a multi-level
//! indexed inode layer, and a hierarchical directory layer, built atop a
//! pluggable block device.
//!
//! The three core modules ([`cache`], [`inode`], [`dir`]) are layered
//! strictly, matching the control flow of a real filesystem: a dispatcher
//! resolves a path through [`dir`], which reads/writes directory-flagged
//! inodes through [`inode`], which reads/writes sectors through [`cache`],
//! which hits or misses the underlying [`device::BlockDevice`]. [`fs`] wires
//! all of it together behind the operations a syscall layer would expose.

pub mod cache;
pub mod clock;
pub mod device;
pub mod dir;
pub mod error;
pub mod freemap;
pub mod fs;
pub mod inode;

pub use error::{FsError, FsResult};
pub use fs::{FileHandle, FileSystem};
