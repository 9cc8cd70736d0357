//! Shared error taxonomy for the buffer cache, inode, and directory layers.
//!
//! Internally every fallible operation in this crate returns an [`FsResult`].
//! The dispatcher-facing surface in [`crate::fs`] collapses these into the
//! bool/count/sentinel shapes a UNIX-style syscall layer expects; nothing
//! below that façade should ever unwrap its way past a real error.

use thiserror::Error;

/// The error kinds a caller of this crate's core layers can observe.
///
/// A short read and a zero-byte denied write are routine return values, not
/// errors, so neither has a variant here.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FsError {
    /// Name resolution or a shallow lookup did not find the requested entry.
    #[error("not found")]
    NotFound,

    /// An intermediate path component exists but is not a directory.
    #[error("not a directory")]
    NotADirectory,

    /// A name is empty, longer than `NAME_MAX`, or already present.
    #[error("invalid name")]
    NameInvalid,

    /// The free map has no more sectors, or a fixed-size table is full.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// Removing a directory that still has entries or other openers.
    #[error("busy")]
    Busy,

    /// The underlying block device or free map collaborator failed.
    #[error("device error: {0}")]
    Device(&'static str),
}

pub type FsResult<T> = Result<T, FsError>;
