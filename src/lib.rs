//! Lazily-bound virtual filesystem nodes over a handle-based storage backend.
//!
//! The backend only hands out opaque directory and file handles looked up by
//! name; it has no native rename and no recursive copy. This crate layers a
//! node model on top of it: path-based navigation, an identity cache so the
//! same logical path resolves to the same in-memory node, and composite
//! operations (copy, move, rename, delete) built from the backend primitives.
//!
//! Nodes are created *unloaded*, known by name and parent but not yet bound
//! to a backend handle, and bind lazily through [`VirtualFile::load`] /
//! [`VirtualDirectory::load`] or eagerly through the `create` and `touch`
//! family. The root directory is bound at mount time and is the entry point
//! for absolute queries.

use std::io;

use thiserror::Error;

pub mod backend;
pub mod dir;
pub mod file;
#[cfg(feature = "host-fs")]
pub mod host_fs;
pub mod mem_fs;
mod node;

pub use backend::{DirectoryHandle, EntryHandle, FileHandle};
pub use dir::{ReadDir, VirtualDirectory, VirtualEntry};
pub use file::VirtualFile;

pub type Result<T> = std::result::Result<T, FsError>;

/// Error type surfaced by every node operation.
///
/// Backend failures propagate through unchanged; nothing in this crate
/// retries or converts them, with the single designed exception of the
/// existence probes ([`VirtualDirectory::has_file`] and friends), which
/// fold any failure into `false`.
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The backend has no entry with the given name under the given parent.
    #[error("entity not found")]
    NotFound,
    /// An entry exists at the name but is the other kind (directory where a
    /// file was expected, or vice versa). Also the recoverable signal
    /// [`VirtualDirectory::get`] uses to fall back from directory to file.
    #[error("entry is of a different kind than requested")]
    TypeMismatch,
    /// A file showed up mid-path while segments were still left to resolve.
    #[error("invalid path")]
    InvalidPath,
    /// The operation needs a bound backend handle, but the node is unloaded.
    #[error("node is not loaded")]
    NotLoaded,
    /// The provided name or path is not acceptable (empty, `..` as a file
    /// target, a separator inside a single entry name).
    #[error("invalid input")]
    InvalidInput,
    /// Backend data failed to decode (e.g. non-UTF-8 bytes read as text).
    #[error("invalid internal data")]
    InvalidData,
    /// A shared-state lock was poisoned.
    #[error("lock error")]
    Lock,
    /// Any other I/O failure surfaced by the storage backend.
    #[error("io error")]
    Io,
}

impl From<io::Error> for FsError {
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::NotFound => FsError::NotFound,
            io::ErrorKind::InvalidData => FsError::InvalidData,
            io::ErrorKind::InvalidInput => FsError::InvalidInput,
            _ => FsError::Io,
        }
    }
}
