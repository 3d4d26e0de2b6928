//! Backend capability traits consumed by the node layer.
//!
//! A storage backend exposes directories and files exclusively through opaque
//! handles obtained by name. The traits are object safe (via `async_trait`)
//! so concrete backends can be swapped behind `Arc<dyn _>` without the node
//! layer knowing which storage technology is underneath.
//!
//! The backend offers no rename and no recursive copy; everything composite
//! is built above it out of these primitives.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::Result;

/// A readable byte stream over a file's current content.
///
/// Finite and not restartable: once consumed it is done, and a fresh stream
/// must be opened to read again.
pub type ReadStream = Box<dyn AsyncRead + Send + Unpin>;

/// A scoped writable resource on a file.
///
/// The write only becomes visible once the stream is shut down; callers must
/// finalize it on every exit path, including after a failed write.
pub type WriteStream = Box<dyn AsyncWrite + Send + Unpin>;

/// Opaque handle to a backend directory.
#[async_trait]
pub trait DirectoryHandle: Send + Sync + 'static {
    /// Resolves the child directory called `name`, creating it when `create`
    /// is set. Fails with [`FsError::NotFound`] when the entry is missing and
    /// `create` is unset, and with [`FsError::TypeMismatch`] when the name is
    /// taken by a file.
    ///
    /// [`FsError::NotFound`]: crate::FsError::NotFound
    /// [`FsError::TypeMismatch`]: crate::FsError::TypeMismatch
    async fn directory(&self, name: &str, create: bool) -> Result<Arc<dyn DirectoryHandle>>;

    /// Resolves the child file called `name`, creating it when `create` is
    /// set. Same error contract as [`DirectoryHandle::directory`], with the
    /// kinds swapped.
    async fn file(&self, name: &str, create: bool) -> Result<Arc<dyn FileHandle>>;

    /// Removes the entry called `name`. Directories need `recursive` to be
    /// removed together with their descendants.
    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<()>;

    /// Enumerates the directory's current entries.
    ///
    /// Each call produces a fresh snapshot; the order of entries is
    /// unspecified.
    async fn entries(&self) -> Result<Vec<(String, EntryHandle)>>;
}

/// Opaque handle to a backend file.
#[async_trait]
pub trait FileHandle: Send + Sync + 'static {
    /// Reads the file's full content.
    async fn read_all(&self) -> Result<Vec<u8>>;

    /// Reads the file's full content as UTF-8 text.
    async fn read_text(&self) -> Result<String> {
        let bytes = self.read_all().await?;
        String::from_utf8(bytes).map_err(|_| crate::FsError::InvalidData)
    }

    /// Opens a fresh read stream over the file's current content.
    async fn open_read(&self) -> Result<ReadStream>;

    /// Opens a scoped writable that replaces the file's content when shut
    /// down.
    async fn open_write(&self) -> Result<WriteStream>;
}

/// A kind-tagged handle, as produced by directory enumeration.
#[derive(Clone)]
pub enum EntryHandle {
    Directory(Arc<dyn DirectoryHandle>),
    File(Arc<dyn FileHandle>),
}

impl EntryHandle {
    pub fn is_directory(&self) -> bool {
        matches!(self, EntryHandle::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, EntryHandle::File(_))
    }
}
