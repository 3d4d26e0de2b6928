//! Leaf node: a file lazily bound to a backend file handle.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::backend::{FileHandle, ReadStream};
use crate::dir::VirtualDirectory;
use crate::node::NodeState;
use crate::{FsError, Result};

/// Extensions with first-class handling; anything else renders as the
/// fallback.
const KNOWN_EXTENSIONS: &[&str] = &["json", "txt", "c", "asm", "mif", "toml"];

const FALLBACK_EXTENSION: &str = "txt";

/// A file entry in the virtual tree.
///
/// Starts unloaded unless constructed with a handle already in hand (as
/// during enumeration); [`VirtualFile::create`] and [`VirtualFile::load`]
/// bind it. [`VirtualFile::delete`] unbinds it again, leaving a dangling
/// stub. A move rebinds the same object in place, so references held across
/// a [`VirtualFile::move_to`] stay valid.
pub struct VirtualFile {
    state: RwLock<NodeState<Arc<dyn FileHandle>>>,
}

impl VirtualFile {
    pub(crate) fn new(
        name: impl Into<String>,
        parent: Arc<VirtualDirectory>,
        handle: Option<Arc<dyn FileHandle>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(NodeState::new(name, Some(parent), handle)),
        })
    }

    pub fn name(&self) -> String {
        self.state.read().name.clone()
    }

    pub fn parent(&self) -> Option<Arc<VirtualDirectory>> {
        self.state.read().parent.clone()
    }

    /// Full path from the root, recomputed on every call.
    pub fn path(&self) -> String {
        self.state.read().path()
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().is_loaded()
    }

    /// The file's extension category: the last dot-segment of the name when
    /// it is one of the recognized extensions, the fallback otherwise.
    pub fn extension(&self) -> &'static str {
        let state = self.state.read();
        match state.name.rsplit_once('.') {
            Some((_, ext)) => KNOWN_EXTENSIONS
                .iter()
                .copied()
                .find(|known| *known == ext)
                .unwrap_or(FALLBACK_EXTENSION),
            None => FALLBACK_EXTENSION,
        }
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn FileHandle>> {
        self.state.read().handle.clone()
    }

    pub(crate) fn bind(&self, handle: Arc<dyn FileHandle>) {
        self.state.write().handle = Some(handle);
    }

    fn require_parent(&self) -> Result<Arc<VirtualDirectory>> {
        self.parent().ok_or(FsError::NotLoaded)
    }

    fn require_handle(&self) -> Result<Arc<dyn FileHandle>> {
        self.handle().ok_or(FsError::NotLoaded)
    }

    /// Binds this file to a backend handle, creating the entry if needed.
    ///
    /// No-op when already loaded. With `create_parents` the whole parent
    /// chain is created first; without it an unloaded parent is an error.
    pub async fn create(&self, create_parents: bool) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let parent = self.require_parent()?;
        if create_parents {
            parent.create(true).await?;
        }
        let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
        let handle = parent_handle.file(&self.name(), true).await?;
        trace!(path = %self.path(), "created file");
        self.bind(handle);
        Ok(())
    }

    /// Binds this file to its existing backend entry.
    ///
    /// No-op when already loaded. With `load_parents` the parent chain is
    /// loaded (never created) first.
    pub async fn load(&self, load_parents: bool) -> Result<()> {
        if self.is_loaded() {
            return Ok(());
        }
        let parent = self.require_parent()?;
        if load_parents {
            parent.load(true).await?;
        }
        let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
        let handle = parent_handle.file(&self.name(), false).await?;
        self.bind(handle);
        Ok(())
    }

    /// Reads the full content as bytes.
    pub async fn read(&self) -> Result<Vec<u8>> {
        self.require_handle()?.read_all().await
    }

    /// Reads the full content as UTF-8 text.
    pub async fn read_to_string(&self) -> Result<String> {
        self.require_handle()?.read_text().await
    }

    /// Opens a read stream over the current content. The stream is finite
    /// and not restartable; open a new one to read again.
    pub async fn open_read(&self) -> Result<ReadStream> {
        self.require_handle()?.open_read().await
    }

    /// Replaces the file's content with `data`.
    ///
    /// The backend's scoped writable is shut down on every exit path, so a
    /// failed write never leaves the resource open.
    pub async fn write(&self, data: impl AsRef<[u8]>) -> Result<()> {
        let handle = self.require_handle()?;
        let mut writer = handle.open_write().await?;
        let written = writer.write_all(data.as_ref()).await;
        let finalized = writer.shutdown().await;
        written?;
        finalized?;
        Ok(())
    }

    /// Removes this file from the backend and unbinds it.
    ///
    /// The node stays around as a dangling stub; its path no longer
    /// resolves.
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        let parent = self.require_parent()?;
        let name = self.name();
        let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
        parent_handle.remove_entry(&name, false).await?;
        self.state.write().handle = None;
        parent.evict_file(&name, self);
        trace!(name = %name, "deleted file");
        Ok(())
    }

    /// Copies this file into `dest` under `name` (the current name when
    /// `None`), creating missing parents at the destination.
    ///
    /// Read-then-write: the content is read in full and written to the new
    /// entry. A concurrent external mutation of the source between the two
    /// steps goes undetected.
    pub async fn copy(
        &self,
        dest: &Arc<VirtualDirectory>,
        name: Option<&str>,
    ) -> Result<Arc<VirtualFile>> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => self.name(),
        };
        let data = self.read().await?;
        let target = dest.create_file(&name, true).await?;
        target.write(&data).await?;
        trace!(from = %self.path(), to = %target.path(), "copied file");
        Ok(target)
    }

    /// Moves this file into `dest`, keeping this object valid: on success
    /// its handle, name and parent are rewritten in place.
    ///
    /// Implemented as copy-then-delete. If the delete of the source fails
    /// after the copy succeeded the file exists at both locations; the error
    /// propagates rather than being hidden.
    pub async fn move_to(
        self: &Arc<Self>,
        dest: &Arc<VirtualDirectory>,
        name: Option<&str>,
    ) -> Result<()> {
        let name = match name {
            Some(name) => name.to_owned(),
            None => self.name(),
        };
        let copied = self.copy(dest, Some(&name)).await?;
        self.delete().await?;

        let handle = copied.handle().ok_or(FsError::NotLoaded)?;
        {
            let mut state = self.state.write();
            state.name = name.clone();
            state.parent = Some(Arc::clone(dest));
            state.handle = Some(handle);
        }
        // Keep lookups pointed at the surviving object rather than the
        // transient copy node.
        dest.adopt_file(&name, self);
        Ok(())
    }

    /// Renames this file within its parent. No-op when the name is
    /// unchanged.
    pub async fn rename(self: &Arc<Self>, name: &str) -> Result<()> {
        if name == self.name() {
            return Ok(());
        }
        let parent = self.require_parent()?;
        self.move_to(&parent, Some(name)).await
    }
}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("path", &self.path())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
