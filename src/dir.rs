//! Composite node: a directory with a weak identity cache over its children,
//! path resolution, and the recursive composite operations.
//!
//! The cache maps child names to weak references so that repeated lookups of
//! the same logical path return the same in-memory node for as long as
//! anything else keeps it alive; the cache itself never extends a child's
//! lifetime. Dead slots are purged lazily on the next lookup of that name.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::backend::{DirectoryHandle, EntryHandle};
use crate::file::VirtualFile;
use crate::node::NodeState;
use crate::{FsError, Result};

enum WeakEntry {
    Directory(Weak<VirtualDirectory>),
    File(Weak<VirtualFile>),
}

/// A resolved child of either kind.
#[derive(Clone)]
pub enum VirtualEntry {
    Directory(Arc<VirtualDirectory>),
    File(Arc<VirtualFile>),
}

impl VirtualEntry {
    pub fn name(&self) -> String {
        match self {
            VirtualEntry::Directory(dir) => dir.name(),
            VirtualEntry::File(file) => file.name(),
        }
    }

    pub fn path(&self) -> String {
        match self {
            VirtualEntry::Directory(dir) => dir.path(),
            VirtualEntry::File(file) => file.path(),
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, VirtualEntry::Directory(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, VirtualEntry::File(_))
    }

    /// Converts into the directory node, or [`FsError::TypeMismatch`] if
    /// this entry is a file.
    pub fn into_directory(self) -> Result<Arc<VirtualDirectory>> {
        match self {
            VirtualEntry::Directory(dir) => Ok(dir),
            VirtualEntry::File(_) => Err(FsError::TypeMismatch),
        }
    }

    /// Converts into the file node, or [`FsError::TypeMismatch`] if this
    /// entry is a directory.
    pub fn into_file(self) -> Result<Arc<VirtualFile>> {
        match self {
            VirtualEntry::Directory(_) => Err(FsError::TypeMismatch),
            VirtualEntry::File(file) => Ok(file),
        }
    }

    /// Copies this entry into `dest`, recursing for directories.
    pub fn copy<'a>(
        &'a self,
        dest: &'a Arc<VirtualDirectory>,
        name: Option<&'a str>,
    ) -> BoxFuture<'a, Result<VirtualEntry>> {
        Box::pin(async move {
            match self {
                VirtualEntry::Directory(dir) => {
                    dir.copy(dest, name).await.map(VirtualEntry::Directory)
                }
                VirtualEntry::File(file) => file.copy(dest, name).await.map(VirtualEntry::File),
            }
        })
    }

    pub async fn move_to(&self, dest: &Arc<VirtualDirectory>, name: Option<&str>) -> Result<()> {
        match self {
            VirtualEntry::Directory(dir) => dir.move_to(dest, name).await,
            VirtualEntry::File(file) => file.move_to(dest, name).await,
        }
    }

    pub async fn rename(&self, name: &str) -> Result<()> {
        match self {
            VirtualEntry::Directory(dir) => dir.rename(name).await,
            VirtualEntry::File(file) => file.rename(name).await,
        }
    }

    pub async fn delete(&self) -> Result<()> {
        match self {
            VirtualEntry::Directory(dir) => dir.delete().await,
            VirtualEntry::File(file) => file.delete().await,
        }
    }
}

impl fmt::Debug for VirtualEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualEntry::Directory(dir) => dir.fmt(f),
            VirtualEntry::File(file) => file.fmt(f),
        }
    }
}

/// The children of a directory as materialized by [`VirtualDirectory::list`].
///
/// Finite, and restartable only in the sense that every `list` call produces
/// a fresh one.
#[derive(Debug)]
pub struct ReadDir {
    data: Vec<VirtualEntry>,
    index: usize,
}

impl ReadDir {
    pub(crate) fn new(data: Vec<VirtualEntry>) -> Self {
        Self { data, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Iterator for ReadDir {
    type Item = VirtualEntry;

    fn next(&mut self) -> Option<VirtualEntry> {
        let entry = self.data.get(self.index).cloned()?;
        self.index += 1;
        Some(entry)
    }
}

/// A directory entry in the virtual tree.
///
/// Like files, directories start unloaded unless constructed with a handle
/// in hand; the root obtained from [`VirtualDirectory::mount`] is bound
/// eagerly and anchors absolute path resolution.
pub struct VirtualDirectory {
    state: RwLock<NodeState<Arc<dyn DirectoryHandle>>>,
    children: Mutex<HashMap<String, WeakEntry>>,
}

impl VirtualDirectory {
    /// Binds the backend's top-level handle as the root of a virtual tree.
    ///
    /// The root has an empty name and no parent, so descendant paths render
    /// as `/a/b`.
    pub fn mount(handle: Arc<dyn DirectoryHandle>) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(NodeState::new("", None, Some(handle))),
            children: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn new(
        name: impl Into<String>,
        parent: Arc<VirtualDirectory>,
        handle: Option<Arc<dyn DirectoryHandle>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: RwLock::new(NodeState::new(name, Some(parent), handle)),
            children: Mutex::new(HashMap::new()),
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

    /// Ascends parent links to the true root of this tree.
    pub fn root(self: &Arc<Self>) -> Arc<VirtualDirectory> {
        let mut current = Arc::clone(self);
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub(crate) fn handle(&self) -> Option<Arc<dyn DirectoryHandle>> {
        self.state.read().handle.clone()
    }

    pub(crate) fn bind(&self, handle: Arc<dyn DirectoryHandle>) {
        self.state.write().handle = Some(handle);
    }

    fn require_handle(&self) -> Result<Arc<dyn DirectoryHandle>> {
        self.handle().ok_or(FsError::NotLoaded)
    }

    // ---- child cache ----

    fn cached(&self, name: &str) -> Option<VirtualEntry> {
        let mut children = self.children.lock();
        let entry = match children.get(name)? {
            WeakEntry::Directory(weak) => weak.upgrade().map(VirtualEntry::Directory),
            WeakEntry::File(weak) => weak.upgrade().map(VirtualEntry::File),
        };
        if entry.is_none() {
            // The referent is gone; drop the dead slot.
            children.remove(name);
        }
        entry
    }

    fn cache_insert(&self, name: &str, entry: &VirtualEntry) {
        let weak = match entry {
            VirtualEntry::Directory(dir) => WeakEntry::Directory(Arc::downgrade(dir)),
            VirtualEntry::File(file) => WeakEntry::File(Arc::downgrade(file)),
        };
        self.children.lock().insert(name.to_owned(), weak);
    }

    pub(crate) fn adopt_dir(&self, name: &str, node: &Arc<VirtualDirectory>) {
        self.children
            .lock()
            .insert(name.to_owned(), WeakEntry::Directory(Arc::downgrade(node)));
    }

    pub(crate) fn adopt_file(&self, name: &str, node: &Arc<VirtualFile>) {
        self.children
            .lock()
            .insert(name.to_owned(), WeakEntry::File(Arc::downgrade(node)));
    }

    /// Removes the cache slot for `name`, but only if it still refers to
    /// `node`; a slot repopulated by a racing lookup is left alone.
    pub(crate) fn evict_dir(&self, name: &str, node: &Arc<VirtualDirectory>) {
        let mut children = self.children.lock();
        let still_ours = matches!(
            children.get(name),
            Some(WeakEntry::Directory(weak)) if Weak::as_ptr(weak) == Arc::as_ptr(node)
        );
        if still_ours {
            children.remove(name);
        }
    }

    pub(crate) fn evict_file(&self, name: &str, node: &Arc<VirtualFile>) {
        let mut children = self.children.lock();
        let still_ours = matches!(
            children.get(name),
            Some(WeakEntry::File(weak)) if Weak::as_ptr(weak) == Arc::as_ptr(node)
        );
        if still_ours {
            children.remove(name);
        }
    }

    // ---- in-memory resolution (no backend I/O) ----

    fn child_directory(self: &Arc<Self>, name: &str) -> Result<Arc<VirtualDirectory>> {
        if let Some(entry) = self.cached(name) {
            return entry.into_directory();
        }
        let dir = VirtualDirectory::new(name, Arc::clone(self), None);
        self.adopt_dir(name, &dir);
        Ok(dir)
    }

    fn child_file(self: &Arc<Self>, name: &str) -> Result<Arc<VirtualFile>> {
        if let Some(entry) = self.cached(name) {
            return entry.into_file();
        }
        let file = VirtualFile::new(name, Arc::clone(self), None);
        self.adopt_file(name, &file);
        Ok(file)
    }

    fn walk(self: &Arc<Self>, segments: &[&str]) -> Result<Arc<VirtualDirectory>> {
        let mut current = Arc::clone(self);
        for segment in segments {
            match *segment {
                "" | "." => continue,
                ".." => {
                    if let Some(parent) = current.parent() {
                        current = parent;
                    }
                }
                name => current = current.child_directory(name)?,
            }
        }
        Ok(current)
    }

    /// Resolves `path` to a directory node without touching the backend.
    ///
    /// Every yet-unknown segment materializes an unloaded child directory;
    /// this separates "which node does the path denote" from "is it loaded".
    /// A cached child of the wrong kind is [`FsError::TypeMismatch`].
    pub fn resolve_directory(self: &Arc<Self>, path: &str) -> Result<Arc<VirtualDirectory>> {
        let segments: Vec<&str> = path.split('/').collect();
        self.walk(&segments)
    }

    /// Resolves `path` to a file node without touching the backend.
    pub fn resolve_file(self: &Arc<Self>, path: &str) -> Result<Arc<VirtualFile>> {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();
        let Some((file_name, dir_segments)) = segments.split_last() else {
            return Err(FsError::InvalidInput);
        };
        if *file_name == ".." {
            return Err(FsError::InvalidInput);
        }
        self.walk(dir_segments)?.child_file(file_name)
    }

    // ---- loading and creation ----

    /// Binds this directory to a backend handle, creating the entry if
    /// needed. No-op when already loaded.
    pub fn create<'a>(self: &'a Arc<Self>, create_parents: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.is_loaded() {
                return Ok(());
            }
            let parent = self.parent().ok_or(FsError::NotLoaded)?;
            if create_parents {
                parent.create(true).await?;
            }
            let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
            let handle = parent_handle.directory(&self.name(), true).await?;
            trace!(path = %self.path(), "created directory");
            self.bind(handle);
            Ok(())
        })
    }

    /// Binds this directory to its existing backend entry. No-op when
    /// already loaded.
    ///
    /// A [`FsError::TypeMismatch`] from the backend means the name is taken
    /// by a file; it is handed through untouched so callers like
    /// [`VirtualDirectory::get`] can recover by reopening as a file.
    pub fn load<'a>(self: &'a Arc<Self>, load_parents: bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.is_loaded() {
                return Ok(());
            }
            let parent = self.parent().ok_or(FsError::NotLoaded)?;
            if load_parents {
                parent.load(true).await?;
            }
            let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
            let handle = parent_handle.directory(&self.name(), false).await?;
            self.bind(handle);
            Ok(())
        })
    }

    // ---- single-segment lookup ----

    /// Resolves one child by name.
    ///
    /// `.` and the empty name are this directory; `..` is the parent, or
    /// this directory again at the root. Anything else is served from the
    /// cache when possible, otherwise opened as a directory with a fallback
    /// to a file handle when the backend reports the kind mismatch.
    pub async fn get(self: &Arc<Self>, name: &str) -> Result<VirtualEntry> {
        if name.is_empty() || name == "." {
            return Ok(VirtualEntry::Directory(Arc::clone(self)));
        }
        if name == ".." {
            let parent = self.parent().unwrap_or_else(|| Arc::clone(self));
            return Ok(VirtualEntry::Directory(parent));
        }

        if let Some(entry) = self.cached(name) {
            return Ok(entry);
        }

        let handle = self.require_handle()?;
        let entry = match handle.directory(name, false).await {
            Ok(dir) => {
                VirtualEntry::Directory(VirtualDirectory::new(name, Arc::clone(self), Some(dir)))
            }
            Err(FsError::TypeMismatch) => {
                let file = handle.file(name, false).await?;
                VirtualEntry::File(VirtualFile::new(name, Arc::clone(self), Some(file)))
            }
            Err(other) => return Err(other),
        };
        self.cache_insert(name, &entry);
        Ok(entry)
    }

    /// Get-or-create a direct child directory against the backend.
    pub async fn touch_directory(self: &Arc<Self>, name: &str) -> Result<Arc<VirtualDirectory>> {
        if let Some(entry) = self.cached(name) {
            return entry.into_directory();
        }
        let handle = self.require_handle()?;
        let child = handle.directory(name, true).await?;
        let dir = VirtualDirectory::new(name, Arc::clone(self), Some(child));
        self.adopt_dir(name, &dir);
        Ok(dir)
    }

    /// Get-or-create a direct child file against the backend.
    pub async fn touch_file(self: &Arc<Self>, name: &str) -> Result<Arc<VirtualFile>> {
        if let Some(entry) = self.cached(name) {
            return entry.into_file();
        }
        let handle = self.require_handle()?;
        let child = handle.file(name, true).await?;
        let file = VirtualFile::new(name, Arc::clone(self), Some(child));
        self.adopt_file(name, &file);
        Ok(file)
    }

    // ---- path-based operations ----

    /// Resolves and loads the directory at `path`.
    pub async fn get_directory(self: &Arc<Self>, path: &str) -> Result<Arc<VirtualDirectory>> {
        let dir = self.resolve_directory(path)?;
        dir.load(true).await?;
        Ok(dir)
    }

    /// Resolves and loads the file at `path`.
    pub async fn get_file(self: &Arc<Self>, path: &str) -> Result<Arc<VirtualFile>> {
        let file = self.resolve_file(path)?;
        file.load(true).await?;
        Ok(file)
    }

    /// Resolves `path` and creates the terminal directory.
    pub async fn create_directory(
        self: &Arc<Self>,
        path: &str,
        create_parents: bool,
    ) -> Result<Arc<VirtualDirectory>> {
        let dir = self.resolve_directory(path)?;
        dir.create(create_parents).await?;
        Ok(dir)
    }

    /// Resolves `path` and creates the terminal file.
    pub async fn create_file(
        self: &Arc<Self>,
        path: &str,
        create_parents: bool,
    ) -> Result<Arc<VirtualFile>> {
        let file = self.resolve_file(path)?;
        file.create(create_parents).await?;
        Ok(file)
    }

    /// Whether a directory exists at `path`. Never errors; any failure is
    /// `false`.
    pub async fn has_directory(self: &Arc<Self>, path: &str) -> bool {
        self.get_directory(path).await.is_ok()
    }

    /// Whether a file exists at `path`. Never errors; any failure is
    /// `false`.
    pub async fn has_file(self: &Arc<Self>, path: &str) -> bool {
        self.get_file(path).await.is_ok()
    }

    /// Unified resolver for either kind.
    ///
    /// A leading `/` makes the path absolute: resolution restarts at the
    /// true root. Otherwise segments resolve relative to this directory,
    /// dispatching per segment; a file with segments still remaining is
    /// [`FsError::InvalidPath`], while the final segment may be either kind.
    pub async fn query(self: &Arc<Self>, path: &str) -> Result<VirtualEntry> {
        if let Some(rest) = path.strip_prefix('/') {
            return self.root().query_segments(rest).await;
        }
        self.query_segments(path).await
    }

    async fn query_segments(self: &Arc<Self>, path: &str) -> Result<VirtualEntry> {
        let mut current = Arc::clone(self);
        let mut segments = path
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .peekable();
        while let Some(segment) = segments.next() {
            match current.get(segment).await? {
                VirtualEntry::Directory(dir) => current = dir,
                VirtualEntry::File(file) => {
                    if segments.peek().is_some() {
                        return Err(FsError::InvalidPath);
                    }
                    return Ok(VirtualEntry::File(file));
                }
            }
        }
        Ok(VirtualEntry::Directory(current))
    }

    // ---- enumeration ----

    /// Enumerates this directory's children.
    ///
    /// Each enumerated name funnels through the same cache as [`get`], so
    /// enumeration and direct lookup agree on node identity.
    ///
    /// [`get`]: VirtualDirectory::get
    pub async fn list(self: &Arc<Self>) -> Result<ReadDir> {
        let handle = self.require_handle()?;
        let entries = handle.entries().await?;
        let mut data = Vec::with_capacity(entries.len());
        for (name, entry_handle) in entries {
            data.push(self.materialize(&name, entry_handle));
        }
        Ok(ReadDir::new(data))
    }

    fn materialize(self: &Arc<Self>, name: &str, handle: EntryHandle) -> VirtualEntry {
        if let Some(cached) = self.cached(name) {
            return cached;
        }
        let entry = match handle {
            EntryHandle::Directory(dir) => {
                VirtualEntry::Directory(VirtualDirectory::new(name, Arc::clone(self), Some(dir)))
            }
            EntryHandle::File(file) => {
                VirtualEntry::File(VirtualFile::new(name, Arc::clone(self), Some(file)))
            }
        };
        self.cache_insert(name, &entry);
        entry
    }

    // ---- composite operations ----

    /// Removes this directory and all its descendants from the backend and
    /// unbinds it.
    pub async fn delete(self: &Arc<Self>) -> Result<()> {
        let parent = self.parent().ok_or(FsError::NotLoaded)?;
        let name = self.name();
        let parent_handle = parent.handle().ok_or(FsError::NotLoaded)?;
        parent_handle.remove_entry(&name, true).await?;
        self.state.write().handle = None;
        parent.evict_dir(&name, self);
        trace!(name = %name, "deleted directory");
        Ok(())
    }

    /// Recursively copies this directory into `dest` under `name` (the
    /// current name when `None`), returning the new directory node.
    ///
    /// Children copy one at a time with no rollback; a mid-loop failure
    /// propagates and leaves a partial tree at the destination.
    pub fn copy<'a>(
        self: &'a Arc<Self>,
        dest: &'a Arc<VirtualDirectory>,
        name: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Arc<VirtualDirectory>>> {
        Box::pin(async move {
            let name = match name {
                Some(name) => name.to_owned(),
                None => self.name(),
            };
            let target = dest.touch_directory(&name).await?;
            for entry in self.list().await? {
                entry.copy(&target, None).await?;
            }
            debug!(from = %self.path(), to = %target.path(), "copied directory tree");
            Ok(target)
        })
    }

    /// Moves this directory into `dest`, keeping this object valid: on
    /// success its handle, name and parent are rewritten in place.
    ///
    /// Copy-then-delete, like the file version, with the same
    /// duplicate-on-partial-failure caveat.
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
        dest.adopt_dir(&name, self);
        Ok(())
    }

    /// Renames this directory within its parent. No-op when the name is
    /// unchanged.
    pub async fn rename(self: &Arc<Self>, name: &str) -> Result<()> {
        if name == self.name() {
            return Ok(());
        }
        let parent = self.parent().ok_or(FsError::NotLoaded)?;
        self.move_to(&parent, Some(name)).await
    }
}

impl fmt::Debug for VirtualDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDirectory")
            .field("path", &self.path())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
