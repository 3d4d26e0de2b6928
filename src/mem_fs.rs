//! In-memory storage backend.
//!
//! Nodes live in a slab arena behind an `Arc<RwLock<_>>`; handles carry an
//! inode index into it, so a handle to a removed entry simply stops
//! resolving. This is the reference backend the test suite runs against.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use async_trait::async_trait;
use slab::Slab;
use tokio::io::AsyncWrite;

use crate::backend::{DirectoryHandle, EntryHandle, FileHandle, ReadStream, WriteStream};
use crate::{FsError, Result};

type Inode = usize;
const ROOT_INODE: Inode = 0;

#[derive(Debug, Default)]
struct FileNode {
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct DirectoryNode {
    children: HashMap<String, Inode>,
}

#[derive(Debug)]
enum Node {
    File(FileNode),
    Directory(DirectoryNode),
}

#[derive(Debug)]
struct FileSystemInner {
    storage: Slab<Node>,
}

impl Default for FileSystemInner {
    fn default() -> Self {
        let mut storage = Slab::new();
        let root = storage.insert(Node::Directory(DirectoryNode::default()));
        debug_assert_eq!(root, ROOT_INODE);
        Self { storage }
    }
}

impl FileSystemInner {
    fn directory(&self, inode: Inode) -> Result<&DirectoryNode> {
        match self.storage.get(inode) {
            Some(Node::Directory(dir)) => Ok(dir),
            Some(Node::File(_)) => Err(FsError::TypeMismatch),
            None => Err(FsError::NotFound),
        }
    }

    fn directory_mut(&mut self, inode: Inode) -> Result<&mut DirectoryNode> {
        match self.storage.get_mut(inode) {
            Some(Node::Directory(dir)) => Ok(dir),
            Some(Node::File(_)) => Err(FsError::TypeMismatch),
            None => Err(FsError::NotFound),
        }
    }

    /// Frees `inode` and everything reachable below it.
    fn free_subtree(&mut self, inode: Inode) {
        let mut pending = vec![inode];
        while let Some(next) = pending.pop() {
            if let Some(Node::Directory(dir)) = self.storage.get(next) {
                pending.extend(dir.children.values().copied());
            }
            if self.storage.contains(next) {
                self.storage.remove(next);
            }
        }
    }
}

/// The in-memory backend. Cloning is cheap and shares the same tree.
#[derive(Clone, Default)]
pub struct FileSystem {
    inner: Arc<RwLock<FileSystemInner>>,
}

impl FileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the backend's top-level directory, ready for
    /// [`VirtualDirectory::mount`].
    ///
    /// [`VirtualDirectory::mount`]: crate::VirtualDirectory::mount
    pub fn root_handle(&self) -> Arc<dyn DirectoryHandle> {
        Arc::new(MemDirectory {
            inode: ROOT_INODE,
            fs: Arc::clone(&self.inner),
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(FsError::InvalidInput);
    }
    Ok(())
}

struct MemDirectory {
    inode: Inode,
    fs: Arc<RwLock<FileSystemInner>>,
}

struct MemFile {
    inode: Inode,
    fs: Arc<RwLock<FileSystemInner>>,
}

#[async_trait]
impl DirectoryHandle for MemDirectory {
    async fn directory(&self, name: &str, create: bool) -> Result<Arc<dyn DirectoryHandle>> {
        validate_name(name)?;
        let mut fs = self.fs.write().map_err(|_| FsError::Lock)?;
        let existing = fs.directory(self.inode)?.children.get(name).copied();
        let inode = match existing {
            Some(inode) => match fs.storage.get(inode) {
                Some(Node::Directory(_)) => inode,
                Some(Node::File(_)) => return Err(FsError::TypeMismatch),
                None => return Err(FsError::NotFound),
            },
            None if create => {
                let inode = fs.storage.insert(Node::Directory(DirectoryNode::default()));
                fs.directory_mut(self.inode)?
                    .children
                    .insert(name.to_owned(), inode);
                inode
            }
            None => return Err(FsError::NotFound),
        };
        Ok(Arc::new(MemDirectory {
            inode,
            fs: Arc::clone(&self.fs),
        }))
    }

    async fn file(&self, name: &str, create: bool) -> Result<Arc<dyn FileHandle>> {
        validate_name(name)?;
        let mut fs = self.fs.write().map_err(|_| FsError::Lock)?;
        let existing = fs.directory(self.inode)?.children.get(name).copied();
        let inode = match existing {
            Some(inode) => match fs.storage.get(inode) {
                Some(Node::File(_)) => inode,
                Some(Node::Directory(_)) => return Err(FsError::TypeMismatch),
                None => return Err(FsError::NotFound),
            },
            None if create => {
                let inode = fs.storage.insert(Node::File(FileNode::default()));
                fs.directory_mut(self.inode)?
                    .children
                    .insert(name.to_owned(), inode);
                inode
            }
            None => return Err(FsError::NotFound),
        };
        Ok(Arc::new(MemFile {
            inode,
            fs: Arc::clone(&self.fs),
        }))
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<()> {
        validate_name(name)?;
        let mut fs = self.fs.write().map_err(|_| FsError::Lock)?;
        let inode = fs
            .directory(self.inode)?
            .children
            .get(name)
            .copied()
            .ok_or(FsError::NotFound)?;
        if let Some(Node::Directory(dir)) = fs.storage.get(inode) {
            if !dir.children.is_empty() && !recursive {
                return Err(FsError::Io);
            }
        }
        fs.directory_mut(self.inode)?.children.remove(name);
        fs.free_subtree(inode);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, EntryHandle)>> {
        let fs = self.fs.read().map_err(|_| FsError::Lock)?;
        let dir = fs.directory(self.inode)?;
        let mut entries = Vec::with_capacity(dir.children.len());
        for (name, &inode) in &dir.children {
            let handle = match fs.storage.get(inode) {
                Some(Node::Directory(_)) => EntryHandle::Directory(Arc::new(MemDirectory {
                    inode,
                    fs: Arc::clone(&self.fs),
                })),
                Some(Node::File(_)) => EntryHandle::File(Arc::new(MemFile {
                    inode,
                    fs: Arc::clone(&self.fs),
                })),
                None => continue,
            };
            entries.push((name.clone(), handle));
        }
        Ok(entries)
    }
}

#[async_trait]
impl FileHandle for MemFile {
    async fn read_all(&self) -> Result<Vec<u8>> {
        let fs = self.fs.read().map_err(|_| FsError::Lock)?;
        match fs.storage.get(self.inode) {
            Some(Node::File(file)) => Ok(file.data.clone()),
            Some(Node::Directory(_)) => Err(FsError::TypeMismatch),
            None => Err(FsError::NotFound),
        }
    }

    async fn open_read(&self) -> Result<ReadStream> {
        let data = self.read_all().await?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_write(&self) -> Result<WriteStream> {
        // The buffer only becomes the file's content at shutdown, matching
        // the scoped-writable contract.
        Ok(Box::new(MemFileWriter {
            buf: Vec::new(),
            committed: false,
            inode: self.inode,
            fs: Arc::clone(&self.fs),
        }))
    }
}

struct MemFileWriter {
    buf: Vec<u8>,
    committed: bool,
    inode: Inode,
    fs: Arc<RwLock<FileSystemInner>>,
}

impl AsyncWrite for MemFileWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.committed {
            return Poll::Ready(Ok(()));
        }
        let mut fs = match this.fs.write() {
            Ok(fs) => fs,
            Err(_) => return Poll::Ready(Err(io::Error::other("backend lock poisoned"))),
        };
        match fs.storage.get_mut(this.inode) {
            Some(Node::File(file)) => {
                file.data = std::mem::take(&mut this.buf);
                this.committed = true;
                Poll::Ready(Ok(()))
            }
            _ => Poll::Ready(Err(io::ErrorKind::NotFound.into())),
        }
    }
}
