//! Storage backend over a host directory, via `tokio::fs`.
//!
//! Handles wrap host paths under a fixed root. Entry names are validated
//! before every join (no separators, no `.`/`..`), so a handle can never
//! reach outside the directory it denotes.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

use crate::backend::{DirectoryHandle, EntryHandle, FileHandle, ReadStream, WriteStream};
use crate::{FsError, Result};

/// Backend rooted at an existing host directory.
#[derive(Debug, Clone)]
pub struct FileSystem {
    root: PathBuf,
}

impl FileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(FsError::NotFound);
        }
        Ok(Self { root })
    }

    /// Handle to the root directory, ready for
    /// [`VirtualDirectory::mount`].
    ///
    /// [`VirtualDirectory::mount`]: crate::VirtualDirectory::mount
    pub fn root_handle(&self) -> Arc<dyn DirectoryHandle> {
        Arc::new(HostDirectory {
            path: self.root.clone(),
        })
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(FsError::InvalidInput);
    }
    Ok(())
}

struct HostDirectory {
    path: PathBuf,
}

struct HostFile {
    path: PathBuf,
}

#[async_trait]
impl DirectoryHandle for HostDirectory {
    async fn directory(&self, name: &str, create: bool) -> Result<Arc<dyn DirectoryHandle>> {
        validate_name(name)?;
        let path = self.path.join(name);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(_) => return Err(FsError::TypeMismatch),
            Err(error) if error.kind() == io::ErrorKind::NotFound && create => {
                fs::create_dir(&path).await?;
            }
            Err(error) => return Err(error.into()),
        }
        Ok(Arc::new(HostDirectory { path }))
    }

    async fn file(&self, name: &str, create: bool) -> Result<Arc<dyn FileHandle>> {
        validate_name(name)?;
        let path = self.path.join(name);
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Err(FsError::TypeMismatch),
            Err(error) if error.kind() == io::ErrorKind::NotFound && create => {
                fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await?;
            }
            Err(error) => return Err(error.into()),
        }
        Ok(Arc::new(HostFile { path }))
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> Result<()> {
        validate_name(name)?;
        let path = self.path.join(name);
        let metadata = fs::metadata(&path).await?;
        if metadata.is_dir() {
            if recursive {
                fs::remove_dir_all(&path).await?;
            } else {
                fs::remove_dir(&path).await?;
            }
        } else {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, EntryHandle)>> {
        let mut read_dir = fs::read_dir(&self.path).await?;
        let mut entries = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry
                .file_name()
                .into_string()
                .map_err(|_| FsError::InvalidData)?;
            let path = entry.path();
            let handle = if entry.file_type().await?.is_dir() {
                EntryHandle::Directory(Arc::new(HostDirectory { path }))
            } else {
                EntryHandle::File(Arc::new(HostFile { path }))
            };
            entries.push((name, handle));
        }
        Ok(entries)
    }
}

#[async_trait]
impl FileHandle for HostFile {
    async fn read_all(&self) -> Result<Vec<u8>> {
        fs::read(&self.path).await.map_err(Into::into)
    }

    async fn open_read(&self) -> Result<ReadStream> {
        let file = fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }

    async fn open_write(&self) -> Result<WriteStream> {
        let file = fs::File::create(&self.path).await?;
        Ok(Box::new(file))
    }
}
