//! End-to-end behavior of the node layer over the in-memory backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use lazy_fs::backend::{DirectoryHandle, EntryHandle, FileHandle};
use lazy_fs::{mem_fs, FsError, VirtualDirectory};
use pretty_assertions::assert_eq;

fn mount() -> Arc<VirtualDirectory> {
    VirtualDirectory::mount(mem_fs::FileSystem::new().root_handle())
}

#[tokio::test]
async fn create_write_read_round_trip() {
    let root = mount();

    let file = root.create_file("a/b/c.txt", true).await.unwrap();
    file.write(b"round trip payload").await.unwrap();

    let looked_up = root.get_file("a/b/c.txt").await.unwrap();
    assert_eq!(looked_up.read().await.unwrap(), b"round trip payload");
    assert_eq!(looked_up.path(), "/a/b/c.txt");
}

#[tokio::test]
async fn create_without_parents_requires_a_loaded_parent() {
    let root = mount();

    let result = root.create_file("missing/dir/file.txt", false).await;
    assert_eq!(result.map(|_| ()), Err(FsError::NotLoaded));

    // With parent creation the same path works.
    root.create_file("missing/dir/file.txt", true).await.unwrap();
    assert!(root.has_file("missing/dir/file.txt").await);
}

#[tokio::test]
async fn moving_a_file_updates_the_object_in_place() {
    let root = mount();
    root.create_directory("dest", false).await.unwrap();
    let file = root.create_file("src/note.txt", true).await.unwrap();
    file.write("carried along").await.unwrap();

    let dest = root.get_directory("dest").await.unwrap();
    file.move_to(&dest, None).await.unwrap();

    // The moved object itself now points at the new location.
    assert_eq!(file.path(), "/dest/note.txt");
    assert_eq!(file.read_to_string().await.unwrap(), "carried along");

    // The old path no longer resolves.
    assert!(!root.has_file("src/note.txt").await);
    assert_eq!(
        root.get_file("src/note.txt").await.map(|_| ()),
        Err(FsError::NotFound)
    );

    // A fresh lookup at the new path sees the same content.
    let at_dest = root.get_file("dest/note.txt").await.unwrap();
    assert_eq!(at_dest.read_to_string().await.unwrap(), "carried along");
}

#[tokio::test]
async fn lookups_after_a_move_return_the_moved_object() {
    let root = mount();
    root.create_directory("dest", false).await.unwrap();
    let file = root.create_file("src/keep.txt", true).await.unwrap();
    file.write("x").await.unwrap();

    let dest = root.get_directory("dest").await.unwrap();
    file.move_to(&dest, None).await.unwrap();

    let resolved = root.get_file("dest/keep.txt").await.unwrap();
    assert!(
        Arc::ptr_eq(&file, &resolved),
        "the surviving object answers lookups at the destination"
    );
}

#[tokio::test]
async fn rename_is_a_move_within_the_parent() {
    let root = mount();
    let file = root.create_file("docs/draft.txt", true).await.unwrap();
    file.write("v1").await.unwrap();

    file.rename("final.txt").await.unwrap();

    assert_eq!(file.path(), "/docs/final.txt");
    assert!(root.has_file("docs/final.txt").await);
    assert!(!root.has_file("docs/draft.txt").await);

    // Renaming to the current name is a no-op.
    file.rename("final.txt").await.unwrap();
    assert_eq!(file.path(), "/docs/final.txt");
}

#[tokio::test]
async fn directory_copy_reproduces_the_tree() {
    let root = mount();
    root.create_file("tree/x.txt", true).await.unwrap();
    root.create_file("tree/sub/y.txt", true).await.unwrap();
    root.create_file("tree/sub/deeper/z.txt", true)
        .await
        .unwrap();
    root.get_file("tree/x.txt")
        .await
        .unwrap()
        .write("one")
        .await
        .unwrap();
    root.get_file("tree/sub/y.txt")
        .await
        .unwrap()
        .write("two")
        .await
        .unwrap();
    root.get_file("tree/sub/deeper/z.txt")
        .await
        .unwrap()
        .write("three")
        .await
        .unwrap();

    let tree = root.get_directory("tree").await.unwrap();
    let dest = root.create_directory("backup", false).await.unwrap();
    tree.copy(&dest, None).await.unwrap();

    for (path, content) in [
        ("backup/tree/x.txt", "one"),
        ("backup/tree/sub/y.txt", "two"),
        ("backup/tree/sub/deeper/z.txt", "three"),
    ] {
        let file = root.get_file(path).await.unwrap();
        assert_eq!(file.read_to_string().await.unwrap(), content, "{path}");
    }

    // The copy is independent of the original.
    tree.delete().await.unwrap();
    assert!(!root.has_directory("tree").await);
    assert!(root.has_file("backup/tree/sub/deeper/z.txt").await);
}

#[tokio::test]
async fn directory_move_keeps_references_valid() {
    let root = mount();
    let dir = root.create_directory("projects/old", true).await.unwrap();
    root.create_file("projects/old/readme.txt", true)
        .await
        .unwrap()
        .write("hello")
        .await
        .unwrap();

    let attic = root.create_directory("attic", false).await.unwrap();
    dir.move_to(&attic, Some("archived")).await.unwrap();

    assert_eq!(dir.path(), "/attic/archived");
    assert!(root.has_file("attic/archived/readme.txt").await);
    assert!(!root.has_directory("projects/old").await);
}

#[tokio::test]
async fn existence_probes_never_error() {
    let root = mount();
    root.create_file("present.txt", false).await.unwrap();

    assert!(!root.has_file("nonexistent").await);
    assert!(!root.has_directory("nonexistent").await);
    // Wrong kind also probes to false instead of erroring.
    assert!(!root.has_directory("present.txt").await);
    assert!(!root.has_file("present.txt/below").await);
}

#[tokio::test]
async fn absolute_queries_resolve_from_the_true_root() {
    let root = mount();
    root.create_file("a/b/data.json", true).await.unwrap();
    let nested = root.get_directory("a/b").await.unwrap();

    let absolute = nested.query("/a/b/data.json").await.unwrap();
    let relative = root.query("a/b/data.json").await.unwrap();

    assert_eq!(absolute.path(), relative.path());
    assert_eq!(absolute.path(), "/a/b/data.json");
}

#[tokio::test]
async fn query_normalizes_noise_segments() {
    let root = mount();
    root.create_file("a/b/file.txt", true).await.unwrap();

    let noisy = root.query("a//.//b/file.txt").await.unwrap();
    assert_eq!(noisy.path(), "/a/b/file.txt");

    let via_parent = root.query("a/b/../b/file.txt").await.unwrap();
    assert_eq!(via_parent.path(), "/a/b/file.txt");
}

#[tokio::test]
async fn streaming_read_returns_the_written_bytes() {
    let root = mount();
    let file = root.create_file("stream.bin", false).await.unwrap();
    file.write([7u8; 1000].as_slice()).await.unwrap();

    let mut stream = file.open_read().await.unwrap();
    let mut out = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut out)
        .await
        .unwrap();
    assert_eq!(out, vec![7u8; 1000]);
}

#[tokio::test]
async fn entries_resolved_by_query_support_the_composite_ops() {
    let root = mount();
    root.create_file("inbox/todo.txt", true).await.unwrap();

    let entry = root.query("inbox/todo.txt").await.unwrap();
    assert!(entry.is_file());
    entry.rename("done.txt").await.unwrap();
    assert_eq!(entry.path(), "/inbox/done.txt");

    entry.delete().await.unwrap();
    assert!(!root.has_file("inbox/done.txt").await);

    let dir = root.query("inbox").await.unwrap();
    assert!(dir.is_directory());
    dir.delete().await.unwrap();
    assert!(!root.has_directory("inbox").await);
}

/// Counts every call that reaches the backend, to pin down when the node
/// layer defers or skips I/O.
struct CountingDirectory {
    inner: Arc<dyn DirectoryHandle>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl DirectoryHandle for CountingDirectory {
    async fn directory(&self, name: &str, create: bool) -> lazy_fs::Result<Arc<dyn DirectoryHandle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.directory(name, create).await?;
        Ok(Arc::new(CountingDirectory {
            inner,
            calls: Arc::clone(&self.calls),
        }))
    }

    async fn file(&self, name: &str, create: bool) -> lazy_fs::Result<Arc<dyn FileHandle>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.file(name, create).await
    }

    async fn remove_entry(&self, name: &str, recursive: bool) -> lazy_fs::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.remove_entry(name, recursive).await
    }

    async fn entries(&self) -> lazy_fs::Result<Vec<(String, EntryHandle)>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.entries().await
    }
}

#[tokio::test]
async fn load_on_a_loaded_node_skips_the_backend() {
    let fs = mem_fs::FileSystem::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let root = VirtualDirectory::mount(Arc::new(CountingDirectory {
        inner: fs.root_handle(),
        calls: Arc::clone(&calls),
    }));

    let dir = root.create_directory("stable", false).await.unwrap();
    let before = calls.load(Ordering::SeqCst);

    dir.load(true).await.unwrap();
    dir.load(true).await.unwrap();

    assert_eq!(
        calls.load(Ordering::SeqCst),
        before,
        "loading an already-loaded node is a no-op"
    );
}

#[tokio::test]
async fn resolution_is_pure_until_load() {
    let fs = mem_fs::FileSystem::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let root = VirtualDirectory::mount(Arc::new(CountingDirectory {
        inner: fs.root_handle(),
        calls: Arc::clone(&calls),
    }));

    let file = root.resolve_file("deep/tree/leaf.txt").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0, "resolution issues no I/O");
    assert!(!file.is_loaded());
    assert_eq!(file.path(), "/deep/tree/leaf.txt");
}

/// Refuses every removal, to expose the copy-then-delete failure mode.
struct StickyDirectory {
    inner: Arc<dyn DirectoryHandle>,
}

#[async_trait]
impl DirectoryHandle for StickyDirectory {
    async fn directory(&self, name: &str, create: bool) -> lazy_fs::Result<Arc<dyn DirectoryHandle>> {
        let inner = self.inner.directory(name, create).await?;
        Ok(Arc::new(StickyDirectory { inner }))
    }

    async fn file(&self, name: &str, create: bool) -> lazy_fs::Result<Arc<dyn FileHandle>> {
        self.inner.file(name, create).await
    }

    async fn remove_entry(&self, _name: &str, _recursive: bool) -> lazy_fs::Result<()> {
        Err(FsError::Io)
    }

    async fn entries(&self) -> lazy_fs::Result<Vec<(String, EntryHandle)>> {
        self.inner.entries().await
    }
}

#[tokio::test]
async fn failed_source_delete_leaves_a_duplicate() {
    let fs = mem_fs::FileSystem::new();
    let root = VirtualDirectory::mount(Arc::new(StickyDirectory {
        inner: fs.root_handle(),
    }));
    root.create_directory("dest", false).await.unwrap();
    let file = root.create_file("src/dup.txt", true).await.unwrap();
    file.write("both places").await.unwrap();

    let dest = root.get_directory("dest").await.unwrap();
    let result = file.move_to(&dest, None).await;

    // The delete step failed and the error surfaced...
    assert_eq!(result, Err(FsError::Io));
    // ...leaving the copy at the destination and the source in place.
    assert!(root.has_file("dest/dup.txt").await);
    assert!(root.has_file("src/dup.txt").await);
    // The object itself was not repointed, since the move did not complete.
    assert_eq!(file.path(), "/src/dup.txt");
}
