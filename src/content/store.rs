//! Local persistent byte storage for cached article content.
//!
//! Paths handed to a [`ContentStore`] are relative to the store root.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Disk error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Path escapes the content store: {0}")]
    InvalidPath(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub last_modified_at_millis: i64,
    pub size: u64,
}

/// One cached file, as seen by the eviction sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub last_modified_at_millis: i64,
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn ensure_directory(&self, path: &Path) -> Result<(), StoreError>;

    /// `None` when nothing is stored at `path`.
    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>, StoreError>;

    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError>;

    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError>;

    /// Every stored file, in no particular order.
    async fn list(&self) -> Result<Vec<CacheEntry>, StoreError>;

    /// Removing a missing file is not an error.
    async fn remove(&self, path: &Path) -> Result<(), StoreError>;
}

const PART_EXTENSION: &str = "part";

/// Filesystem-backed store rooted at a cache directory.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, path: &Path) -> Result<PathBuf, StoreError> {
        let escapes = path.is_absolute()
            || path
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes {
            return Err(StoreError::InvalidPath(path.to_path_buf()));
        }
        Ok(self.root.join(path))
    }

    fn meta_of(metadata: &std::fs::Metadata) -> FileMeta {
        let last_modified_at_millis = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        FileMeta {
            last_modified_at_millis,
            size: metadata.len(),
        }
    }
}

fn part_path(full: &Path) -> PathBuf {
    let name = full
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let unique: u64 = rand::random();
    full.with_file_name(format!("{}.{:016x}.{}", name, unique, PART_EXTENSION))
}

fn not_found(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::NotFound
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn ensure_directory(&self, path: &Path) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full)
            .await
            .map_err(|e| StoreError::io(&full, e))
    }

    async fn stat(&self, path: &Path) -> Result<Option<FileMeta>, StoreError> {
        let full = self.resolve(path)?;
        match fs::metadata(&full).await {
            Ok(metadata) if metadata.is_file() => Ok(Some(Self::meta_of(&metadata))),
            Ok(_) => Ok(None),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(StoreError::io(&full, e)),
        }
    }

    /// Writes a uniquely named `<file>.<n>.part` and renames it into place,
    /// so readers never see a partially written article and concurrent
    /// writers of the same path never share a temp file.
    async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        let part = part_path(&full);

        let mut file = fs::File::create(&part)
            .await
            .map_err(|e| StoreError::io(&part, e))?;
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = written {
            let _ = fs::remove_file(&part).await;
            return Err(StoreError::io(&part, e));
        }

        fs::rename(&part, &full)
            .await
            .map_err(|e| StoreError::io(&full, e))
    }

    async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        let full = self.resolve(path)?;
        match fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if not_found(&e) => Ok(None),
            Err(e) => Err(StoreError::io(&full, e)),
        }
    }

    async fn list(&self) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut read_dir = match fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if not_found(&e) => continue,
                Err(e) => return Err(StoreError::io(&dir, e)),
            };
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .await
                    .map_err(|e| StoreError::io(&path, e))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) == Some(PART_EXTENSION) {
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let meta = Self::meta_of(&metadata);
                entries.push(CacheEntry {
                    path: relative.to_path_buf(),
                    size: meta.size,
                    last_modified_at_millis: meta.last_modified_at_millis,
                });
            }
        }
        Ok(entries)
    }

    async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        let full = self.resolve(path)?;
        match fs::remove_file(&full).await {
            Ok(()) => {}
            Err(e) if not_found(&e) => return Ok(()),
            Err(e) => return Err(StoreError::io(&full, e)),
        }
        // Drop the bookmark directory once it is empty.
        if let Some(parent) = full.parent() {
            if parent != self.root {
                let _ = fs::remove_dir(parent).await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// In-memory store with controllable modification times.
    #[derive(Default)]
    pub(crate) struct MemoryContentStore {
        files: Mutex<HashMap<PathBuf, (Vec<u8>, i64)>>,
        pub fail_writes: AtomicBool,
    }

    impl MemoryContentStore {
        pub fn insert(&self, path: &Path, bytes: &[u8], modified_ms: i64) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_path_buf(), (bytes.to_vec(), modified_ms));
        }

        pub fn contains(&self, path: &Path) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
    }

    #[async_trait]
    impl ContentStore for MemoryContentStore {
        async fn ensure_directory(&self, _path: &Path) -> Result<(), StoreError> {
            Ok(())
        }

        async fn stat(&self, path: &Path) -> Result<Option<FileMeta>, StoreError> {
            Ok(self.files.lock().unwrap().get(path).map(|(b, m)| FileMeta {
                last_modified_at_millis: *m,
                size: b.len() as u64,
            }))
        }

        async fn write(&self, path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::io(path, std::io::Error::other("disk full")));
            }
            let now = chrono::Utc::now().timestamp_millis();
            self.insert(path, bytes, now);
            Ok(())
        }

        async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(self.files.lock().unwrap().get(path).map(|(b, _)| b.clone()))
        }

        async fn list(&self) -> Result<Vec<CacheEntry>, StoreError> {
            Ok(self
                .files
                .lock()
                .unwrap()
                .iter()
                .map(|(path, (b, m))| CacheEntry {
                    path: path.clone(),
                    size: b.len() as u64,
                    last_modified_at_millis: *m,
                })
                .collect())
        }

        async fn remove(&self, path: &Path) -> Result<(), StoreError> {
            self.files.lock().unwrap().remove(path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, FsContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_then_read_and_stat() {
        let (_dir, store) = store();
        let path = Path::new("bm_1/content.html");
        store.ensure_directory(Path::new("bm_1")).await.unwrap();

        assert!(store.stat(path).await.unwrap().is_none());
        assert!(store.read(path).await.unwrap().is_none());

        let before = chrono::Utc::now().timestamp_millis() - 5_000;
        store.write(path, b"<p>hello</p>").await.unwrap();

        let meta = store.stat(path).await.unwrap().unwrap();
        assert_eq!(meta.size, 12);
        assert!(meta.last_modified_at_millis >= before);
        assert_eq!(store.read(path).await.unwrap().unwrap(), b"<p>hello</p>");
    }

    #[tokio::test]
    async fn test_write_leaves_no_part_file() {
        let (dir, store) = store();
        store.ensure_directory(Path::new("bm_1")).await.unwrap();
        store
            .write(Path::new("bm_1/content.html"), b"body")
            .await
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("bm_1"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("content.html")]);
    }

    #[test]
    fn test_part_paths_are_unique_and_skipped() {
        let full = Path::new("/cache/bm_1/content.html");
        let a = part_path(full);
        let b = part_path(full);
        assert_ne!(a, b);
        assert_eq!(a.parent(), full.parent());
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some(PART_EXTENSION));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writes_to_same_path() {
        let (_dir, store) = store();
        let store = std::sync::Arc::new(store);
        let path = Path::new("bm/content.html");
        store.ensure_directory(Path::new("bm")).await.unwrap();

        for round in 0..50 {
            let first = {
                let store = store.clone();
                tokio::spawn(async move { store.write(path, b"first").await })
            };
            let second = {
                let store = store.clone();
                tokio::spawn(async move { store.write(path, b"second").await })
            };
            first.await.unwrap().unwrap_or_else(|e| panic!("round {}: {}", round, e));
            second.await.unwrap().unwrap_or_else(|e| panic!("round {}: {}", round, e));

            let stored = store.read(path).await.unwrap().unwrap();
            assert!(stored == b"first" || stored == b"second");
        }
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_write_without_directory_fails() {
        let (_dir, store) = store();
        let err = store
            .write(Path::new("missing/content.html"), b"body")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let (_dir, store) = store();
        let err = store.read(Path::new("../outside")).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_list_and_remove() {
        let (dir, store) = store();
        for id in ["a", "b"] {
            store.ensure_directory(Path::new(id)).await.unwrap();
            store
                .write(&Path::new(id).join("content.html"), b"12345")
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("a/content.part"), b"partial").unwrap();

        let mut entries = store.list().await.unwrap();
        entries.sort_by(|x, y| x.path.cmp(&y.path));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("a/content.html"));
        assert_eq!(entries[0].size, 5);

        store.remove(Path::new("b/content.html")).await.unwrap();
        assert!(!dir.path().join("b").exists());
        store.remove(Path::new("b/content.html")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::new(dir.path().join("not-yet-created"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
