//! In-memory storage backend for testing.

use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_path;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`], so all trait methods
/// operate on `&self`. An optional capacity makes writes fail with
/// [`StorageFull`](ErrorKind::StorageFull) once the stored bytes would exceed
/// it, which is how the disk-full paths of the archive pipeline get tested.
///
/// # Examples
///
/// ```
/// use bindery_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("abc.jpg", b"\xFF\xD8\xFF")]).with_capacity(8);
/// assert!(backend.exists(Path::new("abc.jpg")).await?);
/// assert!(backend.write(Path::new("def.jpg"), b"too much data").await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    capacity: Option<u64>,
    storage: RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files.
    ///
    /// Panics if any path fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        Self::with_dated_files(files.into_iter().map(|(path, data)| (path, now, data)))
    }

    /// Create a mock backend pre-populated with files that have a specific
    /// modification time.
    pub fn with_dated_files(
        files: impl IntoIterator<Item = (impl Into<PathBuf>, UtcDateTime, impl Into<Vec<u8>>)>,
    ) -> Self {
        let mut map = HashMap::new();
        for (path, modified, data) in files {
            let path = path.into();
            let Ok(validated) = validate_path(&path) else {
                panic!("MockBackend::with_dated_files: invalid path {}", path.display());
            };
            map.insert(validated, (modified, data.into()));
        }
        Self { name: "mock".to_string(), capacity: None, storage: RwLock::new(map) }
    }

    /// Limit the total number of bytes the backend will hold.
    pub fn with_capacity(mut self, bytes: u64) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Number of files currently stored.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Whether the backend holds no files.
    pub async fn is_empty(&self) -> bool {
        self.storage.read().await.is_empty()
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_path(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_path(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        if let Some(capacity) = self.capacity {
            let used: u64 = guard.iter().filter(|(p, _)| **p != path).map(|(_, (_, d))| d.len() as u64).sum();
            if used + data.len() as u64 > capacity {
                exn::bail!(ErrorKind::StorageFull(path));
            }
        }
        guard.insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from = validate_path(from)?;
        let to = validate_path(to)?;
        let mut guard = self.storage.write().await;
        let entry = guard.remove(&from).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(from)))?;
        guard.insert(to, entry);
        Ok(())
    }

    async fn set_modified(&self, path: &Path, modified: UtcDateTime) -> Result<()> {
        let path = validate_path(path)?;
        let mut guard = self.storage.write().await;
        let entry = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        entry.0 = modified;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_path(path)?;
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_path(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_read() {
        let backend = MockBackend::default();
        backend.write(Path::new("abc.jpg"), b"hello").await.unwrap();
        assert_eq!(backend.read(Path::new("abc.jpg")).await.unwrap(), b"hello");
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn test_read_not_found() {
        let backend = MockBackend::default();
        let err = backend.read(Path::new("missing.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_capacity_exceeded() {
        let backend = MockBackend::with_files([("a.jpg", Vec::from(*b"12345"))]).with_capacity(8);
        backend.write(Path::new("b.jpg"), b"123").await.unwrap();
        let err = backend.write(Path::new("c.jpg"), b"1").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageFull(_)));
        assert!(!backend.exists(Path::new("c.jpg")).await.unwrap());
        // Replacing a file only counts the new size.
        backend.write(Path::new("a.jpg"), b"12345").await.unwrap();
    }

    #[tokio::test]
    async fn test_full_write_keeps_existing_file() {
        let backend = MockBackend::with_files([("a.jpg", Vec::from(*b"12345"))]).with_capacity(8);
        let err = backend.write(Path::new("a.jpg"), b"123456789").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::StorageFull(_)));
        assert_eq!(backend.read(Path::new("a.jpg")).await.unwrap(), b"12345");
    }

    #[tokio::test]
    async fn test_rename() {
        let old = UtcDateTime::from_unix_timestamp(1_000_000_000).unwrap();
        let backend = MockBackend::with_dated_files([("a.jpg", old, Vec::from(*b"new")), ("b.jpg", old, Vec::from(*b"old"))]);
        backend.rename(Path::new("a.jpg"), Path::new("b.jpg")).await.unwrap();
        assert_eq!(backend.read(Path::new("b.jpg")).await.unwrap(), b"new");
        assert_eq!(backend.stat(Path::new("b.jpg")).await.unwrap().modified, old);
        assert_eq!(backend.len().await, 1);
        let err = backend.rename(Path::new("a.jpg"), Path::new("b.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_modified() {
        let old = UtcDateTime::from_unix_timestamp(1_000_000_000).unwrap();
        let backend = MockBackend::with_dated_files([("abc.jpg", old, Vec::from(*b"data"))]);
        assert_eq!(backend.stat(Path::new("abc.jpg")).await.unwrap().modified, old);
        let new = UtcDateTime::from_unix_timestamp(1_100_000_000).unwrap();
        backend.set_modified(Path::new("abc.jpg"), new).await.unwrap();
        assert_eq!(backend.stat(Path::new("abc.jpg")).await.unwrap().modified, new);
        assert!(backend.set_modified(Path::new("missing.jpg"), new).await.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MockBackend::default();
        backend.write(Path::new("abc.jpg"), b"data").await.unwrap();
        backend.delete(Path::new("abc.jpg")).await.unwrap();
        assert!(backend.is_empty().await);
        let err = backend.delete(Path::new("abc.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let backend = MockBackend::default();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape"), b"bad").await.is_err());
    }

    #[test]
    #[should_panic(expected = "invalid path")]
    fn test_with_files_panics_on_bad_path() {
        MockBackend::with_files([("../escape", Vec::from(*b"bad"))]);
    }
}
