//! Local filesystem storage backend.

use crate::error::ErrorKind;
use crate::{FileInfo, StorageBackend, error::Result, path::validate as validate_path};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use time::UtcDateTime;
use tokio::fs;

/// Local filesystem storage backend.
///
/// Stores covers in a directory on the local filesystem. All paths are
/// relative to the configured root directory.
///
/// # Examples
///
/// ```no_run
/// use bindery_storage::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("covers", "/var/lib/bindery/covers")?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory for the covers
    root: PathBuf,
}
impl LocalBackend {
    /// Create a new local filesystem backend, creating the root directory if
    /// it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists and is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Non-async: it happens once at startup and isn't worth an async constructor.
            sync_create_dir(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        }
        Ok(Self { name: name.into(), root })
    }

    /// Validates the path and joins it with the root directory.
    fn absolute_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let validated = validate_path(path.as_ref())?;
        Ok(self.root.join(validated))
    }
}

/// `covers/abc.jpg` is staged as `covers/.abc.jpg.part`.
fn staging_path(abs_path: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    name.push(abs_path.file_name().unwrap_or_default());
    name.push(".part");
    abs_path.with_file_name(name)
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::try_exists(&abs_path).await.map_err(ErrorKind::Io)?)
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::read(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, path))?;
        }
        // Written next to the target and moved over it, so a failed write
        // never truncates the file already there.
        let staged = staging_path(&abs_path);
        if let Err(e) = fs::write(&staged, data).await {
            _ = fs::remove_file(&staged).await;
            exn::bail!(ErrorKind::from_io(e, path));
        }
        if let Err(e) = fs::rename(&staged, &abs_path).await {
            _ = fs::remove_file(&staged).await;
            exn::bail!(ErrorKind::from_io(e, path));
        }
        tracing::trace!(backend = %self.name, path = %path.display(), size = data.len(), "wrote file");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| ErrorKind::from_io(e, to))?;
        }
        Ok(fs::rename(&from_path, &to_path).await.map_err(|e| ErrorKind::from_io(e, from))?)
    }

    async fn set_modified(&self, path: &Path, modified: UtcDateTime) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::OpenOptions::new().write(true).open(&abs_path)?;
            file.set_modified(SystemTime::from(modified))
        })
        .await
        .or_raise(|| ErrorKind::BackendError("blocking task failed".to_string()))?
        .map_err(|e| ErrorKind::from_io(e, &owned))?;
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let abs_path = self.absolute_path(path)?;
        Ok(fs::remove_file(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?)
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let abs_path = self.absolute_path(path)?;
        let metadata = fs::metadata(&abs_path).await.map_err(|e| ErrorKind::from_io(e, path))?;
        if !metadata.is_file() {
            exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
        }
        let modified = metadata.modified().map_err(ErrorKind::Io)?;
        Ok(FileInfo::new(path, metadata.len(), modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_requires_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(LocalBackend::new("covers", temp_dir.path()).is_ok());
        assert!(LocalBackend::new("covers", "relative/path").is_err());
        assert!(LocalBackend::new("covers", "./relative").is_err());
    }

    #[test]
    fn test_new_creates_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path().join("nested/covers");
        LocalBackend::new("covers", &root).unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn test_absolute_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        let expected = temp_dir.path().join("abc.jpg");
        assert_eq!(backend.absolute_path(Path::new("abc.jpg")).unwrap(), expected);
        assert!(backend.absolute_path(Path::new("../etc/passwd")).is_err());
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("abc.jpg"), b"\xFF\xD8\xFF").await.unwrap();
        assert!(backend.exists(Path::new("abc.jpg")).await.unwrap());
        assert_eq!(backend.read(Path::new("abc.jpg")).await.unwrap(), b"\xFF\xD8\xFF");
    }

    #[tokio::test]
    async fn test_replace_leaves_no_staged_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("abc.jpg"), b"first").await.unwrap();
        backend.write(Path::new("abc.jpg"), b"second").await.unwrap();
        assert_eq!(backend.read(Path::new("abc.jpg")).await.unwrap(), b"second");
        let names: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names, vec![std::ffi::OsString::from("abc.jpg")]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_existing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("abc.jpg"), b"kept").await.unwrap();
        // A directory in the staging file's place makes the write fail.
        std::fs::create_dir(temp_dir.path().join(".abc.jpg.part")).unwrap();
        assert!(backend.write(Path::new("abc.jpg"), b"lost").await.is_err());
        assert_eq!(backend.read(Path::new("abc.jpg")).await.unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_rename_replaces_destination() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("new.jpg"), b"new").await.unwrap();
        backend.write(Path::new("abc.jpg"), b"old").await.unwrap();
        backend.rename(Path::new("new.jpg"), Path::new("abc.jpg")).await.unwrap();
        assert_eq!(backend.read(Path::new("abc.jpg")).await.unwrap(), b"new");
        assert!(!backend.exists(Path::new("new.jpg")).await.unwrap());
        let err = backend.rename(Path::new("new.jpg"), Path::new("abc.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_modified_and_stat() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("abc.jpg"), b"12345").await.unwrap();
        let modified = UtcDateTime::from_unix_timestamp(1_600_000_000).unwrap();
        backend.set_modified(Path::new("abc.jpg"), modified).await.unwrap();
        let info = backend.stat(Path::new("abc.jpg")).await.unwrap();
        assert_eq!(info.path, PathBuf::from("abc.jpg"));
        assert_eq!(info.size, 5);
        assert_eq!(info.modified, modified);
    }

    #[tokio::test]
    async fn test_delete() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        backend.write(Path::new("abc.jpg"), b"data").await.unwrap();
        backend.delete(Path::new("abc.jpg")).await.unwrap();
        assert!(!backend.exists(Path::new("abc.jpg")).await.unwrap());
        let err = backend.delete(Path::new("abc.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stat_missing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        let err = backend.stat(Path::new("missing.jpg")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_security() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new("covers", temp_dir.path()).unwrap();
        assert!(backend.read(Path::new("../etc/passwd")).await.is_err());
        assert!(backend.write(Path::new("../escape.jpg"), b"data").await.is_err());
        assert!(backend.delete(Path::new("../../file")).await.is_err());
    }
}
