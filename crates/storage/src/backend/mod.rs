//! Storage backend trait and implementations.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::FileInfo;
use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;
use time::UtcDateTime;

/// Unified interface for the cover store.
///
/// All paths are relative to the storage root and are validated with
/// [`validate_path`](crate::validate_path) by every implementation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use bindery_storage::{backend::StorageBackend, error::Result};
///
/// async fn cover_size(backend: &dyn StorageBackend, uuid: &str) -> Result<u64> {
///     let [front, _back] = bindery_storage::cover_file_names(uuid);
///     if backend.exists(Path::new(&front)).await? {
///         Ok(backend.stat(Path::new(&front)).await?.size)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the backend, used for logging only.
    fn name(&self) -> &str;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, creating or replacing the file.
    ///
    /// Returns [`StorageFull`](crate::error::ErrorKind::StorageFull) when the
    /// device runs out of space. A failed write leaves any previous file of
    /// the same name as it was.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Move a file, replacing the destination if it exists.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// file does not exist.
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    /// Set the modification time of an existing file.
    ///
    /// Imported covers keep the timestamp they had in the archive so that a
    /// later "only newer" import compares like with like.
    async fn set_modified(&self, path: &Path, modified: UtcDateTime) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Get file metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
