//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::{Path, PathBuf};

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `ENOSPC` on every platform this runs on.
const ENOSPC: i32 = 28;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File does not exist
    #[display("file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// The device holding the storage root has no space left. Nothing else
    /// written in the same run is going to succeed either.
    #[display("no space left on device while writing {}", _0.display())]
    StorageFull(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Classify an I/O error raised while operating on `path`.
    pub fn from_io(err: IoError, path: &Path) -> Self {
        if is_storage_full(&err) {
            return ErrorKind::StorageFull(path.to_path_buf());
        }
        match err.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied(path.to_path_buf()),
            _ => ErrorKind::Io(err),
        }
    }

    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::BackendError(_))
    }
}

/// Whether an I/O error means the disk is full.
///
/// Older toolchains surface `ENOSPC` as an uncategorized error, so the raw OS
/// code is checked as well as the error kind.
pub fn is_storage_full(err: &IoError) -> bool {
    err.kind() == std::io::ErrorKind::StorageFull || err.raw_os_error() == Some(ENOSPC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind as IoKind;

    #[test]
    fn test_from_io_classifies_disk_full() {
        let path = Path::new("cover.jpg");
        let kind = ErrorKind::from_io(IoError::from(IoKind::StorageFull), path);
        assert!(matches!(kind, ErrorKind::StorageFull(_)));
        let kind = ErrorKind::from_io(IoError::from_raw_os_error(ENOSPC), path);
        assert!(matches!(kind, ErrorKind::StorageFull(_)));
        assert!(!kind.is_retryable());
    }

    #[test]
    fn test_from_io_other_kinds() {
        let path = Path::new("cover.jpg");
        assert!(matches!(ErrorKind::from_io(IoError::from(IoKind::NotFound), path), ErrorKind::NotFound(_)));
        assert!(matches!(
            ErrorKind::from_io(IoError::from(IoKind::PermissionDenied), path),
            ErrorKind::PermissionDenied(_)
        ));
        let kind = ErrorKind::from_io(IoError::from(IoKind::Interrupted), path);
        assert!(matches!(kind, ErrorKind::Io(_)));
        assert!(kind.is_retryable());
    }
}
