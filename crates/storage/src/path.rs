//! Path validation.
//!
//! Cover paths arrive from archives written by other installs (or other
//! people), so nothing read from an archive is trusted to stay inside the
//! covers directory.

use std::path::{Component, Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// Validates a storage path, ensuring it doesn't escape the storage root
/// (no `..` traversal). Returns the normalized path.
///
/// > **Note:** Null bytes are rejected. Backslashes and non-UTF8 bytes are
/// >           left alone.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use bindery_storage::validate_path;
/// assert!(validate_path("3f2a.jpg").is_ok());
/// assert!(validate_path("thumbs/3f2a.jpg").is_ok());
/// assert!(validate_path("thumbs/../3f2a.jpg").is_ok()); // (never leaves the root)
/// assert!(validate_path("../3f2a.jpg").is_err());
/// assert!(validate_path("a\0b").is_err());
/// assert_eq!(validate_path("./thumbs//3f2a.jpg").unwrap(), Path::new("thumbs/3f2a.jpg"));
/// ```
pub fn validate(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(s) => {
                // Null bytes survive Path::components() on Unix but truncate
                // in C-based syscalls.
                if s.as_encoded_bytes().contains(&0) {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
                components.push(s)
            },
            Component::CurDir | Component::RootDir => {},
            Component::Prefix(_) => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
            Component::ParentDir => {
                if components.pop().is_none() {
                    exn::bail!(ErrorKind::InvalidPath(path.to_path_buf()));
                }
            },
        }
    }
    match components.is_empty() {
        true => exn::bail!(ErrorKind::InvalidPath(path.to_path_buf())),
        false => Ok(components.into_iter().collect()),
    }
}

/// Reduce an archive entry name to a bare file name in the storage root.
///
/// Directory components are dropped (`covers/3f2a.jpg` becomes `3f2a.jpg`),
/// then the remaining name is validated. Entry names ending in a separator
/// or made only of dots are rejected.
///
/// ```
/// use std::path::Path;
/// use bindery_storage::validate_file_name;
/// assert_eq!(validate_file_name("covers/3f2a.jpg").unwrap(), Path::new("3f2a.jpg"));
/// assert_eq!(validate_file_name("../../etc/3f2a.jpg").unwrap(), Path::new("3f2a.jpg"));
/// assert!(validate_file_name("covers/").is_err());
/// assert!(validate_file_name("..").is_err());
/// ```
pub fn validate_file_name(entry: &str) -> Result<PathBuf> {
    if entry.ends_with('/') || entry.ends_with('\\') {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(entry)));
    }
    let name = entry.rsplit(['/', '\\']).next().unwrap_or(entry);
    if name.chars().all(|c| c == '.') {
        exn::bail!(ErrorKind::InvalidPath(PathBuf::from(entry)));
    }
    validate(name)
}
