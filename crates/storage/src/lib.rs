//! Cover image storage.
//!
//! Book covers live outside the catalogue database, as plain files named
//! after the book's UUID (`<uuid>.jpg` for the front cover, `<uuid>_1.jpg`
//! for the back). The archive pipeline reads and writes them through the
//! [`StorageBackend`] trait so that tests can swap the filesystem for an
//! in-memory store that runs out of space on demand.

pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::StorageBackend;
pub use crate::models::FileInfo;
pub use crate::path::{validate as validate_path, validate_file_name};
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;

/// File names of the covers belonging to a book, front cover first.
///
/// ```
/// let [front, back] = bindery_storage::cover_file_names("0b9f3a4e-1d2c-4c1a-9f7e-2d5b8c3a1e00");
/// assert_eq!(front, "0b9f3a4e-1d2c-4c1a-9f7e-2d5b8c3a1e00.jpg");
/// assert_eq!(back, "0b9f3a4e-1d2c-4c1a-9f7e-2d5b8c3a1e00_1.jpg");
/// ```
pub fn cover_file_names(book_uuid: &str) -> [String; 2] {
    [format!("{book_uuid}.jpg"), format!("{book_uuid}_1.jpg")]
}
