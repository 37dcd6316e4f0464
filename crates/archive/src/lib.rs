//! Backup, export and import archives for the bindery catalogue.
//!
//! An [`ExportHelper`] writes the catalogue (books, covers, bookshelves,
//! styles, preferences, certificates, Calibre mappings and optionally a raw
//! database snapshot) into a CSV, ZIP or JSON archive. An [`ImportHelper`]
//! merges any of those, a TAR archive or another catalogue database back
//! into the live catalogue, resolving conflicts with an [`UpdatePolicy`].
//!
//! Failures of individual books and covers are recorded in the
//! [`ImportResults`] and the import carries on; a full disk aborts the whole
//! operation.

mod container;
mod context;
pub mod error;
mod helper;
mod metadata;
mod options;
mod progress;
mod record;
mod records;
mod results;
mod timestamp;
mod upsert;

pub use crate::container::{ArchiveReader, ArchiveWriter};
pub use crate::context::Context;
pub use crate::helper::{ExportHelper, ImportHelper};
pub use crate::metadata::{ARCHIVE_VERSION, ArchiveMetaData};
pub use crate::options::{ExportOptions, ImportOptions, UpdatePolicy};
pub use crate::progress::{NoProgress, ProgressListener};
pub use crate::record::{ArchiveEncoding, RecordEncoding, RecordType};
pub use crate::results::{Counter, ExportResults, ImportResults, RowFailure};
pub use bindery_compress::Compression;
