use crate::error::{ErrorKind, Result};
use crate::timestamp;
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

/// Version of the archive layout written by this crate.
///
/// Bumped whenever a change would make older readers misinterpret an
/// archive. Readers accept this version and anything older.
pub const ARCHIVE_VERSION: u32 = 1;

/// Provenance of an archive, stored as its first record.
///
/// Lets an importer decide things before touching the bulk records: whether
/// the archive is too new to understand, and how many books to expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetaData {
    #[serde(rename = "version")]
    pub archive_version: u32,
    /// Version of the application that wrote the archive.
    #[serde(default)]
    pub app_version: String,
    #[serde(with = "timestamp")]
    pub created_at: UtcDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_count: Option<u64>,
}

impl ArchiveMetaData {
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            archive_version: ARCHIVE_VERSION,
            app_version: app_version.into(),
            created_at: UtcDateTime::now().truncate_to_second(),
            book_count: None,
            cover_count: None,
        }
    }

    /// Reject archives written by a newer version of the format.
    pub fn check_version(&self) -> Result<()> {
        if self.archive_version > ARCHIVE_VERSION {
            exn::bail!(ErrorKind::UnsupportedVersion(self.archive_version));
        }
        Ok(())
    }
}
