//! Options selected by the caller for one export or import.

use crate::error::{ErrorKind, Result};
use crate::{ArchiveEncoding, RecordType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use time::UtcDateTime;

/// What to do with an incoming entity whose natural key already exists.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdatePolicy {
    /// Leave the local entity alone.
    #[default]
    Skip,
    /// Replace the local entity if the incoming one was modified more
    /// recently. Entities without a modification time are never replaced.
    OnlyNewer,
    /// Always replace the local entity.
    Overwrite,
}
impl UpdatePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Skip => "skip",
            Self::OnlyNewer => "only-newer",
            Self::Overwrite => "overwrite",
        }
    }
}
impl Display for UpdatePolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}
impl FromStr for UpdatePolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(Self::Skip),
            "only-newer" => Ok(Self::OnlyNewer),
            "overwrite" => Ok(Self::Overwrite),
            _ => exn::bail!(ErrorKind::Configuration(format!("unknown update policy \"{s}\""))),
        }
    }
}

/// Options for one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    /// Record types to write. [`MetaData`](RecordType::MetaData) is written
    /// whenever the encoding supports it, requested or not.
    pub record_types: BTreeSet<RecordType>,
    pub encoding: ArchiveEncoding,
    /// Only export books updated strictly after this time.
    pub since: Option<UtcDateTime>,
    /// Only export books updated since the last full backup. Overrides
    /// `since`.
    pub incremental: bool,
}
impl ExportOptions {
    /// Everything the encoding can hold.
    pub fn new(encoding: ArchiveEncoding) -> Self {
        let record_types = RecordType::ALL
            .into_iter()
            .filter(|t| !matches!(t, RecordType::MetaData | RecordType::AutoDetect) && encoding.can_write(*t))
            .collect();
        Self { record_types, encoding, since: None, incremental: false }
    }

    pub fn with_record_types(mut self, record_types: impl IntoIterator<Item = RecordType>) -> Self {
        self.record_types = record_types.into_iter().collect();
        self
    }

    pub fn with_since(mut self, since: UtcDateTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    pub fn contains(&self, record_type: RecordType) -> bool {
        self.record_types.contains(&record_type)
    }

    /// A complete backup of the books: not incremental, not filtered by date.
    pub fn is_full_backup(&self) -> bool {
        !self.incremental && self.since.is_none() && self.contains(RecordType::Books)
    }
}

/// Options for one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportOptions {
    /// Record types to import; anything else in the archive is skipped.
    pub record_types: BTreeSet<RecordType>,
    pub policy: UpdatePolicy,
}
impl Default for ImportOptions {
    /// Everything except the raw database, skipping existing entities.
    fn default() -> Self {
        let record_types = RecordType::ALL
            .into_iter()
            .filter(|t| !matches!(t, RecordType::MetaData | RecordType::AutoDetect | RecordType::Database))
            .collect();
        Self { record_types, policy: UpdatePolicy::default() }
    }
}
impl ImportOptions {
    pub fn with_record_types(mut self, record_types: impl IntoIterator<Item = RecordType>) -> Self {
        self.record_types = record_types.into_iter().collect();
        self
    }

    pub fn with_policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether a record of this type should be imported.
    ///
    /// Metadata and records nesting other types are always opened; the types
    /// nested inside are checked individually.
    pub fn wants(&self, record_type: RecordType) -> bool {
        matches!(record_type, RecordType::MetaData | RecordType::AutoDetect) || self.record_types.contains(&record_type)
    }
}
