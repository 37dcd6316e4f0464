//! Archive Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Lower level errors (SQLite, filesystem, ZIP, CSV) stay
//! in the tree as children; the [`ErrorKind`] on top says what the caller can
//! do about it.

use crate::RecordType;
use derive_more::{Display, Error};
use exn::Exn;
use std::io::Error as IoError;

/// An archive error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// Failures of a single book or cover are not errors at this level; they are
/// recorded in the [`ImportResults`](crate::ImportResults) and the operation
/// carries on.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The requested options can't work together. Raised before any I/O.
    #[display("invalid options: {_0}")]
    Configuration(#[error(not(source))] String),
    /// A record payload could not be decoded.
    #[display("could not decode {_0} record")]
    Decode(#[error(not(source))] RecordType),
    /// The container itself is unreadable: not the format it claims to be,
    /// truncated, or nested too deeply to parse.
    #[display("invalid or unsupported archive")]
    InvalidArchive,
    /// The archive was written by a newer version of the format.
    #[display("archive format version {_0} is not supported")]
    UnsupportedVersion(#[error(not(source))] u32),
    /// The disk is full. Aborts the whole operation.
    #[display("no space left on device")]
    StorageFull,
    #[display("I/O error")]
    Io,
    #[display("catalogue error")]
    Catalog,
    #[display("cover storage error")]
    Covers,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io | Self::Catalog | Self::Covers)
    }

    /// A sentence suitable for showing to the person who picked the file.
    pub fn user_message(&self) -> String {
        match self {
            Self::Configuration(reason) => format!("These export or import options can't be used together: {reason}."),
            Self::Decode(record_type) => format!("The {} in this file could not be read.", record_type.label()),
            Self::UnsupportedVersion(_) => {
                "This file was created by a newer version of the application. Please update and try again.".to_string()
            },
            Self::StorageFull => "There is not enough free space on the device.".to_string(),
            Self::InvalidArchive | Self::Io | Self::Catalog | Self::Covers => "This file is not supported.".to_string(),
        }
    }

    /// Classify an I/O error.
    pub(crate) fn from_io(err: &IoError) -> Self {
        match bindery_storage::error::is_storage_full(err) {
            true => Self::StorageFull,
            false => Self::Io,
        }
    }
}

/// Raise lower level errors with their [`ErrorKind`] classification, keeping
/// the original error as the child frame.
///
/// Every write path goes through this so that a full disk is always noticed.
pub(crate) trait ClassifyExt<T> {
    fn or_classify(self) -> Result<T>;
}
impl<T> ClassifyExt<T> for std::result::Result<T, IoError> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        self.map_err(|err| {
            let kind = ErrorKind::from_io(&err);
            Exn::new(err).raise(kind)
        })
    }
}
impl<T> ClassifyExt<T> for std::result::Result<T, zip::result::ZipError> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        self.map_err(|err| {
            let kind = match &err {
                zip::result::ZipError::Io(io) => ErrorKind::from_io(io),
                _ => ErrorKind::InvalidArchive,
            };
            Exn::new(err).raise(kind)
        })
    }
}
impl<T> ClassifyExt<T> for std::result::Result<T, csv::Error> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        self.map_err(|err| {
            let kind = match err.kind() {
                csv::ErrorKind::Io(io) => ErrorKind::from_io(io),
                _ => ErrorKind::InvalidArchive,
            };
            Exn::new(err).raise(kind)
        })
    }
}
impl<T> ClassifyExt<T> for bindery_catalog::error::Result<T> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        self.map_err(|err| {
            let kind = match &*err {
                bindery_catalog::error::ErrorKind::StorageFull => ErrorKind::StorageFull,
                _ => ErrorKind::Catalog,
            };
            err.raise(kind)
        })
    }
}
impl<T> ClassifyExt<T> for bindery_storage::error::Result<T> {
    #[track_caller]
    fn or_classify(self) -> Result<T> {
        self.map_err(|err| {
            let kind = match &*err {
                bindery_storage::error::ErrorKind::StorageFull(_) => ErrorKind::StorageFull,
                _ => ErrorKind::Covers,
            };
            err.raise(kind)
        })
    }
}
