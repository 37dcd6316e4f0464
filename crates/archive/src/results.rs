//! Accumulated outcome of an export or import.
//!
//! Each record writer/reader returns its own results, which the container
//! loop folds together with `merge`. Nothing is shared or mutated across
//! record boundaries.

use crate::RecordType;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// What happened to the entities of one record type during an import.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Entities seen, whatever became of them.
    pub processed: u64,
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}
impl Counter {
    pub fn merge(self, other: Self) -> Self {
        Self {
            processed: self.processed + other.processed,
            created: self.created + other.created,
            updated: self.updated + other.updated,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.processed == 0
    }
}
impl Display for Counter {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} processed, {} created, {} updated, {} skipped, {} failed",
            self.processed, self.created, self.updated, self.skipped, self.failed
        )
    }
}

/// A single book or cover that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFailure {
    pub record_type: RecordType,
    /// 1-based position of the entity within its record. For CSV this is the
    /// data row, not counting the header.
    pub row: u64,
    /// Book UUID or cover file name, when it could be read.
    pub key: Option<String>,
    pub reason: String,
}
impl Display for RowFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{} row {}", self.record_type, self.row)?;
        if let Some(key) = &self.key {
            write!(f, " ({key})")?;
        }
        write!(f, ": {}", self.reason)
    }
}

/// Outcome of an import.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportResults {
    pub books: Counter,
    pub covers: Counter,
    /// Styles, preferences, certificates, bookshelves and Calibre mappings.
    pub structural: BTreeMap<RecordType, Counter>,
    pub failures: Vec<RowFailure>,
    /// A database snapshot inside the archive was imported.
    pub database: bool,
    /// The import stopped early because it was cancelled.
    pub cancelled: bool,
}
impl ImportResults {
    pub fn merge(mut self, other: Self) -> Self {
        for (record_type, counter) in other.structural {
            let merged = self.structural.get(&record_type).copied().unwrap_or_default().merge(counter);
            self.structural.insert(record_type, merged);
        }
        self.failures.extend(other.failures);
        Self {
            books: self.books.merge(other.books),
            covers: self.covers.merge(other.covers),
            structural: self.structural,
            failures: self.failures,
            database: self.database || other.database,
            cancelled: self.cancelled || other.cancelled,
        }
    }

    /// Counter for a structural record type (zero if nothing was imported).
    pub fn structural(&self, record_type: RecordType) -> Counter {
        self.structural.get(&record_type).copied().unwrap_or_default()
    }

    pub(crate) fn with_structural(record_type: RecordType, counter: Counter) -> Self {
        Self { structural: BTreeMap::from([(record_type, counter)]), ..Self::default() }
    }
}
impl Display for ImportResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "books: {}", self.books)?;
        writeln!(f, "covers: {}", self.covers)?;
        for (record_type, counter) in self.structural.iter().filter(|(_, c)| !c.is_empty()) {
            writeln!(f, "{}: {counter}", record_type.label())?;
        }
        if self.database {
            writeln!(f, "database: imported")?;
        }
        for failure in &self.failures {
            writeln!(f, "failed: {failure}")?;
        }
        if self.cancelled {
            writeln!(f, "cancelled before completion")?;
        }
        Ok(())
    }
}

/// Outcome of an export.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportResults {
    /// Local ids of the books written.
    pub book_ids: Vec<i64>,
    /// Cover files belonging to the exported books, as found while writing
    /// them. Exactly these covers are exported.
    pub cover_files: Vec<String>,
    pub covers_exported: u64,
    /// Covers listed in `cover_files` that had gone by the time they were
    /// copied.
    pub covers_missing: u64,
    pub styles: u64,
    pub bookshelves: u64,
    pub preferences: u64,
    pub certificates: u64,
    pub calibre_libraries: u64,
    pub calibre_custom_fields: u64,
    /// A snapshot of the database was included.
    pub database: bool,
    /// The export stopped early because it was cancelled.
    pub cancelled: bool,
}
impl ExportResults {
    pub fn books_exported(&self) -> u64 {
        self.book_ids.len() as u64
    }

    pub fn merge(mut self, other: Self) -> Self {
        self.book_ids.extend(other.book_ids);
        self.cover_files.extend(other.cover_files);
        Self {
            book_ids: self.book_ids,
            cover_files: self.cover_files,
            covers_exported: self.covers_exported + other.covers_exported,
            covers_missing: self.covers_missing + other.covers_missing,
            styles: self.styles + other.styles,
            bookshelves: self.bookshelves + other.bookshelves,
            preferences: self.preferences + other.preferences,
            certificates: self.certificates + other.certificates,
            calibre_libraries: self.calibre_libraries + other.calibre_libraries,
            calibre_custom_fields: self.calibre_custom_fields + other.calibre_custom_fields,
            database: self.database || other.database,
            cancelled: self.cancelled || other.cancelled,
        }
    }

    pub(crate) fn with_structural(record_type: RecordType, count: u64) -> Self {
        let mut results = Self::default();
        match record_type {
            RecordType::Styles => results.styles = count,
            RecordType::Bookshelves => results.bookshelves = count,
            RecordType::Preferences => results.preferences = count,
            RecordType::Certificates => results.certificates = count,
            RecordType::CalibreLibraries => results.calibre_libraries = count,
            RecordType::CalibreCustomFields => results.calibre_custom_fields = count,
            _ => {},
        }
        results
    }
}
impl Display for ExportResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        writeln!(f, "books: {}", self.books_exported())?;
        writeln!(f, "covers: {} ({} missing)", self.covers_exported, self.covers_missing)?;
        for (label, count) in [
            ("styles", self.styles),
            ("bookshelves", self.bookshelves),
            ("preferences", self.preferences),
            ("certificates", self.certificates),
            ("Calibre libraries", self.calibre_libraries),
            ("Calibre custom fields", self.calibre_custom_fields),
        ] {
            if count > 0 {
                writeln!(f, "{label}: {count}")?;
            }
        }
        if self.database {
            writeln!(f, "database: included")?;
        }
        if self.cancelled {
            writeln!(f, "cancelled before completion")?;
        }
        Ok(())
    }
}
