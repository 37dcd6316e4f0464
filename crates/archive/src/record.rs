//! Record type and encoding registry.
//!
//! An archive is a container ([`ArchiveEncoding`]) of records. Each record
//! holds one kind of content ([`RecordType`]) in one payload encoding
//! ([`RecordEncoding`]). This module knows how those three relate: which
//! container can hold which record types, what a record is called inside a
//! container, and in which order records must be imported.

use crate::error::{ErrorKind, Result};
use bindery_compress::Compression;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

/// Logical kind of content held by one record.
///
/// Variants are declared in **read order**: the order in which records must
/// be imported. Structural records come before books, because books refer
/// to bookshelves and Calibre libraries by their natural keys, which must
/// already resolve. The derived [`Ord`] is that order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    /// Provenance of the archive. Always first.
    #[serde(rename = "metadata")]
    MetaData,
    /// A record nesting several other record types (all-in-one JSON).
    #[serde(rename = "data")]
    AutoDetect,
    Styles,
    Preferences,
    Certificates,
    Bookshelves,
    CalibreLibraries,
    CalibreCustomFields,
    Books,
    #[serde(rename = "covers")]
    Cover,
    /// A raw copy of the whole catalogue database.
    Database,
}

impl RecordType {
    pub const ALL: [RecordType; 11] = [
        Self::MetaData,
        Self::AutoDetect,
        Self::Styles,
        Self::Preferences,
        Self::Certificates,
        Self::Bookshelves,
        Self::CalibreLibraries,
        Self::CalibreCustomFields,
        Self::Books,
        Self::Cover,
        Self::Database,
    ];

    /// Stable name, used for ZIP entry names and JSON keys.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MetaData => "metadata",
            Self::AutoDetect => "data",
            Self::Styles => "styles",
            Self::Preferences => "preferences",
            Self::Certificates => "certificates",
            Self::Bookshelves => "bookshelves",
            Self::CalibreLibraries => "calibre_libraries",
            Self::CalibreCustomFields => "calibre_custom_fields",
            Self::Books => "books",
            Self::Cover => "covers",
            Self::Database => "database",
        }
    }

    /// Human-readable name for messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MetaData => "archive information",
            Self::AutoDetect => "data",
            Self::CalibreLibraries => "Calibre libraries",
            Self::CalibreCustomFields => "Calibre custom fields",
            _ => self.name(),
        }
    }

    /// Work out the record held by a ZIP or TAR entry from its name.
    ///
    /// Covers live under `covers/` and keep their file name; everything else
    /// is `<record type>.<extension>` at the top level. Returns `None` for
    /// anything unrecognised.
    pub fn from_entry_name(name: &str) -> Option<(RecordType, RecordEncoding)> {
        let name = name.trim_start_matches("./");
        if let Some(file) = name.strip_prefix("covers/") {
            return match file.is_empty() || file.ends_with('/') {
                true => None,
                false => Some((Self::Cover, RecordEncoding::Binary)),
            };
        }
        let (stem, extension) = name.rsplit_once('.')?;
        let record_type: RecordType = stem.parse().ok()?;
        let encoding = match (record_type, extension) {
            (Self::Database, "db") => RecordEncoding::Binary,
            (Self::Database | Self::Cover, _) => return None,
            (_, "json") => RecordEncoding::Json,
            // Older archives carried the book list as CSV.
            (Self::Books, "csv") => RecordEncoding::Csv,
            _ => return None,
        };
        Some((record_type, encoding))
    }

    /// Name of the ZIP or TAR entry holding this record.
    ///
    /// `file_name` is only used for covers.
    pub fn entry_name(&self, encoding: RecordEncoding, file_name: &str) -> String {
        match self {
            Self::Cover => format!("covers/{file_name}"),
            _ => format!("{}.{}", self.name(), encoding.extension()),
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

impl FromStr for RecordType {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|record_type| record_type.name() == s)
            .ok_or_else(|| exn::Exn::new(ErrorKind::Configuration(format!("unknown record type \"{s}\""))))
    }
}

/// Encoding of a single record's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordEncoding {
    Json,
    Csv,
    /// Opaque bytes: cover images and database snapshots.
    Binary,
}
impl RecordEncoding {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Binary => "db",
        }
    }
}

/// Physical container format of an archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveEncoding {
    /// A single CSV document listing books.
    Csv,
    /// One ZIP entry per record.
    Zip,
    /// A single JSON document, either flat or all-in-one.
    Json,
    /// Another catalogue database. Read only.
    #[serde(rename = "sqlite")]
    SqLiteDb,
    /// Same layout as ZIP, as a (possibly compressed) TAR. Read only.
    Tar,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

impl ArchiveEncoding {
    pub const ALL: [ArchiveEncoding; 5] = [Self::Csv, Self::Zip, Self::Json, Self::SqLiteDb, Self::Tar];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Zip => "zip",
            Self::Json => "json",
            Self::SqLiteDb => "sqlite",
            Self::Tar => "tar",
        }
    }

    /// File extension used when exporting.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::SqLiteDb => "db",
            _ => self.as_str(),
        }
    }

    /// Whether archives of this encoding can be created.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Csv | Self::Zip | Self::Json)
    }

    /// Whether an exported archive of this encoding can hold the record type.
    pub fn can_write(&self, record_type: RecordType) -> bool {
        use RecordType as R;
        match self {
            Self::Csv => record_type == R::Books,
            Self::Zip => record_type != R::AutoDetect,
            Self::Json => !matches!(record_type, R::AutoDetect | R::Cover | R::Database),
            Self::SqLiteDb | Self::Tar => false,
        }
    }

    /// Whether an archive of this encoding can supply the record type.
    pub fn can_read(&self, record_type: RecordType) -> bool {
        use RecordType as R;
        match self {
            Self::Csv => record_type == R::Books,
            Self::Zip | Self::Tar => true,
            Self::Json => !matches!(record_type, R::Cover | R::Database),
            Self::SqLiteDb => !matches!(record_type, R::AutoDetect | R::Cover | R::Database),
        }
    }

    /// Check that every requested record type can be written.
    pub fn check_writable<'a>(&self, record_types: impl IntoIterator<Item = &'a RecordType>) -> Result<()> {
        if !self.is_writable() {
            exn::bail!(ErrorKind::Configuration(format!("{} archives can't be created", self.as_str())));
        }
        for record_type in record_types {
            if *record_type != RecordType::MetaData && !self.can_write(*record_type) {
                exn::bail!(ErrorKind::Configuration(format!(
                    "{} archives can't hold {}",
                    self.as_str(),
                    record_type.label()
                )));
            }
        }
        Ok(())
    }

    /// Check that at least one of the requested record types can be read.
    pub fn check_readable<'a>(&self, record_types: impl IntoIterator<Item = &'a RecordType>) -> Result<()> {
        let mut record_types = record_types.into_iter().peekable();
        if record_types.peek().is_none() {
            exn::bail!(ErrorKind::Configuration("nothing was selected for import".to_string()));
        }
        if !record_types.any(|record_type| self.can_read(*record_type)) {
            exn::bail!(ErrorKind::Configuration(format!(
                "{} archives don't contain any of the selected records",
                self.as_str()
            )));
        }
        Ok(())
    }

    /// Detect the encoding of an existing archive.
    ///
    /// The file name is tried first (ignoring a `.gz`/`.bz2` wrapper), then
    /// the first bytes of the (decompressed) content.
    pub fn detect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let inner = Compression::strip_extension(path);
        if let Some(encoding) = inner.extension().and_then(|e| e.to_str()).and_then(Self::from_extension) {
            return Ok(encoding);
        }
        let mut file = std::fs::File::open(path).or_raise(|| ErrorKind::Io)?;
        let mut head = [0u8; 4];
        let read = file.read(&mut head).or_raise(|| ErrorKind::Io)?;
        let compression = Compression::from_magic_bytes(&head[..read]);
        let file = std::fs::File::open(path).or_raise(|| ErrorKind::Io)?;
        let mut header = Vec::with_capacity(512);
        compression.wrap_reader(file).take(512).read_to_end(&mut header).or_raise(|| ErrorKind::InvalidArchive)?;
        Self::from_magic_bytes(&header).ok_or_else(|| exn::Exn::new(ErrorKind::InvalidArchive))
    }

    fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "zip" => Some(Self::Zip),
            "json" => Some(Self::Json),
            "db" | "sqlite" | "sqlite3" => Some(Self::SqLiteDb),
            "tar" => Some(Self::Tar),
            _ => None,
        }
    }

    fn from_magic_bytes(header: &[u8]) -> Option<Self> {
        if header.starts_with(ZIP_MAGIC) {
            return Some(Self::Zip);
        }
        if header.starts_with(SQLITE_MAGIC) {
            return Some(Self::SqLiteDb);
        }
        if header.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC) {
            return Some(Self::Tar);
        }
        match header.iter().find(|b| !b.is_ascii_whitespace()) {
            Some(b'{') => Some(Self::Json),
            _ => None,
        }
    }
}

impl Display for ArchiveEncoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveEncoding {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_extension(s)
            .ok_or_else(|| exn::Exn::new(ErrorKind::Configuration(format!("unknown archive format \"{s}\""))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn test_read_order() {
        let mut types = vec![RecordType::Books, RecordType::Cover, RecordType::Styles, RecordType::MetaData];
        types.sort();
        assert_eq!(types, vec![RecordType::MetaData, RecordType::Styles, RecordType::Books, RecordType::Cover]);
        assert!(RecordType::Bookshelves < RecordType::Books);
        assert!(RecordType::CalibreLibraries < RecordType::Books);
    }

    #[test]
    fn test_names_round_trip() {
        for record_type in RecordType::ALL {
            assert_eq!(record_type.name().parse::<RecordType>().unwrap(), record_type);
            let json = serde_json::to_string(&record_type).unwrap();
            assert_eq!(json, format!("\"{}\"", record_type.name()));
        }
        assert!("book".parse::<RecordType>().is_err());
    }

    #[rstest]
    #[case("metadata.json", Some((RecordType::MetaData, RecordEncoding::Json)))]
    #[case("styles.json", Some((RecordType::Styles, RecordEncoding::Json)))]
    #[case("books.json", Some((RecordType::Books, RecordEncoding::Json)))]
    #[case("books.csv", Some((RecordType::Books, RecordEncoding::Csv)))]
    #[case("./books.csv", Some((RecordType::Books, RecordEncoding::Csv)))]
    #[case("covers/abc.jpg", Some((RecordType::Cover, RecordEncoding::Binary)))]
    #[case("database.db", Some((RecordType::Database, RecordEncoding::Binary)))]
    #[case("covers/", None)]
    #[case("styles.csv", None)]
    #[case("database.json", None)]
    #[case("readme.txt", None)]
    #[case("future_things.json", None)]
    fn test_from_entry_name(#[case] name: &str, #[case] expected: Option<(RecordType, RecordEncoding)>) {
        assert_eq!(RecordType::from_entry_name(name), expected);
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(RecordType::Books.entry_name(RecordEncoding::Json, ""), "books.json");
        assert_eq!(RecordType::Cover.entry_name(RecordEncoding::Binary, "abc.jpg"), "covers/abc.jpg");
        assert_eq!(RecordType::Database.entry_name(RecordEncoding::Binary, ""), "database.db");
    }

    #[test]
    fn test_compatibility() {
        assert!(ArchiveEncoding::Csv.check_writable(&[RecordType::Books]).is_ok());
        let err = ArchiveEncoding::Csv.check_writable(&[RecordType::Books, RecordType::Styles]).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
        assert!(ArchiveEncoding::Json.check_writable(&[RecordType::Cover]).is_err());
        assert!(ArchiveEncoding::Zip.check_writable(&[RecordType::Cover, RecordType::Database]).is_ok());
        assert!(ArchiveEncoding::Tar.check_writable(&[RecordType::Books]).is_err());
        assert!(ArchiveEncoding::Csv.check_readable(&[RecordType::Styles]).is_err());
        assert!(ArchiveEncoding::Csv.check_readable(&[RecordType::Styles, RecordType::Books]).is_ok());
        assert!(ArchiveEncoding::Zip.check_readable(&[]).is_err());
    }

    #[rstest]
    #[case("backup.zip", ArchiveEncoding::Zip)]
    #[case("books.CSV", ArchiveEncoding::Csv)]
    #[case("export.json.gz", ArchiveEncoding::Json)]
    #[case("backup.tgz", ArchiveEncoding::Tar)]
    #[case("backup.tar.bz2", ArchiveEncoding::Tar)]
    #[case("catalogue.sqlite", ArchiveEncoding::SqLiteDb)]
    fn test_detect_by_extension(#[case] name: &str, #[case] expected: ArchiveEncoding) {
        // Never opened: the extension is enough.
        assert_eq!(ArchiveEncoding::detect(name).unwrap(), expected);
    }

    #[rstest]
    #[case(b"PK\x03\x04rest".to_vec(), ArchiveEncoding::Zip)]
    #[case(b"SQLite format 3\0...".to_vec(), ArchiveEncoding::SqLiteDb)]
    #[case(b"  \n{\"books\": []}".to_vec(), ArchiveEncoding::Json)]
    #[case(Compression::Gzip.compress(b"{\"bindery\": {}}").unwrap(), ArchiveEncoding::Json)]
    fn test_detect_by_content(#[case] content: Vec<u8>, #[case] expected: ArchiveEncoding) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&content).unwrap();
        assert_eq!(ArchiveEncoding::detect(file.path()).unwrap(), expected);
    }

    #[test]
    fn test_detect_tar_by_content() {
        let mut header = vec![0u8; 512];
        header[257..262].copy_from_slice(b"ustar");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&header).unwrap();
        assert_eq!(ArchiveEncoding::detect(file.path()).unwrap(), ArchiveEncoding::Tar);
    }

    #[test]
    fn test_detect_unknown() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"just some text").unwrap();
        let err = ArchiveEncoding::detect(file.path()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidArchive));
    }
}
