//! Record readers and writers.
//!
//! One handler per (record encoding, record type) pair, found through a
//! static lookup table. A handler decodes one record into the catalogue or
//! cover store (reading), or encodes the matching entities into one or more
//! records (writing). Handlers never see the container they belong to.

mod books;
mod books_csv;
mod covers;
mod database;
mod settings;
mod structure;

use crate::context::Context;
use crate::error::{ErrorKind, Result};
use crate::progress::ProgressListener;
use crate::{ArchiveEncoding, ExportOptions, ExportResults, ImportOptions, ImportResults, RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_catalog::Repository;
use exn::Exn;
use serde_json::Value;
use time::UtcDateTime;

pub(crate) use self::books::{BookProxy, collect_books};
pub(crate) use self::covers::list_covers;
pub(crate) use self::structure::{
    BookshelfEntity, CalibreCustomFieldEntity, CalibreLibraryEntity, Entity, StyleEntity, export_entities,
};

/// Payload of a record, either still raw or already parsed.
///
/// Records from single-document containers (JSON, SQLite) arrive parsed;
/// records from multi-entry containers (ZIP, TAR, CSV) arrive as bytes.
#[derive(Debug)]
pub(crate) enum Payload {
    Bytes(Vec<u8>),
    Json(Value),
}

/// One logical record on its way into or out of a container.
#[derive(Debug)]
pub(crate) struct Record {
    pub(crate) record_type: RecordType,
    pub(crate) encoding: RecordEncoding,
    /// Entry name within the container; for covers, the file name.
    pub(crate) name: String,
    pub(crate) modified: Option<UtcDateTime>,
    pub(crate) payload: Payload,
}

impl Record {
    pub(crate) fn json(record_type: RecordType, value: Value) -> Self {
        Self {
            record_type,
            encoding: RecordEncoding::Json,
            name: record_type.name().to_string(),
            modified: None,
            payload: Payload::Json(value),
        }
    }

    pub(crate) fn bytes(record_type: RecordType, encoding: RecordEncoding, name: impl Into<String>, data: Vec<u8>) -> Self {
        Self { record_type, encoding, name: name.into(), modified: None, payload: Payload::Bytes(data) }
    }

    pub(crate) fn modified(mut self, modified: UtcDateTime) -> Self {
        self.modified = Some(modified);
        self
    }

    /// The payload as JSON, parsing it if necessary.
    ///
    /// A document that isn't JSON at all (or is nested past the parser's
    /// recursion limit) is an unreadable archive; valid JSON of the wrong
    /// shape is a decode error of this record type.
    pub(crate) fn into_json(self) -> Result<Value> {
        match self.payload {
            Payload::Json(value) => Ok(value),
            Payload::Bytes(bytes) => serde_json::from_slice(&bytes).map_err(|err| {
                let kind = match err.classify() {
                    serde_json::error::Category::Data => ErrorKind::Decode(self.record_type),
                    _ => ErrorKind::InvalidArchive,
                };
                Exn::new(err).raise(kind)
            }),
        }
    }

    pub(crate) fn into_bytes(self) -> Result<Vec<u8>> {
        match self.payload {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::Json(value) => serde_json::to_vec(&value).map_err(|err| Exn::new(err).raise(ErrorKind::Io)),
        }
    }
}

/// Decodes one record and merges its entities into the catalogue.
#[async_trait]
pub(crate) trait RecordReader: Send + Sync {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults>;
}

/// Encodes entities of one record type into the container.
#[async_trait]
pub(crate) trait RecordWriter: Send + Sync {
    /// `written` holds the results of the record types written so far.
    async fn write(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        written: &ExportResults,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults>;
}

/// An open container accepting records.
pub(crate) trait RecordSink: Send {
    fn put(&mut self, record: Record) -> Result<()>;
}

struct Handler {
    encoding: RecordEncoding,
    record_type: RecordType,
    reader: &'static dyn RecordReader,
    writer: &'static dyn RecordWriter,
}

static HANDLERS: &[Handler] = &[
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::Styles,
        reader: &structure::STYLES,
        writer: &structure::STYLES,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::Preferences,
        reader: &settings::Preferences,
        writer: &settings::Preferences,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::Certificates,
        reader: &settings::Certificates,
        writer: &settings::Certificates,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::Bookshelves,
        reader: &structure::BOOKSHELVES,
        writer: &structure::BOOKSHELVES,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::CalibreLibraries,
        reader: &structure::CALIBRE_LIBRARIES,
        writer: &structure::CALIBRE_LIBRARIES,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::CalibreCustomFields,
        reader: &structure::CALIBRE_CUSTOM_FIELDS,
        writer: &structure::CALIBRE_CUSTOM_FIELDS,
    },
    Handler {
        encoding: RecordEncoding::Json,
        record_type: RecordType::Books,
        reader: &books::JsonBooks,
        writer: &books::JsonBooks,
    },
    Handler {
        encoding: RecordEncoding::Csv,
        record_type: RecordType::Books,
        reader: &books_csv::CsvBooks,
        writer: &books_csv::CsvBooks,
    },
    Handler {
        encoding: RecordEncoding::Binary,
        record_type: RecordType::Cover,
        reader: &covers::Covers,
        writer: &covers::Covers,
    },
    Handler {
        encoding: RecordEncoding::Binary,
        record_type: RecordType::Database,
        reader: &database::DatabaseSnapshot,
        writer: &database::DatabaseSnapshot,
    },
];

fn handler(encoding: RecordEncoding, record_type: RecordType) -> Option<&'static Handler> {
    HANDLERS.iter().find(|h| h.encoding == encoding && h.record_type == record_type)
}

pub(crate) fn reader_for(encoding: RecordEncoding, record_type: RecordType) -> Option<&'static dyn RecordReader> {
    handler(encoding, record_type).map(|h| h.reader)
}

/// The writer a container of the given encoding uses for a record type.
pub(crate) fn writer_for(encoding: ArchiveEncoding, record_type: RecordType) -> Option<&'static dyn RecordWriter> {
    if !encoding.can_write(record_type) {
        return None;
    }
    let record_encoding = match (encoding, record_type) {
        (ArchiveEncoding::Csv, _) => RecordEncoding::Csv,
        (_, RecordType::Cover | RecordType::Database) => RecordEncoding::Binary,
        _ => RecordEncoding::Json,
    };
    handler(record_encoding, record_type).map(|h| h.writer)
}

/// Split a record nesting several record types into one record per type.
///
/// Keys that aren't record types, and record types that can't be nested
/// (metadata, another nesting record), are skipped.
pub(crate) fn expand(record: Record) -> Result<Vec<Record>> {
    let Value::Object(map) = record.into_json()? else {
        exn::bail!(ErrorKind::Decode(RecordType::AutoDetect));
    };
    let mut records = Vec::with_capacity(map.len());
    for (key, value) in map {
        match key.parse::<RecordType>() {
            Ok(RecordType::MetaData | RecordType::AutoDetect) | Err(_) => tracing::debug!(%key, "Skipping unknown nested record"),
            Ok(record_type) => records.push(Record::json(record_type, value)),
        }
    }
    Ok(records)
}

/// Encode everything of one record type held by a catalogue as JSON.
///
/// Used to read another catalogue database as if it were an archive.
pub(crate) async fn encode_json(catalog: &Repository, record_type: RecordType) -> Result<Option<Value>> {
    let value = match record_type {
        RecordType::Styles => export_entities::<StyleEntity>(catalog).await?.0,
        RecordType::Bookshelves => export_entities::<BookshelfEntity>(catalog).await?.0,
        RecordType::CalibreLibraries => export_entities::<CalibreLibraryEntity>(catalog).await?.0,
        RecordType::CalibreCustomFields => export_entities::<CalibreCustomFieldEntity>(catalog).await?.0,
        RecordType::Preferences => settings::export_preferences(catalog).await?.0,
        RecordType::Certificates => settings::export_certificates(catalog).await?.0,
        RecordType::Books => books::export_all_books(catalog).await?,
        _ => return Ok(None),
    };
    Ok(Some(value))
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_every_handler_is_registered_once() {
        for handler in HANDLERS {
            let matching = HANDLERS.iter().filter(|h| h.encoding == handler.encoding && h.record_type == handler.record_type);
            assert_eq!(matching.count(), 1, "{:?} {}", handler.encoding, handler.record_type);
        }
        assert!(reader_for(RecordEncoding::Csv, RecordType::Styles).is_none());
        assert!(reader_for(RecordEncoding::Json, RecordType::Cover).is_none());
    }

    #[test]
    fn test_writer_for_follows_compatibility() {
        assert!(writer_for(ArchiveEncoding::Csv, RecordType::Books).is_some());
        assert!(writer_for(ArchiveEncoding::Csv, RecordType::Styles).is_none());
        assert!(writer_for(ArchiveEncoding::Json, RecordType::Cover).is_none());
        assert!(writer_for(ArchiveEncoding::Zip, RecordType::Cover).is_some());
        assert!(writer_for(ArchiveEncoding::Zip, RecordType::Database).is_some());
        assert!(writer_for(ArchiveEncoding::Tar, RecordType::Books).is_none());
    }

    #[test]
    fn test_expand_skips_unknown_keys() {
        let record = Record::json(
            RecordType::AutoDetect,
            json!({"books": [], "styles": [], "holograms": [1, 2], "metadata": {}, "data": {}}),
        );
        let mut types: Vec<RecordType> = expand(record).unwrap().into_iter().map(|r| r.record_type).collect();
        types.sort();
        assert_eq!(types, vec![RecordType::Styles, RecordType::Books]);
    }

    #[test]
    fn test_into_json_classifies_failures() {
        let garbage = Record::bytes(RecordType::Styles, RecordEncoding::Json, "styles.json", b"{not json".to_vec());
        assert!(matches!(&*garbage.into_json().unwrap_err(), ErrorKind::InvalidArchive));
        let nested = format!("{}{}", "[".repeat(500), "]".repeat(500));
        let deep = Record::bytes(RecordType::Books, RecordEncoding::Json, "books.json", nested.into_bytes());
        assert!(matches!(&*deep.into_json().unwrap_err(), ErrorKind::InvalidArchive));
    }

    #[test]
    fn test_expand_requires_an_object() {
        let err = expand(Record::json(RecordType::AutoDetect, json!([1]))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode(RecordType::AutoDetect)));
    }
}
