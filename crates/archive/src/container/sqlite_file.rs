//! Another catalogue database, read as if it were an archive.

use super::{Entry, RecordSource};
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::records::{Record, encode_json};
use crate::{ArchiveMetaData, RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_catalog::{Database, Repository};
use exn::ResultExt;
use std::path::Path;

/// Everything a catalogue database can supply, in read order.
const OFFERED: [RecordType; 8] = [
    RecordType::MetaData,
    RecordType::Styles,
    RecordType::Preferences,
    RecordType::Certificates,
    RecordType::Bookshelves,
    RecordType::CalibreLibraries,
    RecordType::CalibreCustomFields,
    RecordType::Books,
];

pub(crate) struct SqliteSource {
    database: Database,
    catalog: Repository,
    book_count: u64,
    entries: Vec<Entry>,
}

impl SqliteSource {
    /// Open the file read only. Fails with
    /// [`InvalidArchive`](ErrorKind::InvalidArchive) if it isn't a catalogue.
    pub(crate) async fn open(path: &Path) -> Result<Self> {
        let database = Database::connect_read_only(path).await.or_raise(|| ErrorKind::InvalidArchive)?;
        let catalog = Repository::from(&database);
        let book_count = match catalog.count_books(None).await {
            Ok(count) => count,
            Err(err) => {
                database.close().await;
                return Err(err.raise(ErrorKind::InvalidArchive));
            },
        };
        let entries = OFFERED
            .into_iter()
            .enumerate()
            .map(|(index, record_type)| Entry {
                record_type,
                encoding: RecordEncoding::Json,
                name: record_type.name().to_string(),
                modified: None,
                index,
            })
            .collect();
        tracing::debug!(path = %path.display(), book_count, "Opened catalogue database");
        Ok(Self { database, catalog, book_count, entries })
    }
}

#[async_trait]
impl RecordSource for SqliteSource {
    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn load(&mut self, entry: &Entry) -> Result<Record> {
        if entry.record_type == RecordType::MetaData {
            let mut metadata = ArchiveMetaData::new(String::new());
            metadata.book_count = Some(self.book_count);
            let value = serde_json::to_value(metadata).or_raise(|| ErrorKind::Decode(RecordType::MetaData))?;
            return Ok(Record::json(RecordType::MetaData, value));
        }
        let value = encode_json(&self.catalog, entry.record_type)
            .await
            .map_err(|err| match &*err {
                ErrorKind::Catalog => err.raise(ErrorKind::InvalidArchive),
                _ => err,
            })?
            .ok_or_else(|| exn::Exn::new(ErrorKind::Decode(entry.record_type)))?;
        Ok(Record::json(entry.record_type, value))
    }

    async fn close(&mut self) {
        self.database.close().await;
    }
}
