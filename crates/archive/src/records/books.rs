//! Books as JSON, and the import loop shared with the CSV encoding.

use super::covers::existing_covers;
use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::{ProgressListener, Throttle, provision};
use crate::results::{Counter, ImportResults, RowFailure};
use crate::timestamp;
use crate::upsert::{Decision, decide};
use crate::{ExportOptions, ExportResults, ImportOptions, RecordType, UpdatePolicy};
use async_trait::async_trait;
use bindery_catalog::{Author, Book, CalibreLink, Repository, Series};
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use time::UtcDateTime;

/// A book as it appears in an archive.
///
/// No local id: books are identified by UUID alone. Unknown fields (such as
/// an `id` written by older versions) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BookProxy {
    #[serde(default)]
    pub(crate) uuid: String,
    pub(crate) title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) authors: Vec<Author>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) publishers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) bookshelves: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) rating: Option<f64>,
    #[serde(default)]
    pub(crate) read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) calibre: Option<CalibreProxy>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub(crate) date_added: Option<UtcDateTime>,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    pub(crate) last_updated: Option<UtcDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CalibreProxy {
    pub(crate) library_uuid: String,
    pub(crate) book_id: i64,
    pub(crate) book_uuid: String,
}

impl From<&Book> for BookProxy {
    fn from(book: &Book) -> Self {
        Self {
            uuid: book.uuid.clone(),
            title: book.title.clone(),
            isbn: book.isbn.clone(),
            authors: book.authors.clone(),
            series: book.series.clone(),
            publishers: book.publishers.clone(),
            bookshelves: book.bookshelves.clone(),
            description: book.description.clone(),
            page_count: book.page_count,
            language: book.language.clone(),
            rating: book.rating,
            read: book.read,
            notes: book.notes.clone(),
            calibre: book.calibre.as_ref().map(|link| CalibreProxy {
                library_uuid: link.library_uuid.clone(),
                book_id: link.book_id,
                book_uuid: link.book_uuid.clone(),
            }),
            date_added: Some(book.date_added),
            last_updated: Some(book.last_updated),
        }
    }
}

impl BookProxy {
    pub(crate) fn into_incoming(self) -> std::result::Result<IncomingBook, RowError> {
        let uuid = self.uuid.trim().to_string();
        if uuid.is_empty() {
            return Err(RowError::new(None, "missing UUID"));
        }
        let timestamped = self.last_updated.is_some();
        let last_updated = self.last_updated.unwrap_or_else(UtcDateTime::now).truncate_to_second();
        let date_added = self.date_added.map_or(last_updated, UtcDateTime::truncate_to_second);
        let book = Book {
            id: None,
            uuid,
            title: self.title,
            isbn: self.isbn,
            authors: self.authors,
            series: self.series,
            publishers: self.publishers,
            bookshelves: self.bookshelves,
            description: self.description,
            page_count: self.page_count,
            language: self.language,
            rating: self.rating,
            read: self.read,
            notes: self.notes,
            calibre: self.calibre.map(|link| CalibreLink {
                library_uuid: link.library_uuid,
                book_id: link.book_id,
                book_uuid: link.book_uuid,
            }),
            date_added,
            last_updated,
        };
        Ok(IncomingBook { book, timestamped })
    }
}

/// A decoded book about to be merged into the catalogue.
#[derive(Debug)]
pub(crate) struct IncomingBook {
    pub(crate) book: Book,
    /// The archive said when the book was last updated. Books without that
    /// are never considered newer than the local copy.
    pub(crate) timestamped: bool,
}

/// Why one row could not be decoded.
#[derive(Debug)]
pub(crate) struct RowError {
    pub(crate) key: Option<String>,
    pub(crate) reason: String,
}
impl RowError {
    pub(crate) fn new(key: Option<String>, reason: impl Into<String>) -> Self {
        Self { key, reason: reason.into() }
    }
}

/// Merges decoded books into the catalogue one at a time.
///
/// Each book is committed on its own. A book that can't be decoded or saved
/// is recorded as a failure and the next one is tried; only a full disk
/// stops the loop.
pub(crate) struct BookImporter<'a> {
    ctx: &'a Context,
    policy: UpdatePolicy,
    progress: &'a dyn ProgressListener,
    throttle: Throttle,
    libraries: HashSet<String>,
    row: u64,
    results: ImportResults,
}

impl<'a> BookImporter<'a> {
    /// `rows` is the number of books in the record, if known up front.
    pub(crate) async fn new(
        ctx: &'a Context,
        options: &ImportOptions,
        progress: &'a dyn ProgressListener,
        rows: u64,
    ) -> Result<Self> {
        provision(progress, rows);
        let libraries = ctx.catalog().list_calibre_libraries().await.or_classify()?;
        Ok(Self {
            ctx,
            policy: options.policy,
            progress,
            throttle: Throttle::new(ctx.progress_interval()),
            libraries: libraries.into_iter().map(|library| library.uuid).collect(),
            row: 0,
            results: ImportResults::default(),
        })
    }

    /// Poll for cancellation, remembering it in the results.
    pub(crate) fn is_cancelled(&mut self) -> bool {
        if self.progress.is_cancelled() {
            self.results.cancelled = true;
        }
        self.results.cancelled
    }

    /// Merge the next row.
    pub(crate) async fn import(&mut self, decoded: std::result::Result<IncomingBook, RowError>) -> Result<()> {
        self.row += 1;
        self.results.books.processed += 1;
        match decoded {
            Ok(incoming) => self.merge(incoming).await?,
            Err(err) => self.fail(err.key, err.reason),
        }
        self.throttle.tick(self.progress, None);
        Ok(())
    }

    async fn merge(&mut self, incoming: IncomingBook) -> Result<()> {
        let IncomingBook { mut book, timestamped } = incoming;
        book.id = None;
        if let Some(link) = &book.calibre
            && !self.libraries.contains(&link.library_uuid)
        {
            tracing::warn!(uuid = %book.uuid, library = %link.library_uuid, "Dropping link to unknown Calibre library");
            book.calibre = None;
        }

        let catalog = self.ctx.catalog();
        let existing = match catalog.find_book_by_uuid(&book.uuid).await {
            Ok(existing) => existing,
            Err(err) => return self.persist_failed(&book.uuid, err),
        };
        let newer = existing.as_ref().is_some_and(|local| timestamped && book.last_updated > local.last_updated);
        let outcome = match (decide(self.policy, existing.is_some(), newer), existing.and_then(|local| local.id)) {
            (Decision::Skip, _) => {
                self.results.books.skipped += 1;
                return Ok(());
            },
            (Decision::Update, Some(id)) => catalog.update_book(id, &book).await.map(|()| Decision::Update),
            _ => catalog.insert_book(&book).await.map(|_| Decision::Insert),
        };
        match outcome {
            Ok(Decision::Insert) => self.results.books.created += 1,
            Ok(_) => self.results.books.updated += 1,
            Err(err) => return self.persist_failed(&book.uuid, err),
        }
        Ok(())
    }

    fn persist_failed(&mut self, uuid: &str, err: bindery_catalog::error::Error) -> Result<()> {
        if matches!(&*err, bindery_catalog::error::ErrorKind::StorageFull) {
            return Err(err.raise(ErrorKind::StorageFull));
        }
        self.fail(Some(uuid.to_string()), (*err).to_string());
        Ok(())
    }

    fn fail(&mut self, key: Option<String>, reason: String) {
        tracing::warn!(row = self.row, key = key.as_deref(), %reason, "Skipping book");
        self.results.books.failed += 1;
        self.results.failures.push(RowFailure { record_type: RecordType::Books, row: self.row, key, reason });
    }

    pub(crate) fn finish(mut self) -> ImportResults {
        self.throttle.flush(self.progress, None);
        let Counter { processed, created, updated, skipped, failed } = self.results.books;
        tracing::info!(processed, created, updated, skipped, failed, "Imported books");
        self.results
    }
}

/// Load the books to export, with the cover files that exist for them.
///
/// The cover list is what the covers record exports later, so covers
/// always match the books actually written.
pub(crate) async fn collect_books(
    ctx: &Context,
    since: Option<UtcDateTime>,
    progress: &dyn ProgressListener,
) -> Result<(Vec<Book>, ExportResults)> {
    let catalog = ctx.catalog();
    provision(progress, catalog.count_books(since).await.or_classify()?);
    let mut throttle = Throttle::new(ctx.progress_interval());
    let mut books = Vec::new();
    let mut results = ExportResults::default();
    let mut stream = catalog.stream_books(since);
    while let Some(book) = stream.next().await {
        if progress.is_cancelled() {
            results.cancelled = true;
            break;
        }
        let book = book.or_classify()?;
        results.cover_files.extend(existing_covers(ctx, &book.uuid).await?);
        results.book_ids.extend(book.id);
        books.push(book);
        throttle.tick(progress, None);
    }
    throttle.flush(progress, None);
    Ok((books, results))
}

/// Every book in a catalogue, as the JSON a books record holds.
pub(crate) async fn export_all_books(catalog: &Repository) -> Result<Value> {
    let books: Vec<Book> = catalog.stream_books(None).try_collect().await.or_classify()?;
    let proxies: Vec<BookProxy> = books.iter().map(BookProxy::from).collect();
    serde_json::to_value(proxies).or_raise(|| ErrorKind::Decode(RecordType::Books))
}

/// Books as a JSON array.
pub(crate) struct JsonBooks;

#[async_trait]
impl RecordReader for JsonBooks {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let Value::Array(rows) = record.into_json()? else {
            exn::bail!(ErrorKind::Decode(RecordType::Books));
        };
        let mut importer = BookImporter::new(ctx, options, progress, rows.len() as u64).await?;
        for row in rows {
            if importer.is_cancelled() {
                break;
            }
            let key = row.get("uuid").and_then(Value::as_str).filter(|uuid| !uuid.is_empty()).map(str::to_string);
            let decoded = serde_json::from_value::<BookProxy>(row)
                .map_err(|err| RowError::new(key, err.to_string()))
                .and_then(BookProxy::into_incoming);
            importer.import(decoded).await?;
        }
        Ok(importer.finish())
    }
}

#[async_trait]
impl RecordWriter for JsonBooks {
    async fn write(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let (books, results) = collect_books(ctx, options.since, progress).await?;
        let proxies: Vec<BookProxy> = books.iter().map(BookProxy::from).collect();
        let value = serde_json::to_value(proxies).or_raise(|| ErrorKind::Decode(RecordType::Books))?;
        sink.put(Record::json(RecordType::Books, value))?;
        tracing::info!(books = results.books_exported(), covers = results.cover_files.len(), "Exported books");
        Ok(results)
    }
}
