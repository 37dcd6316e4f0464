//! Containers: the files records are packed into.
//!
//! Writing goes through a [`RecordSink`] generic over any `Write + Seek`
//! destination; reading goes through a [`RecordSource`] listing the entries
//! a file holds. Both sides drive the record handlers in read order, so the
//! handlers never know which container they are in.

mod csv_file;
mod json_file;
mod sqlite_file;
mod tar_file;
mod zip_file;

pub(crate) use self::sqlite_file::SqliteSource;

use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::{ProgressListener, provision};
use crate::records::{Record, RecordSink, expand, list_covers, reader_for, writer_for};
use crate::{
    ArchiveEncoding, ArchiveMetaData, ExportOptions, ExportResults, ImportOptions, ImportResults, RecordEncoding,
    RecordType,
};
use async_trait::async_trait;
use bindery_compress::Compression;
use exn::ResultExt;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tracing::instrument;

/// One record held by a source, not loaded yet.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub(crate) record_type: RecordType,
    pub(crate) encoding: RecordEncoding,
    pub(crate) name: String,
    pub(crate) modified: Option<UtcDateTime>,
    /// Position within the source, meaning whatever the source wants.
    pub(crate) index: usize,
}

/// An open archive being read.
#[async_trait]
pub(crate) trait RecordSource: Send {
    /// The recognised records, in the order the container holds them.
    fn entries(&self) -> &[Entry];

    async fn load(&mut self, entry: &Entry) -> Result<Record>;

    /// Release anything held open. Called once reading is over, whatever the
    /// outcome.
    async fn close(&mut self) {}
}

async fn open_source(encoding: ArchiveEncoding, path: &Path) -> Result<Box<dyn RecordSource>> {
    Ok(match encoding {
        ArchiveEncoding::Csv => Box::new(csv_file::CsvSource::open(path)?),
        ArchiveEncoding::Zip => Box::new(zip_file::ZipSource::open(path)?),
        ArchiveEncoding::Json => Box::new(json_file::JsonSource::open(path)?),
        ArchiveEncoding::Tar => Box::new(tar_file::TarSource::open(path)?),
        ArchiveEncoding::SqLiteDb => Box::new(SqliteSource::open(path).await?),
    })
}

async fn read_metadata(source: &mut dyn RecordSource) -> Result<Option<ArchiveMetaData>> {
    let Some(entry) = source.entries().iter().find(|e| e.record_type == RecordType::MetaData).cloned() else {
        return Ok(None);
    };
    let value = source.load(&entry).await?.into_json()?;
    let metadata: ArchiveMetaData =
        serde_json::from_value(value).or_raise(|| ErrorKind::Decode(RecordType::MetaData))?;
    Ok(Some(metadata))
}

/// Feed every wanted record of a source to its reader, in read order.
pub(crate) async fn read_source(
    source: &mut dyn RecordSource,
    ctx: &Context,
    options: &ImportOptions,
    progress: &dyn ProgressListener,
) -> Result<ImportResults> {
    let mut entries = source.entries().to_vec();
    entries.sort_by_key(|entry| entry.record_type);
    let mut covers = match options.wants(RecordType::Cover) {
        true => entries.iter().filter(|entry| entry.record_type == RecordType::Cover).count() as u64,
        false => 0,
    };
    let mut results = ImportResults::default();
    'entries: for entry in entries {
        if entry.record_type == RecordType::MetaData {
            continue;
        }
        if !options.wants(entry.record_type) {
            tracing::debug!(entry = %entry.name, "Skipping record that was not requested");
            continue;
        }
        if progress.is_cancelled() {
            results.cancelled = true;
            break;
        }
        let record = source.load(&entry).await?;
        let records = match entry.record_type {
            RecordType::AutoDetect => {
                let mut nested = expand(record)?;
                nested.retain(|record| options.wants(record.record_type));
                nested.sort_by_key(|record| record.record_type);
                nested
            },
            _ => vec![record],
        };
        for record in records {
            let Some(reader) = reader_for(record.encoding, record.record_type) else {
                tracing::debug!(record = %record.record_type, name = %record.name, "Skipping record with no reader");
                continue;
            };
            if record.record_type != RecordType::Cover {
                progress.publish_progress(0, Some(record.record_type.label()));
            } else if covers > 0 {
                // Covers come after the books, so the maximum is final by now.
                provision(progress, progress.max_pos() + covers);
                progress.publish_progress(0, Some(RecordType::Cover.label()));
                covers = 0;
            }
            results = results.merge(reader.read(ctx, options, record, progress).await?);
            if results.cancelled {
                break 'entries;
            }
        }
    }
    Ok(results)
}

/// Write every requested record type into a sink, metadata first.
async fn write_records(
    encoding: ArchiveEncoding,
    sink: &mut dyn RecordSink,
    ctx: &Context,
    options: &ExportOptions,
    progress: &dyn ProgressListener,
) -> Result<ExportResults> {
    if encoding.can_write(RecordType::MetaData) {
        let mut metadata = ArchiveMetaData::new(ctx.app_version());
        if options.contains(RecordType::Books) {
            metadata.book_count = Some(ctx.catalog().count_books(options.since).await.or_classify()?);
        }
        if options.contains(RecordType::Cover) && encoding.can_write(RecordType::Cover) {
            metadata.cover_count = Some(list_covers(ctx, options.since).await?.len() as u64);
        }
        let value = serde_json::to_value(metadata).or_raise(|| ErrorKind::Decode(RecordType::MetaData))?;
        sink.put(Record::json(RecordType::MetaData, value))?;
    }
    let mut results = ExportResults::default();
    for record_type in &options.record_types {
        if progress.is_cancelled() {
            results.cancelled = true;
            break;
        }
        let Some(writer) = writer_for(encoding, *record_type) else {
            tracing::debug!(record = %record_type, %encoding, "Skipping record the archive can't hold");
            continue;
        };
        progress.publish_progress(0, Some(record_type.label()));
        let written = writer.write(ctx, options, &results, sink, progress).await?;
        results = results.merge(written);
        if results.cancelled {
            break;
        }
    }
    Ok(results)
}

/// Creates an archive.
#[derive(Debug, Clone)]
pub struct ArchiveWriter {
    encoding: ArchiveEncoding,
    compression: Compression,
}

impl ArchiveWriter {
    /// Fails with [`Configuration`](ErrorKind::Configuration) when the
    /// encoding can't be written or can't hold every requested record type.
    pub fn new(options: &ExportOptions) -> Result<Self> {
        options.encoding.check_writable(&options.record_types)?;
        Ok(Self { encoding: options.encoding, compression: Compression::None })
    }

    /// Compress the whole file. Only applies to JSON and CSV; ZIP archives
    /// compress their entries themselves.
    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = match self.encoding {
            ArchiveEncoding::Json | ArchiveEncoding::Csv => compression,
            _ => Compression::None,
        };
        self
    }

    pub fn encoding(&self) -> ArchiveEncoding {
        self.encoding
    }

    /// Write the archive into `out`.
    ///
    /// A cancelled export still produces a valid archive, holding whatever
    /// was written before the cancellation was noticed.
    #[instrument(skip_all, fields(encoding = %self.encoding, compression = self.compression.as_str()))]
    pub async fn write<W: Write + Seek + Send>(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        out: W,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let results = match self.encoding {
            ArchiveEncoding::Zip => {
                let mut sink = zip_file::ZipSink::new(out);
                let results = write_records(self.encoding, &mut sink, ctx, options, progress).await?;
                sink.finish()?;
                results
            },
            ArchiveEncoding::Json => {
                let mut sink = json_file::JsonSink::new(out, self.compression);
                let results = write_records(self.encoding, &mut sink, ctx, options, progress).await?;
                sink.finish()?;
                results
            },
            ArchiveEncoding::Csv => {
                let mut sink = csv_file::CsvSink::new(out, self.compression);
                let results = write_records(self.encoding, &mut sink, ctx, options, progress).await?;
                sink.finish()?;
                results
            },
            ArchiveEncoding::SqLiteDb | ArchiveEncoding::Tar => {
                exn::bail!(ErrorKind::Configuration(format!("{} archives can't be created", self.encoding)))
            },
        };
        tracing::info!(books = results.books_exported(), covers = results.covers_exported, "Export finished");
        Ok(results)
    }
}

/// Reads an existing archive.
#[derive(Debug, Clone)]
pub struct ArchiveReader {
    encoding: ArchiveEncoding,
    path: PathBuf,
}

impl ArchiveReader {
    pub fn new(encoding: ArchiveEncoding, path: impl Into<PathBuf>) -> Self {
        Self { encoding, path: path.into() }
    }

    pub fn encoding(&self) -> ArchiveEncoding {
        self.encoding
    }

    /// Peek at the archive's metadata without importing anything.
    ///
    /// CSV files have none; a catalogue database describes itself from its
    /// contents.
    pub async fn read_metadata(&self) -> Result<Option<ArchiveMetaData>> {
        let mut source = open_source(self.encoding, &self.path).await?;
        let metadata = read_metadata(source.as_mut()).await;
        source.close().await;
        metadata
    }

    /// Import the requested records into the catalogue and cover store.
    #[instrument(skip_all, fields(encoding = %self.encoding, path = %self.path.display(), policy = %options.policy))]
    pub async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let mut source = open_source(self.encoding, &self.path).await?;
        let results = read_source(source.as_mut(), ctx, options, progress).await;
        source.close().await;
        let results = results?;
        tracing::info!(
            books = results.books.processed,
            covers = results.covers.processed,
            failed = results.failures.len(),
            cancelled = results.cancelled,
            "Import finished"
        );
        Ok(results)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FullDisk;
    use super::*;
    use crate::progress::NoProgress;
    use crate::progress::testing::RecordingProgress;
    use crate::records::testing::{book, context, empty_context};
    use crate::results::Counter;
    use crate::UpdatePolicy;
    use bindery_storage::backend::MockBackend;
    use bindery_storage::cover_file_names;
    use rstest::rstest;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use std::sync::Arc;

    const COVER_SIZE: usize = 4096;

    /// A catalogue with some of everything.
    async fn populated(books: u32) -> (Context, Arc<MockBackend>) {
        let mut files = Vec::new();
        for n in 1..=books {
            let [front, _] = cover_file_names(&book(n).uuid);
            files.push((front, vec![n as u8; COVER_SIZE]));
        }
        let covers = Arc::new(MockBackend::with_files(files));
        let ctx = context(covers.clone()).await;
        let catalog = ctx.catalog();
        for n in 1..=books {
            let mut b = book(n);
            b.bookshelves = vec!["Shelf".to_string()];
            catalog.insert_book(&b).await.unwrap();
        }
        catalog.upsert_preferences(&BTreeMap::from([("theme".to_string(), json!("dark"))])).await.unwrap();
        catalog
            .insert_style(&bindery_catalog::Style {
                id: None,
                uuid: "style-1".to_string(),
                name: "Compact".to_string(),
                preferred: true,
                menu_position: 0,
                settings: serde_json::Map::new(),
            })
            .await
            .unwrap();
        (ctx, covers)
    }

    async fn export(ctx: &Context, options: &ExportOptions) -> (tempfile::TempDir, PathBuf, ExportResults) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("backup.{}", options.encoding.extension()));
        let mut out = Cursor::new(Vec::new());
        let results = ArchiveWriter::new(options).unwrap().write(ctx, options, &mut out, &NoProgress).await.unwrap();
        std::fs::write(&path, out.into_inner()).unwrap();
        (dir, path, results)
    }

    #[rstest]
    #[case::zip(ArchiveEncoding::Zip)]
    #[case::json(ArchiveEncoding::Json)]
    #[case::csv(ArchiveEncoding::Csv)]
    #[tokio::test]
    async fn test_round_trip(#[case] encoding: ArchiveEncoding) {
        let (source, _) = populated(3).await;
        let options = ExportOptions::new(encoding);
        let (_dir, path, exported) = export(&source, &options).await;
        assert_eq!(exported.books_exported(), 3);

        let covers = Arc::new(MockBackend::default());
        let target = context(covers.clone()).await;
        let reader = ArchiveReader::new(ArchiveEncoding::detect(&path).unwrap(), &path);
        let options = ImportOptions::default();
        let imported = reader.read(&target, &options, &NoProgress).await.unwrap();

        assert_eq!(imported.books, Counter { processed: 3, created: 3, ..Counter::default() });
        assert!(imported.failures.is_empty());
        let restored = target.catalog().find_book_by_uuid(&book(2).uuid).await.unwrap().unwrap();
        assert_eq!(restored.bookshelves, vec!["Shelf".to_string()]);
        match encoding {
            ArchiveEncoding::Csv => {
                assert!(covers.is_empty().await);
                assert!(target.catalog().list_styles().await.unwrap().is_empty());
            },
            ArchiveEncoding::Json => {
                assert!(covers.is_empty().await);
                assert_eq!(target.catalog().list_styles().await.unwrap().len(), 1);
                assert_eq!(target.catalog().get_preferences().await.unwrap()["theme"], json!("dark"));
            },
            _ => {
                let metadata = reader.read_metadata().await.unwrap().unwrap();
                assert_eq!(metadata.cover_count, Some(3));
                assert_eq!(imported.covers.created, 3);
                assert_eq!(covers.len().await, 3);
                assert_eq!(target.catalog().list_styles().await.unwrap().len(), 1);
            },
        }
    }

    #[tokio::test]
    async fn test_metadata() {
        let (source, _) = populated(2).await;
        let ctx = source.with_app_version("9.9.9");
        let (_dir, path, _) = export(&ctx, &ExportOptions::new(ArchiveEncoding::Zip)).await;
        let metadata = ArchiveReader::new(ArchiveEncoding::Zip, &path).read_metadata().await.unwrap().unwrap();
        assert_eq!(metadata.app_version, "9.9.9");
        assert_eq!(metadata.book_count, Some(2));
        assert_eq!(metadata.cover_count, Some(2));

        let (_dir, path, _) = export(&ctx, &ExportOptions::new(ArchiveEncoding::Csv)).await;
        assert!(ArchiveReader::new(ArchiveEncoding::Csv, &path).read_metadata().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zip_layout() {
        let (source, _) = populated(1).await;
        let (_dir, path, _) = export(&source, &ExportOptions::new(ArchiveEncoding::Zip)).await;
        let archive = ::zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        let cover = format!("covers/{}.jpg", book(1).uuid);
        let mut expected = vec![
            "metadata.json",
            "styles.json",
            "preferences.json",
            "bookshelves.json",
            "calibre_libraries.json",
            "calibre_custom_fields.json",
            "books.json",
            cover.as_str(),
            "database.db",
        ];
        let mut actual = names.clone();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_disk_full_during_covers() {
        let (source, _) = populated(5).await;
        let options = ExportOptions::new(ArchiveEncoding::Zip);
        let progress = RecordingProgress::default();
        // Room for the records before the covers, but not for all covers.
        let out = FullDisk::new(3 * COVER_SIZE);
        let err = ArchiveWriter::new(&options).unwrap().write(&source, &options, out, &progress).await.unwrap_err();

        assert!(matches!(&*err, ErrorKind::StorageFull));
        let messages = progress.messages();
        assert!(messages.iter().any(|m| m == RecordType::Cover.label()));
        assert!(!messages.iter().any(|m| m == RecordType::Database.label()));
    }

    #[tokio::test]
    async fn test_cancelled_export_is_still_valid() {
        let (source, _) = populated(5).await;
        let options = ExportOptions::new(ArchiveEncoding::Zip);
        let progress = RecordingProgress::cancel_after(4);
        let mut out = Cursor::new(Vec::new());
        let results = ArchiveWriter::new(&options).unwrap().write(&source, &options, &mut out, &progress).await.unwrap();
        assert!(results.cancelled);
        assert!(!results.database);

        let archive = ::zip::ZipArchive::new(Cursor::new(out.into_inner())).unwrap();
        assert!(archive.file_names().any(|name| name == "metadata.json"));
        assert!(!archive.file_names().any(|name| name == "database.db"));
    }

    #[tokio::test]
    async fn test_unknown_and_unrequested_records_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mixed.zip");
        {
            let mut zip = ::zip::ZipWriter::new(std::fs::File::create(&path).unwrap());
            let options = ::zip::write::SimpleFileOptions::default();
            zip.start_file("holograms.json", options).unwrap();
            zip.write_all(b"[1, 2, 3]").unwrap();
            zip.start_file("styles.json", options).unwrap();
            zip.write_all(br#"[{"uuid": "s", "name": "Style"}]"#).unwrap();
            zip.start_file("books.json", options).unwrap();
            zip.write_all(&serde_json::to_vec(&json!([{"uuid": "b1", "title": "One"}])).unwrap()).unwrap();
            zip.finish().unwrap();
        }
        let ctx = empty_context().await;
        let options = ImportOptions::default().with_record_types([RecordType::Books]);
        let results = ArchiveReader::new(ArchiveEncoding::Zip, &path).read(&ctx, &options, &NoProgress).await.unwrap();
        assert_eq!(results.books.created, 1);
        assert!(results.structural.is_empty());
        assert!(ctx.catalog().list_styles().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_import_cancellation() {
        let (source, _) = populated(6).await;
        let (_dir, path, _) = export(&source, &ExportOptions::new(ArchiveEncoding::Json)).await;
        let ctx = empty_context().await;
        let progress = RecordingProgress::cancel_after(3);
        let options =
            ImportOptions::default().with_record_types([RecordType::Books]).with_policy(UpdatePolicy::Overwrite);
        let results = ArchiveReader::new(ArchiveEncoding::Json, &path).read(&ctx, &options, &progress).await.unwrap();
        assert!(results.cancelled);
        assert!(results.books.processed < 6);
        assert_eq!(ctx.catalog().count_books(None).await.unwrap(), results.books.created);
    }

    #[tokio::test]
    async fn test_import_progress_counts_covers() {
        let (source, _) = populated(3).await;
        let (_dir, path, _) = export(&source, &ExportOptions::new(ArchiveEncoding::Zip)).await;
        let ctx = empty_context().await;
        let progress = RecordingProgress::default();
        let results =
            ArchiveReader::new(ArchiveEncoding::Zip, &path).read(&ctx, &ImportOptions::default(), &progress).await.unwrap();
        assert_eq!(results.covers.created, 3);
        assert_eq!(progress.position(), 6);
        assert_eq!(progress.max_pos(), 6);
        assert!(progress.messages().iter().any(|m| m == RecordType::Cover.label()));
    }

    #[test]
    fn test_writer_rejects_incompatible_options() {
        let csv_with_styles =
            ExportOptions::new(ArchiveEncoding::Csv).with_record_types([RecordType::Books, RecordType::Styles]);
        let err = ArchiveWriter::new(&csv_with_styles).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration(_)));
        let tar = ExportOptions::new(ArchiveEncoding::Tar).with_record_types([RecordType::Books]);
        assert!(matches!(&*ArchiveWriter::new(&tar).unwrap_err(), ErrorKind::Configuration(_)));
    }
}
