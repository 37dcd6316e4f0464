//! Cover images, one binary record per file.

use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::{ProgressListener, provision};
use crate::results::{ImportResults, RowFailure};
use crate::upsert::{Decision, cover_is_newer, decide};
use crate::{ExportOptions, ExportResults, ImportOptions, RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_storage::error::ErrorKind as StorageErrorKind;
use bindery_storage::{FileInfo, StorageBackend, cover_file_names, validate_file_name};
use futures::StreamExt;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use time::UtcDateTime;

pub(crate) struct Covers;

/// The cover files that exist for a book.
pub(crate) async fn existing_covers(ctx: &Context, book_uuid: &str) -> Result<Vec<String>> {
    let mut found = Vec::new();
    for name in cover_file_names(book_uuid) {
        if ctx.covers().exists(Path::new(&name)).await.or_classify()? {
            found.push(name);
        }
    }
    Ok(found)
}

/// The cover files of every book changed since `since`, found by asking the
/// cover store about each book.
pub(crate) async fn list_covers(ctx: &Context, since: Option<UtcDateTime>) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut books = ctx.catalog().stream_books(since);
    while let Some(book) = books.next().await {
        files.extend(existing_covers(ctx, &book.or_classify()?.uuid).await?);
    }
    Ok(files)
}

async fn stat(covers: &dyn StorageBackend, path: &Path) -> bindery_storage::error::Result<Option<FileInfo>> {
    match covers.stat(path).await {
        Ok(info) => Ok(Some(info)),
        Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Why a cover was not stored.
enum Rejected {
    /// Below the minimum cover size; counts as skipped.
    Undersized,
    Failed(String),
}

/// `abc.jpg` is staged as `.abc.jpg.part` until it is complete.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

impl Covers {
    /// Store one cover, applying the update policy against any existing
    /// file of the same name.
    ///
    /// Returns the decision taken. A full disk is an error; anything else
    /// wrong with this one cover is `Rejected`. The existing file is only
    /// replaced once the new one is completely written.
    async fn store(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
    ) -> Result<std::result::Result<Decision, Rejected>> {
        let covers = ctx.covers().as_ref();
        let path = match validate_file_name(&record.name) {
            Ok(path) => path,
            Err(err) => return Ok(Err(Rejected::Failed((*err).to_string()))),
        };
        let modified = record.modified;
        let data = record.into_bytes()?;
        if (data.len() as u64) < ctx.min_cover_size() {
            tracing::debug!(path = %path.display(), size = data.len(), "Discarding undersized cover");
            return Ok(Err(Rejected::Undersized));
        }
        let existing = match stat(covers, &path).await {
            Ok(existing) => existing,
            Err(err) => return escalate(err),
        };
        let newer = match (modified, &existing) {
            (Some(incoming), Some(local)) => cover_is_newer(incoming, local.modified),
            _ => false,
        };
        let decision = decide(options.policy, existing.is_some(), newer);
        if decision == Decision::Skip {
            return Ok(Ok(decision));
        }

        let staged = staging_path(&path);
        if let Err(err) = covers.write(&staged, &data).await {
            return escalate(err);
        }
        let mut finished = Ok(());
        if let Some(modified) = modified {
            finished = covers.set_modified(&staged, modified).await;
        }
        if finished.is_ok() {
            finished = covers.rename(&staged, &path).await;
        }
        if let Err(err) = finished {
            _ = covers.delete(&staged).await;
            return escalate(err);
        }
        Ok(Ok(decision))
    }
}

/// A full disk aborts the import; any other storage error only fails the
/// cover in hand.
fn escalate<T>(err: bindery_storage::error::Error) -> Result<std::result::Result<T, Rejected>> {
    match &*err {
        StorageErrorKind::StorageFull(_) => Err(err.raise(ErrorKind::StorageFull)),
        kind => Ok(Err(Rejected::Failed(kind.to_string()))),
    }
}

#[async_trait]
impl RecordReader for Covers {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let mut results = ImportResults::default();
        let name = record.name.clone();
        results.covers.processed = 1;
        match self.store(ctx, options, record).await? {
            Ok(Decision::Insert) => results.covers.created = 1,
            Ok(Decision::Update) => results.covers.updated = 1,
            Ok(Decision::Skip) => results.covers.skipped = 1,
            Err(Rejected::Undersized) => results.covers.skipped = 1,
            Err(Rejected::Failed(reason)) => {
                tracing::warn!(cover = %name, %reason, "Skipping cover");
                results.covers.failed = 1;
                results.failures.push(RowFailure { record_type: RecordType::Cover, row: 1, key: Some(name), reason });
            },
        }
        progress.publish_progress(1, None);
        Ok(results)
    }
}

#[async_trait]
impl RecordWriter for Covers {
    async fn write(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        written: &ExportResults,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let mut results = ExportResults::default();
        let files = match options.contains(RecordType::Books) {
            true => written.cover_files.clone(),
            false => list_covers(ctx, options.since).await?,
        };
        provision(progress, progress.max_pos() + files.len() as u64);

        let covers = ctx.covers();
        for file in files {
            if progress.is_cancelled() {
                results.cancelled = true;
                break;
            }
            let path = Path::new(&file);
            let info = match stat(covers.as_ref(), path).await.or_classify()? {
                Some(info) => info,
                None => {
                    tracing::debug!(cover = %file, "Cover disappeared before it could be exported");
                    results.covers_missing += 1;
                    continue;
                },
            };
            let data = match covers.read(path).await {
                Ok(data) => data,
                Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                    results.covers_missing += 1;
                    continue;
                },
                Err(err) => return Err(err).or_classify(),
            };
            sink.put(Record::bytes(RecordType::Cover, RecordEncoding::Binary, file, data).modified(info.modified))?;
            results.covers_exported += 1;
            progress.publish_progress(1, None);
        }
        tracing::info!(covers = results.covers_exported, missing = results.covers_missing, "Exported covers");
        Ok(results)
    }
}
