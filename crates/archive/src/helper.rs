//! Front ends tying options, files and bookkeeping together.

use crate::container::{ArchiveReader, ArchiveWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, Result};
use crate::progress::{ProgressListener, provision};
use crate::{ArchiveEncoding, ExportOptions, ExportResults, ImportOptions, ImportResults, RecordType};
use bindery_compress::Compression;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use time::UtcDateTime;
use tracing::instrument;

/// Exports the catalogue to a file.
#[derive(Debug, Clone)]
pub struct ExportHelper {
    path: PathBuf,
    options: ExportOptions,
}

impl ExportHelper {
    pub fn new(path: impl Into<PathBuf>, options: ExportOptions) -> Self {
        Self { path: path.into(), options }
    }

    /// The writer for the selected encoding. A `.gz` or `.bz2` destination
    /// compresses JSON and CSV output.
    pub fn archive_writer(&self) -> Result<ArchiveWriter> {
        Ok(ArchiveWriter::new(&self.options)?.with_compression(Compression::from_path(&self.path)))
    }

    /// Write the archive.
    ///
    /// The archive is written to a temporary file next to the destination and
    /// moved over it once complete; on error the destination is untouched.
    /// A cancelled export is still kept, since what was written is valid.
    #[instrument(skip_all, fields(path = %self.path.display(), encoding = %self.options.encoding))]
    pub async fn export(&self, ctx: &Context, progress: &dyn ProgressListener) -> Result<ExportResults> {
        let writer = self.archive_writer()?;
        let started_at = UtcDateTime::now().truncate_to_second();
        let mut options = self.options.clone();
        if options.incremental {
            options.since = ctx.catalog().last_full_backup().await.or_classify()?;
            tracing::debug!(since = ?options.since, "Exporting books changed since the last full backup");
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir).or_classify()?;
        let results = writer.write(ctx, &options, temp.as_file_mut(), progress).await?;
        temp.as_file().sync_all().or_classify()?;
        temp.persist(&self.path).map_err(|err| err.error).or_classify()?;

        self.on_success(ctx, &options, &results, started_at).await?;
        Ok(results)
    }

    /// Bookkeeping after a successful export: a complete book export becomes
    /// the reference point of the next incremental one.
    pub async fn on_success(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        results: &ExportResults,
        started_at: UtcDateTime,
    ) -> Result<()> {
        if results.cancelled || !options.is_full_backup() {
            return Ok(());
        }
        ctx.catalog().set_last_full_backup(started_at).await.or_classify()?;
        tracing::info!(books = results.books_exported(), "Recorded full backup");
        Ok(())
    }
}

/// Imports a file into the catalogue.
#[derive(Debug, Clone)]
pub struct ImportHelper {
    path: PathBuf,
    options: ImportOptions,
}

impl ImportHelper {
    pub fn new(path: impl Into<PathBuf>, options: ImportOptions) -> Self {
        Self { path: path.into(), options }
    }

    /// The reader for the file. Fails with
    /// [`Configuration`](crate::error::ErrorKind::Configuration) when the file can't
    /// supply any of the requested record types.
    pub fn archive_reader(&self) -> Result<ArchiveReader> {
        let encoding = ArchiveEncoding::detect(&self.path)?;
        encoding.check_readable(&self.options.record_types)?;
        Ok(ArchiveReader::new(encoding, &self.path))
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub async fn import(&self, ctx: &Context, progress: &dyn ProgressListener) -> Result<ImportResults> {
        let reader = self.archive_reader()?;
        if let Some(metadata) = reader.read_metadata().await? {
            metadata.check_version()?;
            tracing::debug!(version = metadata.archive_version, app_version = %metadata.app_version, "Read archive metadata");
            if let Some(book_count) = metadata.book_count
                && self.options.wants(RecordType::Books)
            {
                provision(progress, book_count);
            }
        }
        reader.read(ctx, &self.options, progress).await
    }
}
