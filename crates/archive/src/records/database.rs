//! A raw copy of the whole catalogue database.

use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::container::{RecordSource, SqliteSource, read_source};
use crate::context::Context;
use crate::error::{ClassifyExt, Result};
use crate::progress::ProgressListener;
use crate::{ExportOptions, ExportResults, ImportOptions, ImportResults, RecordEncoding, RecordType};
use async_trait::async_trait;

const FILE_NAME: &str = "database.db";

pub(crate) struct DatabaseSnapshot;

#[async_trait]
impl RecordWriter for DatabaseSnapshot {
    async fn write(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        if progress.is_cancelled() {
            return Ok(ExportResults { cancelled: true, ..ExportResults::default() });
        }
        // A snapshot can't be cut down to recent changes.
        if let Some(since) = options.since {
            tracing::debug!(%since, "Leaving the database out of a date-filtered export");
            return Ok(ExportResults::default());
        }
        let dir = tempfile::tempdir().or_classify()?;
        let path = dir.path().join(FILE_NAME);
        ctx.database().snapshot_into(&path).await.or_classify()?;
        let data = tokio::fs::read(&path).await.or_classify()?;
        tracing::info!(bytes = data.len(), "Exported database snapshot");
        sink.put(Record::bytes(RecordType::Database, RecordEncoding::Binary, FILE_NAME, data))?;
        Ok(ExportResults { database: true, ..ExportResults::default() })
    }
}

/// Imports the records held by the snapshot, as if it were an archive of
/// its own. Only the record types requested besides the database itself are
/// taken from it.
#[async_trait]
impl RecordReader for DatabaseSnapshot {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let dir = tempfile::tempdir().or_classify()?;
        let path = dir.path().join(FILE_NAME);
        tokio::fs::write(&path, record.into_bytes()?).await.or_classify()?;

        let nested = ImportOptions {
            record_types: options.record_types.iter().copied().filter(|t| *t != RecordType::Database).collect(),
            policy: options.policy,
        };
        let mut source = SqliteSource::open(&path).await?;
        let results = read_source(&mut source, ctx, &nested, progress).await;
        source.close().await;
        Ok(ImportResults { database: true, ..results? })
    }
}
