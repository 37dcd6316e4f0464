//! CSV files: a single book list, nothing else.

use super::{Entry, RecordSource};
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::records::{Record, RecordSink};
use crate::{RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_compress::Compression;
use exn::Exn;
use std::io::Write;
use std::path::Path;

pub(crate) struct CsvSink<W: Write> {
    out: W,
    compression: Compression,
    data: Vec<u8>,
}

impl<W: Write> CsvSink<W> {
    pub(crate) fn new(out: W, compression: Compression) -> Self {
        Self { out, compression, data: Vec::new() }
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        let bytes = self.compression.compress(&self.data).map_err(|err| err.raise(ErrorKind::Io))?;
        self.out.write_all(&bytes).or_classify()?;
        self.out.flush().or_classify()?;
        Ok(())
    }
}

impl<W: Write + Send> RecordSink for CsvSink<W> {
    fn put(&mut self, record: Record) -> Result<()> {
        if record.record_type != RecordType::Books {
            tracing::debug!(record = %record.record_type, "CSV files only hold books");
            return Ok(());
        }
        self.data = record.into_bytes()?;
        Ok(())
    }
}

pub(crate) struct CsvSource {
    data: Option<Vec<u8>>,
    entries: [Entry; 1],
}

impl CsvSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).or_classify()?;
        let data = Compression::from_magic_bytes(&bytes)
            .decompress(&bytes)
            .map_err(|err| err.raise(ErrorKind::InvalidArchive))?;
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let entry = Entry { record_type: RecordType::Books, encoding: RecordEncoding::Csv, name, modified: None, index: 0 };
        Ok(Self { data: Some(data), entries: [entry] })
    }
}

#[async_trait]
impl RecordSource for CsvSource {
    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn load(&mut self, entry: &Entry) -> Result<Record> {
        let data = self.data.take().ok_or_else(|| Exn::new(ErrorKind::InvalidArchive))?;
        Ok(Record::bytes(entry.record_type, entry.encoding, entry.name.clone(), data))
    }
}
