//! ZIP archives: one entry per record, covers under `covers/`.

use super::{Entry, RecordSource};
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::records::{Record, RecordSink};
use crate::RecordType;
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;
use time::{Date, Month, UtcDateTime};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// ZIP timestamps have no zone; they are written and read as UTC.
///
/// The DOS format only stores even seconds, so odd seconds are rounded down
/// here. A cover's time can come back up to a second earlier than it was,
/// well inside the granularity of the cover "only newer" comparison.
pub(super) fn to_zip_time(t: UtcDateTime) -> Option<zip::DateTime> {
    zip::DateTime::from_date_and_time(
        u16::try_from(t.year()).ok()?,
        u8::from(t.month()),
        t.day(),
        t.hour(),
        t.minute(),
        t.second() & !1,
    )
    .ok()
}

pub(super) fn from_zip_time(t: zip::DateTime) -> Option<UtcDateTime> {
    let date = Date::from_calendar_date(i32::from(t.year()), Month::try_from(t.month()).ok()?, t.day()).ok()?;
    Some(date.with_hms(t.hour(), t.minute(), t.second()).ok()?.as_utc())
}

pub(crate) struct ZipSink<W: Write + Seek> {
    zip: ZipWriter<W>,
}

impl<W: Write + Seek> ZipSink<W> {
    pub(crate) fn new(out: W) -> Self {
        Self { zip: ZipWriter::new(out) }
    }

    /// Write the central directory.
    pub(crate) fn finish(self) -> Result<()> {
        self.zip.finish().or_classify()?;
        Ok(())
    }
}

impl<W: Write + Seek + Send> RecordSink for ZipSink<W> {
    fn put(&mut self, record: Record) -> Result<()> {
        let name = record.record_type.entry_name(record.encoding, &record.name);
        // Covers are already compressed images.
        let method = match record.record_type {
            RecordType::Cover => CompressionMethod::Stored,
            _ => CompressionMethod::Deflated,
        };
        let mut options = SimpleFileOptions::default().compression_method(method);
        if let Some(modified) = record.modified.and_then(to_zip_time) {
            options = options.last_modified_time(modified);
        }
        let data = record.into_bytes()?;
        self.zip.start_file(name.as_str(), options).or_classify()?;
        self.zip.write_all(&data).or_classify()?;
        tracing::trace!(entry = %name, bytes = data.len(), "Wrote ZIP entry");
        Ok(())
    }
}

pub(crate) struct ZipSource {
    archive: ZipArchive<File>,
    entries: Vec<Entry>,
}

impl ZipSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).or_classify()?;
        let mut archive = ZipArchive::new(file).or_classify()?;
        let mut entries = Vec::new();
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).or_classify()?;
            if file.is_dir() {
                continue;
            }
            let Some((record_type, encoding)) = RecordType::from_entry_name(file.name()) else {
                tracing::debug!(entry = file.name(), "Skipping unrecognised ZIP entry");
                continue;
            };
            entries.push(Entry {
                record_type,
                encoding,
                name: entry_record_name(record_type, file.name()),
                modified: file.last_modified().and_then(from_zip_time),
                index,
            });
        }
        Ok(Self { archive, entries })
    }
}

/// Covers are known by their file name alone.
pub(super) fn entry_record_name(record_type: RecordType, entry_name: &str) -> String {
    match record_type {
        RecordType::Cover => entry_name.rsplit('/').next().unwrap_or(entry_name).to_string(),
        _ => entry_name.trim_start_matches("./").to_string(),
    }
}

#[async_trait]
impl RecordSource for ZipSource {
    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn load(&mut self, entry: &Entry) -> Result<Record> {
        let mut file = self.archive.by_index(entry.index).or_classify()?;
        let mut data = Vec::with_capacity(usize::try_from(file.size()).unwrap_or_default());
        file.read_to_end(&mut data).or_raise(|| ErrorKind::InvalidArchive)?;
        let record = Record::bytes(entry.record_type, entry.encoding, entry.name.clone(), data);
        Ok(match entry.modified {
            Some(modified) => record.modified(modified),
            None => record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecordEncoding;
    use std::io::Cursor;

    #[test]
    fn test_zip_time() {
        let t = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        assert_eq!(from_zip_time(to_zip_time(t).unwrap()), Some(t));
        let odd = UtcDateTime::from_unix_timestamp(1_700_000_001).unwrap();
        assert_eq!(from_zip_time(to_zip_time(odd).unwrap()), Some(t));
        // Before the DOS epoch.
        assert!(to_zip_time(UtcDateTime::from_unix_timestamp(0).unwrap()).is_none());
    }

    #[test]
    fn test_entry_record_name() {
        assert_eq!(entry_record_name(RecordType::Cover, "covers/abc.jpg"), "abc.jpg");
        assert_eq!(entry_record_name(RecordType::Books, "./books.json"), "books.json");
    }

    #[tokio::test]
    async fn test_entries_and_timestamps() {
        let modified = UtcDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let mut out = Cursor::new(Vec::new());
        let mut sink = ZipSink::new(&mut out);
        sink.put(Record::json(RecordType::Styles, serde_json::json!([]))).unwrap();
        sink.put(Record::bytes(RecordType::Cover, RecordEncoding::Binary, "abc.jpg", vec![0xFF; 16]).modified(modified))
            .unwrap();
        sink.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.zip");
        std::fs::write(&path, out.into_inner()).unwrap();
        let mut source = ZipSource::open(&path).unwrap();
        let entries = source.entries().to_vec();
        assert_eq!(entries.len(), 2);
        let cover = entries.iter().find(|e| e.record_type == RecordType::Cover).unwrap();
        assert_eq!(cover.name, "abc.jpg");
        assert_eq!(cover.modified, Some(modified));

        let record = source.load(cover).await.unwrap();
        assert_eq!(record.modified, Some(modified));
        assert_eq!(record.into_bytes().unwrap(), vec![0xFF; 16]);
    }

    #[test]
    fn test_not_a_zip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.zip");
        std::fs::write(&path, b"definitely not a zip archive").unwrap();
        let err = ZipSource::open(&path).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidArchive));
    }
}
