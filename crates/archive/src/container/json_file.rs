//! Single-document JSON archives.
//!
//! Written in the all-in-one shape:
//!
//! ```json
//! {"bindery": {"metadata": {...}, "data": {"styles": [...], "books": [...]}}}
//! ```
//!
//! Read in that shape or flat, with any subset of record type names as
//! top-level keys (`{"books": [...]}`).

use super::{Entry, RecordSource};
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::records::{Record, RecordSink};
use crate::{RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_compress::Compression;
use exn::{Exn, ResultExt};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;

/// Top-level key wrapping an all-in-one document.
const ROOT_KEY: &str = "bindery";

pub(crate) struct JsonSink<W: Write> {
    out: W,
    compression: Compression,
    metadata: Option<Value>,
    data: Map<String, Value>,
}

impl<W: Write> JsonSink<W> {
    pub(crate) fn new(out: W, compression: Compression) -> Self {
        Self { out, compression, metadata: None, data: Map::new() }
    }

    pub(crate) fn finish(mut self) -> Result<()> {
        let mut root = Map::new();
        if let Some(metadata) = self.metadata.take() {
            root.insert(RecordType::MetaData.name().to_string(), metadata);
        }
        root.insert(RecordType::AutoDetect.name().to_string(), Value::Object(std::mem::take(&mut self.data)));
        let document = Value::Object(Map::from_iter([(ROOT_KEY.to_string(), Value::Object(root))]));
        let bytes = serde_json::to_vec(&document).or_raise(|| ErrorKind::Io)?;
        let bytes = self.compression.compress(&bytes).map_err(|err| err.raise(ErrorKind::Io))?;
        self.out.write_all(&bytes).or_classify()?;
        self.out.flush().or_classify()?;
        Ok(())
    }
}

impl<W: Write + Send> RecordSink for JsonSink<W> {
    fn put(&mut self, record: Record) -> Result<()> {
        let record_type = record.record_type;
        let value = record.into_json()?;
        match record_type {
            RecordType::MetaData => self.metadata = Some(value),
            _ => {
                self.data.insert(record_type.name().to_string(), value);
            },
        }
        Ok(())
    }
}

pub(crate) struct JsonSource {
    values: Vec<Value>,
    entries: Vec<Entry>,
}

impl JsonSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).or_classify()?;
        let bytes = Compression::from_magic_bytes(&bytes)
            .decompress(&bytes)
            .map_err(|err| err.raise(ErrorKind::InvalidArchive))?;
        let document: Value = serde_json::from_slice(&bytes).or_raise(|| ErrorKind::InvalidArchive)?;
        Self::from_document(document)
    }

    fn from_document(document: Value) -> Result<Self> {
        let Value::Object(mut root) = document else {
            exn::bail!(ErrorKind::InvalidArchive);
        };
        if let Some(Value::Object(inner)) = root.remove(ROOT_KEY) {
            root = inner;
        }
        let mut source = Self { values: Vec::new(), entries: Vec::new() };
        for (key, value) in root {
            let record_type = match key.parse::<RecordType>() {
                Ok(RecordType::Cover | RecordType::Database) | Err(_) => {
                    tracing::debug!(%key, "Skipping unrecognised JSON key");
                    continue;
                },
                Ok(record_type) => record_type,
            };
            source.entries.push(Entry {
                record_type,
                encoding: RecordEncoding::Json,
                name: key,
                modified: None,
                index: source.values.len(),
            });
            source.values.push(value);
        }
        Ok(source)
    }
}

#[async_trait]
impl RecordSource for JsonSource {
    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Each value can be loaded once.
    async fn load(&mut self, entry: &Entry) -> Result<Record> {
        let value = self
            .values
            .get_mut(entry.index)
            .map(std::mem::take)
            .ok_or_else(|| Exn::new(ErrorKind::InvalidArchive))?;
        Ok(Record::json(entry.record_type, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Payload;
    use rstest::rstest;
    use serde_json::json;

    fn write(records: Vec<Record>, compression: Compression) -> Vec<u8> {
        let mut out = Vec::new();
        let mut sink = JsonSink::new(&mut out, compression);
        for record in records {
            sink.put(record).unwrap();
        }
        sink.finish().unwrap();
        out
    }

    #[test]
    fn test_all_in_one_shape() {
        let out = write(
            vec![
                Record::json(RecordType::MetaData, json!({"version": 1})),
                Record::json(RecordType::Styles, json!([])),
                Record::json(RecordType::Books, json!([{"uuid": "b1", "title": "One"}])),
            ],
            Compression::None,
        );
        let document: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(
            document,
            json!({"bindery": {"metadata": {"version": 1}, "data": {"styles": [], "books": [{"uuid": "b1", "title": "One"}]}}})
        );
    }

    #[rstest]
    #[case::flat(json!({"books": [], "styles": [], "covers": [], "unknown": 1}), &[RecordType::Books, RecordType::Styles])]
    #[case::wrapped(json!({"bindery": {"metadata": {}, "data": {}}}), &[RecordType::MetaData, RecordType::AutoDetect])]
    #[case::empty(json!({}), &[])]
    fn test_entries(#[case] document: Value, #[case] expected: &[RecordType]) {
        let source = JsonSource::from_document(document).unwrap();
        let mut types: Vec<RecordType> = source.entries().iter().map(|e| e.record_type).collect();
        let mut expected = expected.to_vec();
        types.sort();
        expected.sort();
        assert_eq!(types, expected);
    }

    #[test]
    fn test_not_an_object() {
        let err = JsonSource::from_document(json!([1, 2])).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidArchive));
    }

    #[rstest]
    #[case::plain(Compression::None)]
    #[case::gzip(Compression::Gzip)]
    #[case::bzip2(Compression::Bzip2)]
    #[tokio::test]
    async fn test_compressed_document(#[case] compression: Compression) {
        let out = write(vec![Record::json(RecordType::Styles, json!([{"uuid": "s"}]))], compression);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup.json");
        std::fs::write(&path, out).unwrap();

        let mut source = JsonSource::open(&path).unwrap();
        let entry = source.entries()[0].clone();
        assert_eq!(entry.record_type, RecordType::AutoDetect);
        let record = source.load(&entry).await.unwrap();
        assert!(matches!(record.payload, Payload::Json(_)));
        assert_eq!(record.into_json().unwrap(), json!({"styles": [{"uuid": "s"}]}));
    }

    #[test]
    fn test_deeply_nested_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.json");
        let document = format!("{{\"books\": {}{}}}", "[".repeat(1000), "]".repeat(1000));
        std::fs::write(&path, document).unwrap();
        let err = JsonSource::open(&path).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidArchive));
    }
}
