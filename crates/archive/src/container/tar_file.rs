//! TAR archives, optionally gzip or bzip2 compressed. Same entry layout as
//! ZIP. Read only.
//!
//! TAR has no central directory, so the recognised entries are read into
//! memory while the archive is scanned once.

use super::zip_file::entry_record_name;
use super::{Entry, RecordSource};
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::RecordType;
use crate::records::Record;
use async_trait::async_trait;
use bindery_compress::Compression;
use exn::{Exn, ResultExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use time::UtcDateTime;

pub(crate) struct TarSource {
    entries: Vec<Entry>,
    data: Vec<Option<Vec<u8>>>,
}

impl TarSource {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let mut head = [0u8; 4];
        let read = File::open(path).or_classify()?.read(&mut head).or_classify()?;
        let compression = Compression::from_magic_bytes(&head[..read]);
        let file = BufReader::new(File::open(path).or_classify()?);
        Self::scan(compression.wrap_reader(file))
    }

    fn scan(reader: impl Read) -> Result<Self> {
        let mut archive = tar::Archive::new(reader);
        let mut source = Self { entries: Vec::new(), data: Vec::new() };
        for entry in archive.entries().or_raise(|| ErrorKind::InvalidArchive)? {
            let mut entry = entry.or_raise(|| ErrorKind::InvalidArchive)?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry.path().or_raise(|| ErrorKind::InvalidArchive)?.to_string_lossy().into_owned();
            let Some((record_type, encoding)) = RecordType::from_entry_name(&name) else {
                tracing::debug!(entry = %name, "Skipping unrecognised TAR entry");
                continue;
            };
            let modified = entry
                .header()
                .mtime()
                .ok()
                .and_then(|mtime| i64::try_from(mtime).ok())
                .and_then(|mtime| UtcDateTime::from_unix_timestamp(mtime).ok())
                .filter(|mtime| mtime.unix_timestamp() > 0);
            let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or_default());
            entry.read_to_end(&mut data).or_raise(|| ErrorKind::InvalidArchive)?;
            source.entries.push(Entry {
                record_type,
                encoding,
                name: entry_record_name(record_type, &name),
                modified,
                index: source.data.len(),
            });
            source.data.push(Some(data));
        }
        Ok(source)
    }
}

#[async_trait]
impl RecordSource for TarSource {
    fn entries(&self) -> &[Entry] {
        &self.entries
    }

    async fn load(&mut self, entry: &Entry) -> Result<Record> {
        let data = self
            .data
            .get_mut(entry.index)
            .and_then(Option::take)
            .ok_or_else(|| Exn::new(ErrorKind::InvalidArchive))?;
        let record = Record::bytes(entry.record_type, entry.encoding, entry.name.clone(), data);
        Ok(match entry.modified {
            Some(modified) => record.modified(modified),
            None => record,
        })
    }
}
