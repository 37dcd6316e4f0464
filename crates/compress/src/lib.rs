//! Compression detection for archive sources.
//!
//! Backups are usually handed around as plain files, but TAR and JSON
//! sources often arrive wrapped in gzip or bzip2 (`backup.tar.gz`,
//! `export.json.bz2`). This crate answers two questions for the archive
//! pipeline:
//!
//! - **Which wrapper is it?** From the file name ([`Compression::from_path`])
//!   or, more reliably, the first few bytes ([`Compression::from_magic_bytes`]).
//! - **What is underneath?** [`Compression::strip_extension`] removes the
//!   wrapper suffix so the inner container can be detected from its own
//!   extension, and [`Compression::wrap_reader`] unwraps the stream.
//!
//! Writing is in-memory only ([`Compression::compress`]); archives that are
//! compressed on export are serialized to a buffer first.

mod construct;
pub mod error;
mod ops;
mod util;

/// A supported compression wrapper. Defaults to [`None`](Self::None).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz, .tgz)
    Gzip,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::None);
    }
}
