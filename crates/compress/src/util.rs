use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};

impl Display for Compression {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl AsRef<str> for Compression {
    fn as_ref(&self) -> &'static str {
        self.as_str()
    }
}

impl Compression {
    /// Returns the file extension for this compression format.
    #[inline]
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Bzip2 => ".bz2",
            Compression::Gzip => ".gz",
        }
    }

    /// Returns the short name for configuration (for displaying to user)
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Bzip2 => "bzip2",
            Compression::Gzip => "gzip",
        }
    }

    /// Remove the compression suffix from a file name, exposing the inner
    /// container's extension.
    ///
    /// The TAR shorthands `.tgz` and `.tbz2` become `.tar`. Paths without a
    /// compression suffix are returned unchanged.
    ///
    /// ```
    /// use bindery_compress::Compression;
    /// use std::path::Path;
    ///
    /// assert_eq!(Compression::strip_extension("backup.tar.gz"), Path::new("backup.tar"));
    /// assert_eq!(Compression::strip_extension("backup.tgz"), Path::new("backup.tar"));
    /// assert_eq!(Compression::strip_extension("backup.zip"), Path::new("backup.zip"));
    /// ```
    #[must_use]
    pub fn strip_extension(path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
            return path.to_path_buf();
        };
        match ext.to_lowercase().as_str() {
            "tgz" | "tbz2" => path.with_extension("tar"),
            "gz" | "bz2" => path.with_extension(""),
            _ => path.to_path_buf(),
        }
    }
}
