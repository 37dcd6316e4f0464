mod book;
mod structure;

pub use self::book::{Author, Book, CalibreLink, Series};
pub(crate) use self::book::BookRow;
pub use self::structure::{Bookshelf, CalibreCustomField, CalibreLibrary, Style};
pub(crate) use self::structure::{CalibreLibraryRow, StyleRow};
