use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use time::UtcDateTime;

/// A book author. Stored as part of the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub family_name: String,
    #[serde(default)]
    pub given_names: String,
}
impl Author {
    pub fn new(family_name: impl Into<String>, given_names: impl Into<String>) -> Self {
        Self { family_name: family_name.into(), given_names: given_names.into() }
    }
}
impl Display for Author {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.given_names.is_empty() {
            true => write!(f, "{}", self.family_name),
            false => write!(f, "{} {}", self.given_names, self.family_name),
        }
    }
}

/// Membership of a book in a series, with the book's (free-form) number in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
}
impl Series {
    pub fn new(title: impl Into<String>, number: Option<&str>) -> Self {
        Self { title: title.into(), number: number.map(str::to_string) }
    }
}

/// Link between a local book and its copy in a Calibre library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibreLink {
    /// UUID of the Calibre library (see [`CalibreLibrary`](crate::CalibreLibrary)).
    pub library_uuid: String,
    /// Calibre's numeric id for the book.
    pub book_id: i64,
    /// Calibre's UUID for the book.
    pub book_uuid: String,
}

/// A book in the catalogue.
///
/// `id` is local to one database and means nothing anywhere else; `uuid` is
/// the identity that survives export and import. Timestamps are kept at
/// whole-second precision.
#[derive(Debug, Clone, PartialEq)]
pub struct Book {
    pub id: Option<i64>,
    pub uuid: String,
    pub title: String,
    pub isbn: Option<String>,
    pub authors: Vec<Author>,
    pub series: Vec<Series>,
    pub publishers: Vec<String>,
    /// Names of the bookshelves the book is on.
    pub bookshelves: Vec<String>,
    pub description: Option<String>,
    pub page_count: Option<u32>,
    pub language: Option<String>,
    pub rating: Option<f64>,
    pub read: bool,
    pub notes: Option<String>,
    pub calibre: Option<CalibreLink>,
    pub date_added: UtcDateTime,
    pub last_updated: UtcDateTime,
}
impl Book {
    /// A new, unsaved book with a fresh UUID.
    pub fn new(title: impl Into<String>) -> Self {
        let now = UtcDateTime::now().truncate_to_second();
        Self {
            id: None,
            uuid: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            isbn: None,
            authors: Vec::new(),
            series: Vec::new(),
            publishers: Vec::new(),
            bookshelves: Vec::new(),
            description: None,
            page_count: None,
            language: None,
            rating: None,
            read: false,
            notes: None,
            calibre: None,
            date_added: now,
            last_updated: now,
        }
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct BookRow {
    pub(crate) id: i64,
    pub(crate) uuid: String,
    pub(crate) title: String,
    pub(crate) isbn: Option<String>,
    pub(crate) authors: String,
    pub(crate) series: String,
    pub(crate) publishers: String,
    pub(crate) description: Option<String>,
    pub(crate) page_count: Option<i64>,
    pub(crate) language: Option<String>,
    pub(crate) rating: Option<f64>,
    pub(crate) read: bool,
    pub(crate) notes: Option<String>,
    pub(crate) calibre_library_uuid: Option<String>,
    pub(crate) calibre_book_id: Option<i64>,
    pub(crate) calibre_book_uuid: Option<String>,
    pub(crate) date_added: i64,
    pub(crate) last_updated: i64,
    /// JSON array of bookshelf names, aggregated by the query.
    pub(crate) bookshelves: String,
}
impl TryFrom<&Book> for BookRow {
    type Error = Error;
    fn try_from(book: &Book) -> Result<Self, Self::Error> {
        let mut bookshelves = book.bookshelves.clone();
        bookshelves.sort();
        bookshelves.dedup();
        Ok(Self {
            id: book.id.unwrap_or_default(),
            uuid: book.uuid.clone(),
            title: book.title.clone(),
            isbn: book.isbn.clone(),
            authors: serde_json::to_string(&book.authors).or_raise(|| ErrorKind::InvalidData("authors"))?,
            series: serde_json::to_string(&book.series).or_raise(|| ErrorKind::InvalidData("series"))?,
            publishers: serde_json::to_string(&book.publishers).or_raise(|| ErrorKind::InvalidData("publishers"))?,
            description: book.description.clone(),
            page_count: book.page_count.map(i64::from),
            language: book.language.clone(),
            rating: book.rating,
            read: book.read,
            notes: book.notes.clone(),
            calibre_library_uuid: book.calibre.as_ref().map(|c| c.library_uuid.clone()),
            calibre_book_id: book.calibre.as_ref().map(|c| c.book_id),
            calibre_book_uuid: book.calibre.as_ref().map(|c| c.book_uuid.clone()),
            date_added: book.date_added.unix_timestamp(),
            last_updated: book.last_updated.unix_timestamp(),
            bookshelves: serde_json::to_string(&bookshelves).or_raise(|| ErrorKind::InvalidData("bookshelves"))?,
        })
    }
}
impl TryFrom<BookRow> for Book {
    type Error = Error;
    fn try_from(row: BookRow) -> Result<Self, Self::Error> {
        let calibre = match (row.calibre_library_uuid, row.calibre_book_id, row.calibre_book_uuid) {
            (Some(library_uuid), Some(book_id), Some(book_uuid)) => Some(CalibreLink { library_uuid, book_id, book_uuid }),
            _ => None,
        };
        let mut bookshelves: Vec<String> =
            serde_json::from_str(&row.bookshelves).or_raise(|| ErrorKind::InvalidData("bookshelves"))?;
        bookshelves.sort();
        Ok(Self {
            id: Some(row.id),
            uuid: row.uuid,
            title: row.title,
            isbn: row.isbn,
            authors: serde_json::from_str(&row.authors).or_raise(|| ErrorKind::InvalidData("authors"))?,
            series: serde_json::from_str(&row.series).or_raise(|| ErrorKind::InvalidData("series"))?,
            publishers: serde_json::from_str(&row.publishers).or_raise(|| ErrorKind::InvalidData("publishers"))?,
            bookshelves,
            description: row.description,
            page_count: row.page_count.map(u32::try_from).transpose().or_raise(|| ErrorKind::InvalidData("page count"))?,
            language: row.language,
            rating: row.rating,
            read: row.read,
            notes: row.notes,
            calibre,
            date_added: UtcDateTime::from_unix_timestamp(row.date_added)
                .or_raise(|| ErrorKind::InvalidData("date added"))?,
            last_updated: UtcDateTime::from_unix_timestamp(row.last_updated)
                .or_raise(|| ErrorKind::InvalidData("last updated"))?,
        })
    }
}
