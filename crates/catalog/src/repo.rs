//! Data access for every entity in the catalogue.
//!
//! Books are addressed by UUID from the outside, structural entities by
//! their natural key. Numeric ids never leave this database.

use crate::Database;
use crate::error::{DbResultExt, Error, ErrorKind, Result};
use crate::models::{
    Book, BookRow, Bookshelf, CalibreCustomField, CalibreLibrary, CalibreLibraryRow, Style, StyleRow,
};
use exn::ResultExt;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use sqlx::sqlite::Sqlite;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use time::UtcDateTime;

type BookQuery<'q> = sqlx::query::Query<'q, Sqlite, <Sqlite as sqlx::Database>::Arguments<'q>>;

const LAST_FULL_BACKUP: &str = "last_full_backup";

/// Bind the shared book columns, in the order used by both the insert and
/// update queries.
fn bind_book(query: BookQuery<'_>, row: BookRow) -> BookQuery<'_> {
    query
        .bind(row.uuid)
        .bind(row.title)
        .bind(row.isbn)
        .bind(row.authors)
        .bind(row.series)
        .bind(row.publishers)
        .bind(row.description)
        .bind(row.page_count)
        .bind(row.language)
        .bind(row.rating)
        .bind(row.read)
        .bind(row.notes)
        .bind(row.calibre_library_uuid)
        .bind(row.calibre_book_id)
        .bind(row.calibre_book_uuid)
        .bind(row.date_added)
        .bind(row.last_updated)
}

/// Create any missing bookshelves and place the book on them.
async fn link_bookshelves(conn: &mut SqliteConnection, book_id: i64, bookshelves: &[String]) -> Result<()> {
    for name in bookshelves {
        sqlx::query(include_str!("../queries/ensure_bookshelf.sql")).bind(name).execute(&mut *conn).await.or_db()?;
        sqlx::query(include_str!("../queries/link_book_bookshelf.sql"))
            .bind(book_id)
            .bind(name)
            .execute(&mut *conn)
            .await
            .or_db()?;
    }
    Ok(())
}

/// Repository for reading and writing the catalogue.
///
/// Every write that touches more than one table (a book and its bookshelf
/// links) runs in its own transaction, so a failure part way through an
/// import never leaves a half-written book behind.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // =========================================================================
    // Books
    // =========================================================================

    pub async fn find_book_by_uuid(&self, uuid: impl AsRef<str>) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book_by_uuid.sql"))
            .bind(uuid.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_db()?;
        row.map(Book::try_from).transpose()
    }

    /// Insert a new book, creating any bookshelves it names that don't exist
    /// yet. The book's `id` is ignored; the new one is returned.
    pub async fn insert_book(&self, book: &Book) -> Result<i64> {
        let row = BookRow::try_from(book)?;
        let bookshelves: Vec<String> = serde_json::from_str(&row.bookshelves).or_raise(|| ErrorKind::InvalidData("bookshelves"))?;
        let mut tx = self.pool.begin().await.or_db()?;
        let id = bind_book(sqlx::query(include_str!("../queries/insert_book.sql")), row)
            .execute(&mut *tx)
            .await
            .or_db()?
            .last_insert_rowid();
        link_bookshelves(&mut tx, id, &bookshelves).await?;
        tx.commit().await.or_db()?;
        Ok(id)
    }

    /// Replace every column of the book with the given `id`, and its
    /// bookshelf links, with the contents of `book`.
    pub async fn update_book(&self, id: i64, book: &Book) -> Result<()> {
        let row = BookRow::try_from(book)?;
        let bookshelves: Vec<String> = serde_json::from_str(&row.bookshelves).or_raise(|| ErrorKind::InvalidData("bookshelves"))?;
        let mut tx = self.pool.begin().await.or_db()?;
        let updated = bind_book(sqlx::query(include_str!("../queries/update_book.sql")), row)
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_db()?
            .rows_affected();
        if updated == 0 {
            exn::bail!(ErrorKind::InvalidData("no book with that id"));
        }
        sqlx::query("DELETE FROM book_bookshelves WHERE book_id = ?").bind(id).execute(&mut *tx).await.or_db()?;
        link_bookshelves(&mut tx, id, &bookshelves).await?;
        tx.commit().await.or_db()?;
        Ok(())
    }

    /// Returns `true` if a book was deleted.
    pub async fn delete_book(&self, uuid: impl AsRef<str>) -> Result<bool> {
        let result = sqlx::query("DELETE FROM books WHERE uuid = ?").bind(uuid.as_ref()).execute(&self.pool).await.or_db()?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of books, optionally only those updated after `since`.
    pub async fn count_books(&self, since: Option<UtcDateTime>) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as(include_str!("../queries/count_books.sql"))
            .bind(since.map(|t| t.unix_timestamp()))
            .fetch_one(&self.pool)
            .await
            .or_db()?;
        u64::try_from(count).or_raise(|| ErrorKind::InvalidData("book count"))
    }

    /// Stream books in insertion order, optionally only those updated after
    /// `since`.
    ///
    /// The stream holds a pooled connection until it is dropped.
    pub fn stream_books(&self, since: Option<UtcDateTime>) -> BoxStream<'_, Result<Book>> {
        sqlx::query_as::<_, BookRow>(include_str!("../queries/list_books.sql"))
            .bind(since.map(|t| t.unix_timestamp()))
            .fetch(&self.pool)
            .map(|row| row.or_db().and_then(Book::try_from))
            .boxed()
    }

    // =========================================================================
    // Bookshelves
    // =========================================================================

    pub async fn list_bookshelves(&self) -> Result<Vec<Bookshelf>> {
        sqlx::query_as(include_str!("../queries/list_bookshelves.sql")).fetch_all(&self.pool).await.or_db()
    }

    pub async fn find_bookshelf(&self, name: impl AsRef<str>) -> Result<Option<Bookshelf>> {
        sqlx::query_as("SELECT id, name, style_uuid FROM bookshelves WHERE name = ?")
            .bind(name.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_db()
    }

    pub async fn insert_bookshelf(&self, bookshelf: &Bookshelf) -> Result<i64> {
        let result = sqlx::query("INSERT INTO bookshelves (name, style_uuid) VALUES (?, ?)")
            .bind(&bookshelf.name)
            .bind(&bookshelf.style_uuid)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(result.last_insert_rowid())
    }

    /// Update the bookshelf with the same name.
    pub async fn update_bookshelf(&self, bookshelf: &Bookshelf) -> Result<()> {
        sqlx::query("UPDATE bookshelves SET style_uuid = ? WHERE name = ?")
            .bind(&bookshelf.style_uuid)
            .bind(&bookshelf.name)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }

    // =========================================================================
    // Calibre
    // =========================================================================

    pub async fn list_calibre_libraries(&self) -> Result<Vec<CalibreLibrary>> {
        let rows: Vec<CalibreLibraryRow> =
            sqlx::query_as(include_str!("../queries/list_calibre_libraries.sql")).fetch_all(&self.pool).await.or_db()?;
        rows.into_iter().map(CalibreLibrary::try_from).collect()
    }

    pub async fn find_calibre_library(&self, uuid: impl AsRef<str>) -> Result<Option<CalibreLibrary>> {
        let row: Option<CalibreLibraryRow> = sqlx::query_as(
            "SELECT id, uuid, library_id, name, last_sync, bookshelf FROM calibre_libraries WHERE uuid = ?",
        )
        .bind(uuid.as_ref())
        .fetch_optional(&self.pool)
        .await
        .or_db()?;
        row.map(CalibreLibrary::try_from).transpose()
    }

    pub async fn insert_calibre_library(&self, library: &CalibreLibrary) -> Result<i64> {
        let result = sqlx::query(include_str!("../queries/insert_calibre_library.sql"))
            .bind(&library.uuid)
            .bind(&library.library_id)
            .bind(&library.name)
            .bind(library.last_sync.map(|t| t.unix_timestamp()))
            .bind(&library.bookshelf)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(result.last_insert_rowid())
    }

    /// Update the library with the same UUID.
    pub async fn update_calibre_library(&self, library: &CalibreLibrary) -> Result<()> {
        sqlx::query(include_str!("../queries/update_calibre_library.sql"))
            .bind(&library.library_id)
            .bind(&library.name)
            .bind(library.last_sync.map(|t| t.unix_timestamp()))
            .bind(&library.bookshelf)
            .bind(&library.uuid)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }

    pub async fn list_calibre_custom_fields(&self) -> Result<Vec<CalibreCustomField>> {
        sqlx::query_as(include_str!("../queries/list_calibre_custom_fields.sql")).fetch_all(&self.pool).await.or_db()
    }

    pub async fn find_calibre_custom_field(&self, calibre_key: impl AsRef<str>) -> Result<Option<CalibreCustomField>> {
        sqlx::query_as("SELECT id, calibre_key, field_type, db_key FROM calibre_custom_fields WHERE calibre_key = ?")
            .bind(calibre_key.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_db()
    }

    pub async fn insert_calibre_custom_field(&self, field: &CalibreCustomField) -> Result<i64> {
        let result = sqlx::query("INSERT INTO calibre_custom_fields (calibre_key, field_type, db_key) VALUES (?, ?, ?)")
            .bind(&field.calibre_key)
            .bind(&field.field_type)
            .bind(&field.db_key)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(result.last_insert_rowid())
    }

    /// Update the custom field with the same Calibre key.
    pub async fn update_calibre_custom_field(&self, field: &CalibreCustomField) -> Result<()> {
        sqlx::query("UPDATE calibre_custom_fields SET field_type = ?, db_key = ? WHERE calibre_key = ?")
            .bind(&field.field_type)
            .bind(&field.db_key)
            .bind(&field.calibre_key)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }

    // =========================================================================
    // Styles
    // =========================================================================

    pub async fn list_styles(&self) -> Result<Vec<Style>> {
        let rows: Vec<StyleRow> = sqlx::query_as(include_str!("../queries/list_styles.sql")).fetch_all(&self.pool).await.or_db()?;
        rows.into_iter().map(Style::try_from).collect()
    }

    pub async fn find_style(&self, uuid: impl AsRef<str>) -> Result<Option<Style>> {
        let row: Option<StyleRow> =
            sqlx::query_as("SELECT id, uuid, name, preferred, menu_position, settings FROM styles WHERE uuid = ?")
                .bind(uuid.as_ref())
                .fetch_optional(&self.pool)
                .await
                .or_db()?;
        row.map(Style::try_from).transpose()
    }

    pub async fn insert_style(&self, style: &Style) -> Result<i64> {
        let settings = serde_json::to_string(&style.settings).or_raise(|| ErrorKind::InvalidData("style settings"))?;
        let result = sqlx::query(include_str!("../queries/insert_style.sql"))
            .bind(&style.uuid)
            .bind(&style.name)
            .bind(style.preferred)
            .bind(style.menu_position)
            .bind(settings)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(result.last_insert_rowid())
    }

    /// Update the style with the same UUID.
    pub async fn update_style(&self, style: &Style) -> Result<()> {
        let settings = serde_json::to_string(&style.settings).or_raise(|| ErrorKind::InvalidData("style settings"))?;
        sqlx::query(include_str!("../queries/update_style.sql"))
            .bind(&style.name)
            .bind(style.preferred)
            .bind(style.menu_position)
            .bind(settings)
            .bind(&style.uuid)
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }

    // =========================================================================
    // Preferences, certificates and bookkeeping
    // =========================================================================

    pub async fn get_preferences(&self) -> Result<BTreeMap<String, Value>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM preferences").fetch_all(&self.pool).await.or_db()?;
        rows.into_iter()
            .map(|(key, value)| {
                let value: Value = serde_json::from_str(&value).or_raise(|| ErrorKind::InvalidData("preference value"))?;
                Ok::<_, Error>((key, value))
            })
            .collect()
    }

    /// Store the given preferences, replacing existing values with the same
    /// key. Keys not mentioned are left alone.
    pub async fn upsert_preferences(&self, preferences: &BTreeMap<String, Value>) -> Result<()> {
        let mut tx = self.pool.begin().await.or_db()?;
        for (key, value) in preferences {
            let value = serde_json::to_string(value).or_raise(|| ErrorKind::InvalidData("preference value"))?;
            sqlx::query(include_str!("../queries/upsert_preference.sql"))
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await
                .or_db()?;
        }
        tx.commit().await.or_db()
    }

    pub async fn get_certificate(&self, name: impl AsRef<str>) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT pem FROM certificates WHERE name = ?")
            .bind(name.as_ref())
            .fetch_optional(&self.pool)
            .await
            .or_db()?;
        Ok(row.map(|(pem,)| pem))
    }

    pub async fn set_certificate(&self, name: impl AsRef<str>, pem: impl AsRef<str>) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_certificate.sql"))
            .bind(name.as_ref())
            .bind(pem.as_ref())
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }

    /// When the last complete backup of the catalogue was made, if ever.
    pub async fn last_full_backup(&self) -> Result<Option<UtcDateTime>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM bookkeeping WHERE key = ?")
            .bind(LAST_FULL_BACKUP)
            .fetch_optional(&self.pool)
            .await
            .or_db()?;
        let Some((value,)) = row else {
            return Ok(None);
        };
        let seconds = value.parse::<i64>().or_raise(|| ErrorKind::InvalidData("last full backup"))?;
        UtcDateTime::from_unix_timestamp(seconds).map(Some).or_raise(|| ErrorKind::InvalidData("last full backup"))
    }

    pub async fn set_last_full_backup(&self, timestamp: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_bookkeeping.sql"))
            .bind(LAST_FULL_BACKUP)
            .bind(timestamp.unix_timestamp().to_string())
            .execute(&self.pool)
            .await
            .or_db()?;
        Ok(())
    }
}
