//! Catalogue entities that organise books rather than describe them.
//!
//! Each has a natural key that is stable across installs (name, UUID or
//! Calibre key); the numeric `id` is local to one database.

use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use serde_json::{Map, Value};
use time::UtcDateTime;

/// A named shelf books can be placed on. Natural key: `name`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Bookshelf {
    #[sqlx(default)]
    pub id: Option<i64>,
    pub name: String,
    /// Display style used when browsing the shelf.
    pub style_uuid: Option<String>,
}
impl Bookshelf {
    pub fn new(name: impl Into<String>) -> Self {
        Self { id: None, name: name.into(), style_uuid: None }
    }
}

/// A Calibre library this catalogue syncs with. Natural key: `uuid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibreLibrary {
    pub id: Option<i64>,
    pub uuid: String,
    /// Calibre's own identifier for the library (its folder name).
    pub library_id: String,
    pub name: String,
    pub last_sync: Option<UtcDateTime>,
    /// Bookshelf that books synced from this library land on.
    pub bookshelf: Option<String>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct CalibreLibraryRow {
    pub(crate) id: i64,
    pub(crate) uuid: String,
    pub(crate) library_id: String,
    pub(crate) name: String,
    pub(crate) last_sync: Option<i64>,
    pub(crate) bookshelf: Option<String>,
}
impl TryFrom<CalibreLibraryRow> for CalibreLibrary {
    type Error = Error;
    fn try_from(row: CalibreLibraryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            uuid: row.uuid,
            library_id: row.library_id,
            name: row.name,
            last_sync: row
                .last_sync
                .map(UtcDateTime::from_unix_timestamp)
                .transpose()
                .or_raise(|| ErrorKind::InvalidData("last sync"))?,
            bookshelf: row.bookshelf,
        })
    }
}

/// Mapping of a Calibre custom column to a local field. Natural key:
/// `calibre_key`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CalibreCustomField {
    #[sqlx(default)]
    pub id: Option<i64>,
    /// Calibre's lookup name, e.g. `#read`.
    pub calibre_key: String,
    /// Calibre's datatype, e.g. `bool`, `comments`.
    pub field_type: String,
    /// Local column the value is synced into.
    pub db_key: String,
}

/// A display style. Natural key: `uuid`.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub id: Option<i64>,
    pub uuid: String,
    pub name: String,
    pub preferred: bool,
    pub menu_position: i64,
    /// Free-form style settings.
    pub settings: Map<String, Value>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct StyleRow {
    pub(crate) id: i64,
    pub(crate) uuid: String,
    pub(crate) name: String,
    pub(crate) preferred: bool,
    pub(crate) menu_position: i64,
    pub(crate) settings: String,
}
impl TryFrom<StyleRow> for Style {
    type Error = Error;
    fn try_from(row: StyleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Some(row.id),
            uuid: row.uuid,
            name: row.name,
            preferred: row.preferred,
            menu_position: row.menu_position,
            settings: serde_json::from_str(&row.settings).or_raise(|| ErrorKind::InvalidData("style settings"))?,
        })
    }
}
