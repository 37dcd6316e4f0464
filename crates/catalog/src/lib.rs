//! SQLite book catalogue.
//!
//! This crate owns the catalogue database: books and the structural entities
//! around them (bookshelves, styles, Calibre libraries and custom fields),
//! plus user preferences, certificates and a little bookkeeping.
//!
//! # Identity
//! Every entity has a stable natural key that means the same thing in every
//! copy of the catalogue:
//! - **Books**: UUID.
//! - **Bookshelves**: name.
//! - **Styles** and **Calibre libraries**: UUID.
//! - **Calibre custom fields**: Calibre lookup key.
//!
//! Numeric row ids are local to one database and are never exported.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{Author, Book, Bookshelf, CalibreCustomField, CalibreLibrary, CalibreLink, Series, Style};
pub use crate::repo::Repository;
