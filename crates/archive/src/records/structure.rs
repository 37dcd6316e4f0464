//! Styles, bookshelves and Calibre mappings: JSON arrays of entities with
//! a natural key.

use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::ProgressListener;
use crate::results::{Counter, ImportResults};
use crate::timestamp;
use crate::upsert::{Decision, decide};
use crate::{ExportOptions, ExportResults, ImportOptions, RecordType};
use async_trait::async_trait;
use bindery_catalog::error::Result as CatalogResult;
use bindery_catalog::{Bookshelf, CalibreCustomField, CalibreLibrary, Repository, Style};
use exn::ResultExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::marker::PhantomData;
use time::UtcDateTime;

/// A structural entity as it appears in an archive, and how to find and
/// store it in the catalogue by its natural key.
#[async_trait]
pub(crate) trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const RECORD_TYPE: RecordType;

    async fn load_all(catalog: &Repository) -> CatalogResult<Vec<Self>>;
    async fn exists(&self, catalog: &Repository) -> CatalogResult<bool>;
    async fn insert(&self, catalog: &Repository) -> CatalogResult<()>;
    /// Replace the stored entity with the same natural key.
    async fn update(&self, catalog: &Repository) -> CatalogResult<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StyleEntity {
    uuid: String,
    name: String,
    #[serde(default)]
    preferred: bool,
    #[serde(default)]
    menu_position: i64,
    #[serde(default)]
    settings: Map<String, Value>,
}
impl StyleEntity {
    fn to_style(&self) -> Style {
        Style {
            id: None,
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            preferred: self.preferred,
            menu_position: self.menu_position,
            settings: self.settings.clone(),
        }
    }
}

#[async_trait]
impl Entity for StyleEntity {
    const RECORD_TYPE: RecordType = RecordType::Styles;

    async fn load_all(catalog: &Repository) -> CatalogResult<Vec<Self>> {
        let styles = catalog.list_styles().await?;
        Ok(styles
            .into_iter()
            .map(|style| Self {
                uuid: style.uuid,
                name: style.name,
                preferred: style.preferred,
                menu_position: style.menu_position,
                settings: style.settings,
            })
            .collect())
    }

    async fn exists(&self, catalog: &Repository) -> CatalogResult<bool> {
        Ok(catalog.find_style(&self.uuid).await?.is_some())
    }

    async fn insert(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.insert_style(&self.to_style()).await.map(drop)
    }

    async fn update(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.update_style(&self.to_style()).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct BookshelfEntity {
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    style_uuid: Option<String>,
}
impl BookshelfEntity {
    fn to_bookshelf(&self) -> Bookshelf {
        Bookshelf { id: None, name: self.name.clone(), style_uuid: self.style_uuid.clone() }
    }
}

#[async_trait]
impl Entity for BookshelfEntity {
    const RECORD_TYPE: RecordType = RecordType::Bookshelves;

    async fn load_all(catalog: &Repository) -> CatalogResult<Vec<Self>> {
        let shelves = catalog.list_bookshelves().await?;
        Ok(shelves.into_iter().map(|shelf| Self { name: shelf.name, style_uuid: shelf.style_uuid }).collect())
    }

    async fn exists(&self, catalog: &Repository) -> CatalogResult<bool> {
        Ok(catalog.find_bookshelf(&self.name).await?.is_some())
    }

    async fn insert(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.insert_bookshelf(&self.to_bookshelf()).await.map(drop)
    }

    async fn update(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.update_bookshelf(&self.to_bookshelf()).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CalibreLibraryEntity {
    uuid: String,
    library_id: String,
    name: String,
    #[serde(default, with = "timestamp::option", skip_serializing_if = "Option::is_none")]
    last_sync: Option<UtcDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bookshelf: Option<String>,
}
impl CalibreLibraryEntity {
    fn to_library(&self) -> CalibreLibrary {
        CalibreLibrary {
            id: None,
            uuid: self.uuid.clone(),
            library_id: self.library_id.clone(),
            name: self.name.clone(),
            last_sync: self.last_sync.map(UtcDateTime::truncate_to_second),
            bookshelf: self.bookshelf.clone(),
        }
    }
}

#[async_trait]
impl Entity for CalibreLibraryEntity {
    const RECORD_TYPE: RecordType = RecordType::CalibreLibraries;

    async fn load_all(catalog: &Repository) -> CatalogResult<Vec<Self>> {
        let libraries = catalog.list_calibre_libraries().await?;
        Ok(libraries
            .into_iter()
            .map(|library| Self {
                uuid: library.uuid,
                library_id: library.library_id,
                name: library.name,
                last_sync: library.last_sync,
                bookshelf: library.bookshelf,
            })
            .collect())
    }

    async fn exists(&self, catalog: &Repository) -> CatalogResult<bool> {
        Ok(catalog.find_calibre_library(&self.uuid).await?.is_some())
    }

    async fn insert(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.insert_calibre_library(&self.to_library()).await.map(drop)
    }

    async fn update(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.update_calibre_library(&self.to_library()).await
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct CalibreCustomFieldEntity {
    calibre_key: String,
    field_type: String,
    db_key: String,
}
impl CalibreCustomFieldEntity {
    fn to_field(&self) -> CalibreCustomField {
        CalibreCustomField {
            id: None,
            calibre_key: self.calibre_key.clone(),
            field_type: self.field_type.clone(),
            db_key: self.db_key.clone(),
        }
    }
}

#[async_trait]
impl Entity for CalibreCustomFieldEntity {
    const RECORD_TYPE: RecordType = RecordType::CalibreCustomFields;

    async fn load_all(catalog: &Repository) -> CatalogResult<Vec<Self>> {
        let fields = catalog.list_calibre_custom_fields().await?;
        Ok(fields
            .into_iter()
            .map(|field| Self { calibre_key: field.calibre_key, field_type: field.field_type, db_key: field.db_key })
            .collect())
    }

    async fn exists(&self, catalog: &Repository) -> CatalogResult<bool> {
        Ok(catalog.find_calibre_custom_field(&self.calibre_key).await?.is_some())
    }

    async fn insert(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.insert_calibre_custom_field(&self.to_field()).await.map(drop)
    }

    async fn update(&self, catalog: &Repository) -> CatalogResult<()> {
        catalog.update_calibre_custom_field(&self.to_field()).await
    }
}

/// Reads and writes one [`Entity`] type.
pub(crate) struct Structural<E>(PhantomData<fn() -> E>);
impl<E> Structural<E> {
    const fn new() -> Self {
        Self(PhantomData)
    }
}

pub(crate) static STYLES: Structural<StyleEntity> = Structural::new();
pub(crate) static BOOKSHELVES: Structural<BookshelfEntity> = Structural::new();
pub(crate) static CALIBRE_LIBRARIES: Structural<CalibreLibraryEntity> = Structural::new();
pub(crate) static CALIBRE_CUSTOM_FIELDS: Structural<CalibreCustomFieldEntity> = Structural::new();

/// Every entity of one type as a JSON array, with how many there were.
pub(crate) async fn export_entities<E: Entity>(catalog: &Repository) -> Result<(Value, u64)> {
    let entities = E::load_all(catalog).await.or_classify()?;
    let count = entities.len() as u64;
    let value = serde_json::to_value(entities).or_raise(|| ErrorKind::Decode(E::RECORD_TYPE))?;
    Ok((value, count))
}

#[async_trait]
impl<E: Entity> RecordReader for Structural<E> {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let entities: Vec<E> = serde_json::from_value(record.into_json()?).or_raise(|| ErrorKind::Decode(E::RECORD_TYPE))?;
        let catalog = ctx.catalog();
        let mut counter = Counter::default();
        let mut cancelled = false;
        for entity in entities {
            if progress.is_cancelled() {
                cancelled = true;
                break;
            }
            counter.processed += 1;
            // Structural entities carry no modification time, so they are
            // never newer than the local copy.
            match decide(options.policy, entity.exists(catalog).await.or_classify()?, false) {
                Decision::Insert => {
                    entity.insert(catalog).await.or_classify()?;
                    counter.created += 1;
                },
                Decision::Update => {
                    entity.update(catalog).await.or_classify()?;
                    counter.updated += 1;
                },
                Decision::Skip => counter.skipped += 1,
            }
        }
        tracing::info!(record = %E::RECORD_TYPE, %counter, "Imported structural record");
        Ok(ImportResults { cancelled, ..ImportResults::with_structural(E::RECORD_TYPE, counter) })
    }
}

#[async_trait]
impl<E: Entity> RecordWriter for Structural<E> {
    async fn write(
        &self,
        ctx: &Context,
        _options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        _progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let (value, count) = export_entities::<E>(ctx.catalog()).await?;
        sink.put(Record::json(E::RECORD_TYPE, value))?;
        Ok(ExportResults::with_structural(E::RECORD_TYPE, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::records::testing::{VecSink, empty_context};
    use crate::{ArchiveEncoding, RecordEncoding, UpdatePolicy};
    use rstest::rstest;
    use serde_json::json;

    async fn import(ctx: &Context, policy: UpdatePolicy, record: Record) -> Result<ImportResults> {
        let options = ImportOptions::default().with_policy(policy);
        let reader: &dyn RecordReader = match record.record_type {
            RecordType::Styles => &STYLES,
            RecordType::Bookshelves => &BOOKSHELVES,
            RecordType::CalibreLibraries => &CALIBRE_LIBRARIES,
            _ => &CALIBRE_CUSTOM_FIELDS,
        };
        reader.read(ctx, &options, record, &NoProgress).await
    }

    fn styles() -> Value {
        json!([
            {"uuid": "s-compact", "name": "Compact", "preferred": true, "menu_position": 1, "settings": {"columns": 3}},
            {"uuid": "s-full", "name": "Full"},
        ])
    }

    #[rstest]
    #[case::skip(UpdatePolicy::Skip, "Compact", Counter { processed: 2, created: 1, skipped: 1, ..Counter::default() })]
    #[case::only_newer(UpdatePolicy::OnlyNewer, "Compact", Counter { processed: 2, created: 1, skipped: 1, ..Counter::default() })]
    #[case::overwrite(UpdatePolicy::Overwrite, "Renamed", Counter { processed: 2, created: 1, updated: 1, ..Counter::default() })]
    #[tokio::test]
    async fn test_styles_policy(#[case] policy: UpdatePolicy, #[case] expected_name: &str, #[case] expected: Counter) {
        let ctx = empty_context().await;
        let first = json!([{"uuid": "s-compact", "name": "Compact"}]);
        import(&ctx, UpdatePolicy::Skip, Record::json(RecordType::Styles, first)).await.unwrap();

        let mut incoming = styles();
        incoming[0]["name"] = json!("Renamed");
        let results = import(&ctx, policy, Record::json(RecordType::Styles, incoming)).await.unwrap();
        assert_eq!(results.structural(RecordType::Styles), expected);
        let stored = ctx.catalog().find_style("s-compact").await.unwrap().unwrap();
        assert_eq!(stored.name, expected_name);
        assert_eq!(ctx.catalog().list_styles().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_round_trip_every_type() {
        let source = empty_context().await;
        import(&source, UpdatePolicy::Skip, Record::json(RecordType::Styles, styles())).await.unwrap();
        let shelves = json!([{"name": "Favourites", "style_uuid": "s-full"}, {"name": "To read"}]);
        import(&source, UpdatePolicy::Skip, Record::json(RecordType::Bookshelves, shelves)).await.unwrap();
        let libraries = json!([{
            "uuid": "lib-1", "library_id": "Calibre_Library", "name": "Calibre",
            "last_sync": "2025-03-01T12:00:00Z", "bookshelf": "Favourites"
        }]);
        import(&source, UpdatePolicy::Skip, Record::json(RecordType::CalibreLibraries, libraries)).await.unwrap();
        let fields = json!([{"calibre_key": "#read", "field_type": "bool", "db_key": "read"}]);
        import(&source, UpdatePolicy::Skip, Record::json(RecordType::CalibreCustomFields, fields)).await.unwrap();

        let target = empty_context().await;
        let options = ExportOptions::new(ArchiveEncoding::Zip);
        let writers: [&dyn RecordWriter; 4] = [&STYLES, &BOOKSHELVES, &CALIBRE_LIBRARIES, &CALIBRE_CUSTOM_FIELDS];
        let mut exported = ExportResults::default();
        for writer in writers {
            let mut sink = VecSink::default();
            let results =
                writer.write(&source, &options, &ExportResults::default(), &mut sink, &NoProgress).await.unwrap();
            exported = exported.merge(results);
            let record = sink.0.pop().unwrap();
            // Through bytes, the way a ZIP entry would carry it.
            let record = Record::bytes(record.record_type, RecordEncoding::Json, record.name.clone(), record.into_bytes().unwrap());
            import(&target, UpdatePolicy::Skip, record).await.unwrap();
        }
        assert_eq!((exported.styles, exported.bookshelves), (2, 2));
        assert_eq!((exported.calibre_libraries, exported.calibre_custom_fields), (1, 1));

        let library = target.catalog().find_calibre_library("lib-1").await.unwrap().unwrap();
        assert_eq!(library.bookshelf.as_deref(), Some("Favourites"));
        assert_eq!(library.last_sync, Some(UtcDateTime::from_unix_timestamp(1_740_830_400).unwrap()));
        let shelf = target.catalog().find_bookshelf("Favourites").await.unwrap().unwrap();
        assert_eq!(shelf.style_uuid.as_deref(), Some("s-full"));
        let style = target.catalog().find_style("s-compact").await.unwrap().unwrap();
        assert_eq!(style.settings.get("columns"), Some(&json!(3)));
        assert!(target.catalog().find_calibre_custom_field("#read").await.unwrap().is_some());
    }

    #[rstest]
    #[case::not_an_array(json!({"uuid": "s"}))]
    #[case::missing_key(json!([{"name": "No uuid"}]))]
    #[tokio::test]
    async fn test_malformed_payload_is_fatal(#[case] payload: Value) {
        let ctx = empty_context().await;
        let err = import(&ctx, UpdatePolicy::Skip, Record::json(RecordType::Styles, payload)).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode(RecordType::Styles)));
        assert!(ctx.catalog().list_styles().await.unwrap().is_empty());
    }
}
