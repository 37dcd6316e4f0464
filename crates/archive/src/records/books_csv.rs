//! Books as CSV: one header row, then one row per book.
//!
//! List cells (authors, series, publishers, bookshelves) are separated with
//! `|`; a literal `|` or `\` inside an item is escaped with `\`. Authors are
//! written `Family, Given` and series `Title #number`. Columns are matched
//! by header name when reading, so their order doesn't matter and unknown
//! columns are ignored.

use super::books::{BookImporter, BookProxy, CalibreProxy, RowError, collect_books};
use super::{Record, RecordReader, RecordSink, RecordWriter};
use crate::context::Context;
use crate::error::{ClassifyExt, ErrorKind, Result};
use crate::progress::ProgressListener;
use crate::timestamp;
use crate::{ExportOptions, ExportResults, ImportOptions, ImportResults, RecordEncoding, RecordType};
use async_trait::async_trait;
use bindery_catalog::{Author, Book, Series};
use csv::StringRecord;
use exn::ResultExt;
use std::collections::HashMap;

const HEADER: [&str; 19] = [
    "id",
    "uuid",
    "title",
    "isbn",
    "authors",
    "series",
    "publishers",
    "bookshelves",
    "description",
    "pages",
    "language",
    "rating",
    "read",
    "notes",
    "calibre_library_uuid",
    "calibre_book_id",
    "calibre_book_uuid",
    "date_added",
    "last_updated",
];
const SEPARATOR: char = '|';
const ESCAPE: char = '\\';
const BOM: char = '\u{feff}';

pub(crate) struct CsvBooks;

fn join_list<S: AsRef<str>>(items: impl IntoIterator<Item = S>) -> String {
    let mut cell = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            cell.push(SEPARATOR);
        }
        for c in item.as_ref().chars() {
            if c == SEPARATOR || c == ESCAPE {
                cell.push(ESCAPE);
            }
            cell.push(c);
        }
    }
    cell
}

fn split_list(cell: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut item = String::new();
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        match c {
            ESCAPE => item.extend(chars.next()),
            SEPARATOR => items.push(std::mem::take(&mut item)),
            _ => item.push(c),
        }
    }
    items.push(item);
    items.into_iter().map(|item| item.trim().to_string()).filter(|item| !item.is_empty()).collect()
}

fn format_author(author: &Author) -> String {
    match author.given_names.is_empty() {
        true => author.family_name.clone(),
        false => format!("{}, {}", author.family_name, author.given_names),
    }
}

fn parse_author(s: &str) -> Author {
    match s.split_once(", ") {
        Some((family, given)) => Author::new(family.trim(), given.trim()),
        None => Author::new(s, ""),
    }
}

fn format_series(series: &Series) -> String {
    match &series.number {
        Some(number) => format!("{} #{number}", series.title),
        None => series.title.clone(),
    }
}

fn parse_series(s: &str) -> Series {
    match s.rsplit_once(" #") {
        Some((title, number)) if !number.trim().is_empty() => Series::new(title.trim(), Some(number.trim())),
        _ => Series::new(s, None),
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn encode_row(book: &Book) -> Result<Vec<String>> {
    let format = |t| timestamp::format(t).or_raise(|| ErrorKind::Decode(RecordType::Books));
    let calibre = book.calibre.as_ref();
    Ok(vec![
        book.id.map(|id| id.to_string()).unwrap_or_default(),
        book.uuid.clone(),
        book.title.clone(),
        book.isbn.clone().unwrap_or_default(),
        join_list(book.authors.iter().map(format_author)),
        join_list(book.series.iter().map(format_series)),
        join_list(&book.publishers),
        join_list(&book.bookshelves),
        book.description.clone().unwrap_or_default(),
        book.page_count.map(|pages| pages.to_string()).unwrap_or_default(),
        book.language.clone().unwrap_or_default(),
        book.rating.map(|rating| rating.to_string()).unwrap_or_default(),
        if book.read { "1" } else { "0" }.to_string(),
        book.notes.clone().unwrap_or_default(),
        calibre.map(|link| link.library_uuid.clone()).unwrap_or_default(),
        calibre.map(|link| link.book_id.to_string()).unwrap_or_default(),
        calibre.map(|link| link.book_uuid.clone()).unwrap_or_default(),
        format(book.date_added)?,
        format(book.last_updated)?,
    ])
}

/// Column positions by header name.
struct Columns(HashMap<String, usize>);

impl Columns {
    fn new(header: &StringRecord) -> Self {
        let columns = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim_start_matches(BOM).trim().to_ascii_lowercase(), i))
            .collect();
        Self(columns)
    }

    fn has(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// A non-empty cell.
    fn get<'r>(&self, row: &'r StringRecord, name: &str) -> Option<&'r str> {
        let i = *self.0.get(name)?;
        row.get(i).map(str::trim).filter(|cell| !cell.is_empty())
    }

    fn string(&self, row: &StringRecord, name: &str) -> Option<String> {
        self.get(row, name).map(str::to_string)
    }

    fn list(&self, row: &StringRecord, name: &str) -> Vec<String> {
        self.get(row, name).map(split_list).unwrap_or_default()
    }

    fn parsed<T: std::str::FromStr>(&self, row: &StringRecord, name: &str) -> std::result::Result<Option<T>, String> {
        self.get(row, name)
            .map(|cell| cell.parse().map_err(|_| format!("invalid {name} \"{cell}\"")))
            .transpose()
    }

    fn timestamp(&self, row: &StringRecord, name: &str) -> std::result::Result<Option<time::UtcDateTime>, String> {
        self.get(row, name)
            .map(|cell| timestamp::parse(cell).map_err(|err| format!("invalid {name} \"{cell}\": {err}")))
            .transpose()
    }

    fn decode(&self, row: &StringRecord) -> std::result::Result<BookProxy, RowError> {
        let uuid = self.string(row, "uuid").unwrap_or_default();
        let key = Some(uuid.clone()).filter(|uuid| !uuid.is_empty());
        let fail = |reason: String| RowError::new(key.clone(), reason);
        let calibre = match (
            self.string(row, "calibre_library_uuid"),
            self.parsed::<i64>(row, "calibre_book_id").map_err(fail)?,
            self.string(row, "calibre_book_uuid"),
        ) {
            (Some(library_uuid), Some(book_id), Some(book_uuid)) => Some(CalibreProxy { library_uuid, book_id, book_uuid }),
            _ => None,
        };
        let read = match self.get(row, "read") {
            Some(cell) => parse_bool(cell).ok_or_else(|| fail(format!("invalid read \"{cell}\"")))?,
            None => false,
        };
        Ok(BookProxy {
            uuid,
            title: self.string(row, "title").unwrap_or_default(),
            isbn: self.string(row, "isbn"),
            authors: self.list(row, "authors").iter().map(|s| parse_author(s)).collect(),
            series: self.list(row, "series").iter().map(|s| parse_series(s)).collect(),
            publishers: self.list(row, "publishers"),
            bookshelves: self.list(row, "bookshelves"),
            description: self.string(row, "description"),
            page_count: self.parsed(row, "pages").map_err(fail)?,
            language: self.string(row, "language"),
            rating: self.parsed(row, "rating").map_err(fail)?,
            read,
            notes: self.string(row, "notes"),
            calibre,
            date_added: self.timestamp(row, "date_added").map_err(fail)?,
            last_updated: self.timestamp(row, "last_updated").map_err(fail)?,
        })
    }
}

#[async_trait]
impl RecordReader for CsvBooks {
    async fn read(
        &self,
        ctx: &Context,
        options: &ImportOptions,
        record: Record,
        progress: &dyn ProgressListener,
    ) -> Result<ImportResults> {
        let bytes = record.into_bytes()?;
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(bytes.as_slice());
        let columns = Columns::new(reader.headers().or_classify()?);
        if !columns.has("title") {
            exn::bail!(ErrorKind::Decode(RecordType::Books));
        }
        let rows: Vec<_> = reader.records().collect();
        let mut importer = BookImporter::new(ctx, options, progress, rows.len() as u64).await?;
        for row in rows {
            if importer.is_cancelled() {
                break;
            }
            let decoded = match row {
                Ok(row) => columns.decode(&row).and_then(BookProxy::into_incoming),
                Err(err) if err.is_io_error() => return Err(err).or_classify(),
                Err(err) => Err(RowError::new(None, err.to_string())),
            };
            importer.import(decoded).await?;
        }
        Ok(importer.finish())
    }
}

#[async_trait]
impl RecordWriter for CsvBooks {
    async fn write(
        &self,
        ctx: &Context,
        options: &ExportOptions,
        _written: &ExportResults,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressListener,
    ) -> Result<ExportResults> {
        let (books, results) = collect_books(ctx, options.since, progress).await?;
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(HEADER).or_classify()?;
        for book in &books {
            writer.write_record(encode_row(book)?).or_classify()?;
        }
        let data = writer.into_inner().map_err(|err| err.into_error()).or_classify()?;
        sink.put(Record::bytes(RecordType::Books, RecordEncoding::Csv, "books.csv", data))?;
        tracing::info!(books = results.books_exported(), "Exported books as CSV");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UpdatePolicy;
    use crate::progress::NoProgress;
    use crate::records::testing::{VecSink, book, empty_context};
    use crate::ArchiveEncoding;
    use crate::results::Counter;
    use rstest::rstest;

    #[rstest]
    #[case(&[], "")]
    #[case(&["Tor"], "Tor")]
    #[case(&["Tor", "Gollancz"], "Tor|Gollancz")]
    #[case(&["A|B", "C\\D"], "A\\|B|C\\\\D")]
    fn test_list_cells(#[case] items: &[&str], #[case] cell: &str) {
        assert_eq!(join_list(items), cell);
        assert_eq!(split_list(cell), items.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    }

    #[rstest]
    #[case("Le Guin, Ursula K.", "Le Guin", "Ursula K.")]
    #[case("Plato", "Plato", "")]
    fn test_authors(#[case] cell: &str, #[case] family: &str, #[case] given: &str) {
        let author = parse_author(cell);
        assert_eq!(author, Author::new(family, given));
        assert_eq!(format_author(&author), cell);
    }

    #[rstest]
    #[case("Earthsea #1", "Earthsea", Some("1"))]
    #[case("Discworld #2.5", "Discworld", Some("2.5"))]
    #[case("Standalone", "Standalone", None)]
    #[case("Catch #", "Catch #", None)]
    fn test_series(#[case] cell: &str, #[case] title: &str, #[case] number: Option<&str>) {
        assert_eq!(parse_series(cell), Series::new(title, number));
    }

    async fn export(ctx: &Context) -> Vec<u8> {
        let mut sink = VecSink::default();
        let options = ExportOptions::new(ArchiveEncoding::Csv);
        CsvBooks.write(ctx, &options, &ExportResults::default(), &mut sink, &NoProgress).await.unwrap();
        sink.0.pop().unwrap().into_bytes().unwrap()
    }

    async fn import(ctx: &Context, policy: UpdatePolicy, data: &[u8]) -> ImportResults {
        let options = ImportOptions::default().with_policy(policy);
        let record = Record::bytes(RecordType::Books, RecordEncoding::Csv, "books.csv", data.to_vec());
        CsvBooks.read(ctx, &options, record, &NoProgress).await.unwrap()
    }

    #[tokio::test]
    async fn test_header_and_rows() {
        let ctx = empty_context().await;
        let mut original = book(1);
        original.authors = vec![Author::new("Le Guin", "Ursula K."), Author::new("Plato", "")];
        original.bookshelves = vec!["Sci|Fi".to_string()];
        original.read = true;
        ctx.catalog().insert_book(&original).await.unwrap();

        let data = String::from_utf8(export(&ctx).await).unwrap();
        let mut lines = data.lines();
        assert_eq!(lines.next().unwrap(), HEADER.join(","));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Le Guin, Ursula K.|Plato\""));
        assert!(row.contains("Sci\\|Fi"));
        assert!(row.contains("2023-11-14T22:13:21Z"));
        assert!(lines.next().is_none());
    }

    #[tokio::test]
    async fn test_columns_by_name() {
        let ctx = empty_context().await;
        let data = "\u{feff}Title,notes,UUID,shelf_colour,read,pages\n\
                    Dune,\"Spice, lots of it\",d1,green,yes,412\n";
        let results = import(&ctx, UpdatePolicy::Skip, data.as_bytes()).await;
        assert_eq!(results.books.created, 1);
        let dune = ctx.catalog().find_book_by_uuid("d1").await.unwrap().unwrap();
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.notes.as_deref(), Some("Spice, lots of it"));
        assert_eq!(dune.page_count, Some(412));
        assert!(dune.read);
    }

    #[tokio::test]
    async fn test_without_title_column() {
        let ctx = empty_context().await;
        let record = Record::bytes(RecordType::Books, RecordEncoding::Csv, "books.csv", b"a,b\n1,2\n".to_vec());
        let err = CsvBooks.read(&ctx, &ImportOptions::default(), record, &NoProgress).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Decode(RecordType::Books)));
    }

    #[tokio::test]
    async fn test_corrupt_row_is_isolated() {
        let mut data = String::from("uuid,title,pages\n");
        for n in 1..=5 {
            let pages = if n == 3 { "lots" } else { "100" };
            data.push_str(&format!("{},Book {n},{pages}\n", book(n).uuid));
        }
        let ctx = empty_context().await;
        let results = import(&ctx, UpdatePolicy::Skip, data.as_bytes()).await;

        assert_eq!(results.books, Counter { processed: 5, created: 4, failed: 1, ..Counter::default() });
        assert_eq!(results.failures[0].row, 3);
        assert_eq!(results.failures[0].key.as_deref(), Some(book(3).uuid.as_str()));
        assert_eq!(results.failures[0].reason, "invalid pages \"lots\"");
        assert!(ctx.catalog().find_book_by_uuid(&book(3).uuid).await.unwrap().is_none());
        assert!(ctx.catalog().find_book_by_uuid(&book(4).uuid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ninety_books() {
        let ctx = empty_context().await;
        for n in 1..=90 {
            ctx.catalog().insert_book(&book(n)).await.unwrap();
        }
        let data = export(&ctx).await;
        assert_eq!(String::from_utf8_lossy(&data).lines().count(), 91);

        assert!(ctx.catalog().delete_book(&book(10).uuid).await.unwrap());
        let mut modified = ctx.catalog().find_book_by_uuid(&book(20).uuid).await.unwrap().unwrap();
        modified.title = "Changed locally".to_string();
        ctx.catalog().update_book(modified.id.unwrap(), &modified).await.unwrap();

        let results = import(&ctx, UpdatePolicy::Skip, &data).await;
        assert_eq!(results.books, Counter { processed: 90, created: 1, updated: 0, skipped: 89, failed: 0 });

        let results = import(&ctx, UpdatePolicy::Overwrite, &data).await;
        assert_eq!(results.books, Counter { processed: 90, created: 0, updated: 90, skipped: 0, failed: 0 });
        let restored = ctx.catalog().find_book_by_uuid(&book(20).uuid).await.unwrap().unwrap();
        assert_eq!(restored.title, "Book 20");
    }
}
