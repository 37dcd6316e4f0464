//! `bindery`: back up, export and import a book catalogue.

mod console;

use crate::console::ConsoleProgress;
use bindery_archive::{
    ArchiveEncoding, Compression, Context, ExportHelper, ImportHelper, ImportResults, RecordType, UpdatePolicy,
};
use bindery_catalog::Database;
use bindery_config::Settings;
use bindery_storage::backend::LocalBackend;
use clap::{ArgAction, Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{Exn, ResultExt};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Exit code of an operation stopped with Ctrl-C.
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load the configuration")]
    Config,
    #[display("could not open the catalogue at {}", _0.display())]
    Catalog(#[error(not(source))] PathBuf),
    #[display("could not open the cover directory at {}", _0.display())]
    Covers(#[error(not(source))] PathBuf),
    /// Archive failures carry the sentence meant for the user.
    #[display("{_0}")]
    Archive(#[error(not(source))] String),
}
type Result<T> = std::result::Result<T, Exn<ErrorKind>>;

trait ArchiveResultExt<T> {
    fn or_explain(self) -> Result<T>;
}
impl<T> ArchiveResultExt<T> for bindery_archive::error::Result<T> {
    #[track_caller]
    fn or_explain(self) -> Result<T> {
        self.map_err(|err| {
            let message = err.user_message();
            err.raise(ErrorKind::Archive(message))
        })
    }
}

#[derive(Debug, Parser)]
#[command(name = "bindery", version, about = "Back up, export and import a book catalogue")]
struct Cli {
    /// Config file, instead of the one in the platform config directory.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// More logging; repeat for even more.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// No progress output.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Write the catalogue to an archive.
    Export {
        path: PathBuf,
        /// Archive format; guessed from the file name when not given.
        #[arg(long, value_parser = parse::<ArchiveEncoding>)]
        format: Option<ArchiveEncoding>,
        /// Record types to export (comma separated).
        #[arg(long, value_delimiter = ',', value_parser = parse::<RecordType>)]
        records: Vec<RecordType>,
        /// Only books changed since the last full backup.
        #[arg(long)]
        incremental: bool,
    },
    /// Merge an archive into the catalogue.
    Import {
        path: PathBuf,
        /// Record types to import (comma separated).
        #[arg(long, value_delimiter = ',', value_parser = parse::<RecordType>)]
        records: Vec<RecordType>,
        /// What to do with entities that already exist.
        #[arg(long, value_parser = parse::<UpdatePolicy>)]
        policy: Option<UpdatePolicy>,
    },
    /// Describe an archive without importing it.
    Inspect { path: PathBuf },
}

fn parse<T>(s: &str) -> std::result::Result<T, String>
where
    T: FromStr<Err = bindery_archive::error::Error>,
{
    s.parse().map_err(|err: bindery_archive::error::Error| (*err).to_string())
}

/// The format named by a destination's extension, ignoring compression.
fn format_from_path(path: &Path) -> Option<ArchiveEncoding> {
    let inner = Compression::strip_extension(path);
    inner.extension()?.to_str()?.parse().ok()
}

async fn open_context(settings: &Settings) -> Result<Context> {
    let database = Database::connect(&settings.catalog).await.or_raise(|| ErrorKind::Catalog(settings.catalog.clone()))?;
    let covers = std::path::absolute(&settings.covers).or_raise(|| ErrorKind::Covers(settings.covers.clone()))?;
    let backend = LocalBackend::new("covers", &covers).or_raise(|| ErrorKind::Covers(covers.clone()))?;
    Ok(Context::new(database, Arc::new(backend))
        .with_progress_interval(settings.progress_interval())
        .with_min_cover_size(settings.min_cover_size))
}

fn report_failures(results: &ImportResults) {
    for failure in &results.failures {
        tracing::warn!(%failure, "Not imported");
    }
}

async fn run(cli: Cli, progress: &ConsoleProgress) -> Result<bool> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    match cli.command {
        Command::Export { path, format, records, incremental } => {
            let format = format.or_else(|| format_from_path(&path)).unwrap_or(settings.export.format);
            let mut options = bindery_archive::ExportOptions::new(format);
            let records = match records.is_empty() {
                true => settings.export.records.clone(),
                false => Some(records),
            };
            if let Some(records) = records {
                options = options.with_record_types(records);
            }
            if incremental {
                options = options.incremental();
            }
            let helper = ExportHelper::new(&path, options);
            helper.archive_writer().or_explain()?;
            let ctx = open_context(&settings).await?;
            let results = helper.export(&ctx, progress).await.or_explain();
            progress.finish();
            ctx.database().close().await;
            let results = results?;
            println!("Exported to {}", path.display());
            print!("{results}");
            Ok(results.cancelled)
        },
        Command::Import { path, records, policy } => {
            let mut options = settings.import_options();
            if !records.is_empty() {
                options = options.with_record_types(records);
            }
            if let Some(policy) = policy {
                options = options.with_policy(policy);
            }
            let helper = ImportHelper::new(&path, options);
            helper.archive_reader().or_explain()?;
            let ctx = open_context(&settings).await?;
            let results = helper.import(&ctx, progress).await.or_explain();
            progress.finish();
            ctx.database().close().await;
            let results = results?;
            report_failures(&results);
            print!("{results}");
            Ok(results.cancelled)
        },
        Command::Inspect { path } => {
            let reader = ImportHelper::new(&path, bindery_archive::ImportOptions::default()).archive_reader().or_explain()?;
            println!("format: {}", reader.encoding());
            match reader.read_metadata().await.or_explain()? {
                Some(metadata) => {
                    println!("archive version: {}", metadata.archive_version);
                    if !metadata.app_version.is_empty() {
                        println!("written by: {}", metadata.app_version);
                    }
                    println!("created: {}", metadata.created_at);
                    if let Some(books) = metadata.book_count {
                        println!("books: {books}");
                    }
                    if let Some(covers) = metadata.cover_count {
                        println!("covers: {covers}");
                    }
                },
                None => println!("no archive information"),
            }
            Ok(false)
        },
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let verbose = cli.verbose > 0;
    let progress = Arc::new(ConsoleProgress::new(cli.quiet));
    let on_interrupt = progress.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match run(cli, &progress).await {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => {
            eprintln!("Cancelled; the results above are incomplete.");
            ExitCode::from(EXIT_CANCELLED)
        },
        Err(err) => {
            match verbose {
                true => eprintln!("error: {err:?}"),
                false => eprintln!("error: {err}"),
            }
            ExitCode::FAILURE
        },
    }
}
