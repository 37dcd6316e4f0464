//! Database connection and pool management.

use crate::error::{DbResultExt, ErrorKind, Result};
use exn::{OptionExt, ResultExt};
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use tracing::instrument;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
// Imports write one book per transaction from a single task; a small pool is plenty.
const MAX_CONNECTIONS: u32 = 4;

/// Database connection pool for the catalogue.
///
/// This is the main entry point for interacting with the catalogue. It
/// manages the SQLite connection pool; queries go through a
/// [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    async fn new(options: SqliteConnectOptions, max: Option<u32>, migrate: bool) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Applies the query-based PRAGMAs to EVERY connection instead of
            // only the first one handed out by the pool.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .max_connections(max.unwrap_or(MAX_CONNECTIONS))
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        if migrate {
            db.migrate().await?;
        }
        Ok(db)
    }

    /// Connect to the catalogue database at the given path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        Self::new(options, None, true).await
    }

    /// Open somebody else's catalogue (a backup, or the database record of an
    /// archive) without modifying it.
    ///
    /// Migrations are **not** run; the file is expected to already have the
    /// catalogue schema.
    ///
    /// The catalogue may be in use and in WAL mode, so committed writes still
    /// sitting in its `-wal` file are read too.
    pub async fn connect_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::base_options().filename(path.as_ref()).read_only(true);
        Self::new(options, Some(1), false).await
    }

    /// Connect to an in-memory database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = Self::base_options().filename(":memory:");
        // Parallel connections to ":memory:" would each see their own empty
        // database, so the pool is limited to one.
        Self::new(options, Some(1), true).await
    }

    /// Base connection options shared between all connection kinds.
    fn base_options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .foreign_keys(true)
            .synchronous(SqliteSynchronous::Normal)
            // Imports commit once per book; give a concurrent reader time to finish.
            .busy_timeout(std::time::Duration::from_millis(1500))
    }

    /// Apply additional PRAGMA settings that aren't exposed via SqliteConnectOptions.
    async fn apply_pragmas(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(
            r#"
                PRAGMA cache_size = -8192;
                PRAGMA temp_store = MEMORY;
            "#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument("performing database migrations", skip(self))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Write a consistent copy of the whole catalogue to `destination`.
    ///
    /// Uses `VACUUM INTO`, so the copy is compacted and readers and writers
    /// of the live database are not blocked for longer than the copy takes.
    /// The destination must not exist yet.
    #[instrument(skip(self, destination), fields(destination = %destination.as_ref().display()))]
    pub async fn snapshot_into(&self, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref().to_str().ok_or_raise(|| ErrorKind::InvalidData("snapshot path"))?;
        sqlx::query("VACUUM INTO ?").bind(destination).execute(&self.pool).await.or_db()?;
        Ok(())
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to be returned to the pool and then closes
    /// them. The instance should not be used afterwards.
    pub async fn close(&self) {
        // Let SQLite update query planner statistics
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}
