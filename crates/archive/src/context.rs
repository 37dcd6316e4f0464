use bindery_catalog::{Database, Repository};
use bindery_storage::BackendHandle;
use std::time::Duration;

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(200);
/// Anything smaller is a placeholder or a truncated download, not a cover.
const DEFAULT_MIN_COVER_SIZE: u64 = 2048;

/// Everything an export or import works against, passed explicitly into
/// every reader and writer.
#[derive(Clone)]
pub struct Context {
    database: Database,
    catalog: Repository,
    covers: BackendHandle,
    progress_interval: Duration,
    min_cover_size: u64,
    app_version: String,
}

impl Context {
    pub fn new(database: Database, covers: BackendHandle) -> Self {
        Self {
            catalog: Repository::from(&database),
            database,
            covers,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            min_cover_size: DEFAULT_MIN_COVER_SIZE,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// How often book progress is published.
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Imported covers smaller than this many bytes are discarded.
    pub fn with_min_cover_size(mut self, bytes: u64) -> Self {
        self.min_cover_size = bytes;
        self
    }

    /// Application version recorded in exported archives.
    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = version.into();
        self
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn catalog(&self) -> &Repository {
        &self.catalog
    }

    pub fn covers(&self) -> &BackendHandle {
        &self.covers
    }

    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn min_cover_size(&self) -> u64 {
        self.min_cover_size
    }

    pub fn app_version(&self) -> &str {
        &self.app_version
    }
}
