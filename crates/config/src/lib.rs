//! Layered configuration for bindery.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. Built-in defaults.
//! 2. A config file: an explicit path, or `config.toml`, `config.yaml` or
//!    `config.json` in the platform config directory.
//! 3. Environment variables prefixed `BINDERY_`, with nested keys split on
//!    `__` (`BINDERY_IMPORT__POLICY=overwrite`).

pub mod error;

use crate::error::{ErrorKind, Result};
use bindery_archive::{ArchiveEncoding, ExportOptions, ImportOptions, RecordType, UpdatePolicy};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "BINDERY_";
const CONFIG_FILES: [&str; 3] = ["config.toml", "config.yaml", "config.json"];

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "bindery")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// The catalogue database.
    pub catalog: PathBuf,
    /// Directory holding cover images.
    pub covers: PathBuf,
    pub export: ExportSettings,
    pub import: ImportSettings,
    /// How often progress is reported while books are processed.
    pub progress_interval_ms: u64,
    /// Covers smaller than this are discarded on import.
    pub min_cover_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub format: ArchiveEncoding,
    /// Everything the format can hold when not set.
    pub records: Option<Vec<RecordType>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    pub policy: UpdatePolicy,
    /// Everything except the raw database when not set.
    pub records: Option<Vec<RecordType>>,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = project_dirs().map(|dirs| dirs.data_dir().to_path_buf()).unwrap_or_default();
        Self {
            catalog: data_dir.join("catalog.db"),
            covers: data_dir.join("covers"),
            export: ExportSettings::default(),
            import: ImportSettings::default(),
            progress_interval_ms: 200,
            min_cover_size: 2048,
        }
    }
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self { format: ArchiveEncoding::Zip, records: None }
    }
}

impl Settings {
    /// Load from every source. `path` replaces the config file search.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let search_dir = project_dirs().map(|dirs| dirs.config_dir().to_path_buf());
        Self::from_figment(Self::figment(path, search_dir.as_deref())?)
    }

    fn figment(path: Option<&Path>, search_dir: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        match path {
            Some(path) => {
                if !path.is_file() {
                    exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
                }
                figment = merge_file(figment, path)?;
            },
            None => {
                for file in search_dir.into_iter().flat_map(|dir| CONFIG_FILES.map(|name| dir.join(name))) {
                    if file.is_file() {
                        tracing::debug!(path = %file.display(), "Loading config file");
                        figment = merge_file(figment, &file)?;
                    }
                }
            },
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that parse but can't work.
    pub fn validate(&self) -> Result<()> {
        if self.progress_interval_ms == 0 {
            exn::bail!(ErrorKind::Invalid("progress_interval_ms must be greater than zero".to_string()));
        }
        let records = self.export.records.iter().flatten();
        self.export.format.check_writable(records).or_raise(|| ErrorKind::Invalid("export".to_string()))?;
        if let Some(records) = &self.import.records
            && records.is_empty()
        {
            exn::bail!(ErrorKind::Invalid("import.records can't be empty".to_string()));
        }
        Ok(())
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn export_options(&self) -> ExportOptions {
        let options = ExportOptions::new(self.export.format);
        match &self.export.records {
            Some(records) => options.with_record_types(records.iter().copied()),
            None => options,
        }
    }

    pub fn import_options(&self) -> ImportOptions {
        let options = ImportOptions::default().with_policy(self.import.policy);
        match &self.import.records {
            Some(records) => options.with_record_types(records.iter().copied()),
            None => options,
        }
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
    Ok(match extension.as_deref() {
        Some("toml") => figment.merge(Toml::file_exact(path)),
        Some("yaml" | "yml") => figment.merge(Yaml::file_exact(path)),
        Some("json") => figment.merge(Json::file_exact(path)),
        _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
    })
}
