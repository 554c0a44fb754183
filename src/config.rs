//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/dcmsink.sqlite"
//!
//! [ingest]
//! root = "./incoming"
//! extension = "dcm"
//! exclude_globs = ["**/scratch/**"]
//!
//! [backend]
//! kind = "indexed"          # or "document"
//!
//! [backend.document]
//! store = "couchdb"         # or "sqlite"
//! column_key = "grouping"   # or "primary"
//! store_document_bytes = false
//!
//! [couchdb]
//! url = "http://localhost:5984"
//! database = "dicom"
//! username = "admin"        # password via DCMSINK_COUCHDB_PASSWORD
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use dicom_sink_core::part10::BulkDataMode;
use dicom_sink_core::persist::ColumnKey;

pub const COUCHDB_PASSWORD_ENV: &str = "DCMSINK_COUCHDB_PASSWORD";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub couchdb: Option<CouchDbConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Default root when `ingest` is run without a path.
    #[serde(default)]
    pub root: Option<PathBuf>,
    /// File extension to ingest, without the dot. Matched case-insensitively.
    #[serde(default = "default_extension")]
    pub extension: String,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub include_binary: bool,
    #[serde(default)]
    pub bulk_data: BulkDataSetting,
    #[serde(default = "default_bulk_threshold")]
    pub bulk_threshold: usize,
    #[serde(default)]
    pub keep_going: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            root: None,
            extension: default_extension(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            include_binary: false,
            bulk_data: BulkDataSetting::default(),
            bulk_threshold: default_bulk_threshold(),
            keep_going: false,
        }
    }
}

fn default_extension() -> String {
    "dcm".to_string()
}
fn default_bulk_threshold() -> usize {
    1024
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BulkDataSetting {
    Inline,
    #[default]
    Exclude,
    Uri,
}

impl From<BulkDataSetting> for BulkDataMode {
    fn from(setting: BulkDataSetting) -> Self {
        match setting {
            BulkDataSetting::Inline => BulkDataMode::Inline,
            BulkDataSetting::Exclude => BulkDataMode::Exclude,
            BulkDataSetting::Uri => BulkDataMode::Uri,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default)]
    pub document: DocumentBackendConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Index row, tags row and content record in SQLite.
    #[default]
    Indexed,
    /// Revisioned documents plus a column family.
    Document,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DocumentBackendConfig {
    #[serde(default)]
    pub store: DocumentStoreKind,
    #[serde(default)]
    pub column_key: ColumnKeySetting,
    #[serde(default)]
    pub store_document_bytes: bool,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStoreKind {
    #[default]
    Sqlite,
    Couchdb,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKeySetting {
    #[default]
    Grouping,
    Primary,
}

impl From<ColumnKeySetting> for ColumnKey {
    fn from(setting: ColumnKeySetting) -> Self {
        match setting {
            ColumnKeySetting::Grouping => ColumnKey::Grouping,
            ColumnKeySetting::Primary => ColumnKey::Primary,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CouchDbConfig {
    pub url: String,
    pub database: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn uses_couchdb(&self) -> bool {
        self.backend.kind == BackendKind::Document
            && self.backend.document.store == DocumentStoreKind::Couchdb
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate ingest
    let extension = config.ingest.extension.trim_start_matches('.').to_string();
    if extension.is_empty() {
        bail!("ingest.extension must not be empty");
    }
    config.ingest.extension = extension;

    if config.ingest.bulk_threshold == 0 {
        bail!("ingest.bulk_threshold must be > 0");
    }

    // Validate couchdb
    if config.uses_couchdb() && config.couchdb.is_none() {
        bail!("backend.document.store is 'couchdb' but no [couchdb] section is configured");
    }

    if let Some(couch) = config.couchdb.as_mut() {
        if !(couch.url.starts_with("http://") || couch.url.starts_with("https://")) {
            bail!("couchdb.url must start with http:// or https://, got '{}'", couch.url);
        }
        if couch.database.is_empty() {
            bail!("couchdb.database must not be empty");
        }
        if couch.password.is_none() {
            couch.password = std::env::var(COUCHDB_PASSWORD_ENV).ok();
        }
        if couch.password.is_some() && couch.username.is_none() {
            bail!("couchdb.password is set but couchdb.username is missing");
        }
    }

    Ok(config)
}
