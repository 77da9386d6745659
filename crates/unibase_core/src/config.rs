//! Database configuration.

use crate::error::{Result, ValidationError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage engine selected by the connection string scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// `mongodb://` or `mongodb+srv://`.
    MongoDb,
    /// `sqlite://<path>`.
    Sqlite,
    /// `memory://`, the in-process document store.
    Memory,
}

impl Scheme {
    /// Parses the scheme part of a connection string.
    pub fn parse(database_string: &str) -> Result<Self> {
        let scheme = database_string
            .split_once("://")
            .map(|(s, _)| s)
            .unwrap_or(database_string);
        match scheme {
            "mongodb" | "mongodb+srv" => Ok(Self::MongoDb),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ValidationError::UnknownScheme {
                scheme: other.to_string(),
            }
            .into()),
        }
    }
}

/// Configuration for opening a database.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Application name. Used as the document database name and as the
    /// export archive prefix.
    pub app_name: String,

    /// Connection string, `scheme://rest`.
    pub database_string: String,

    /// Directory receiving export archives.
    pub database_export_directory: PathBuf,

    /// Default materialization of query params: dictionaries instead of
    /// typed records.
    pub performance_default_fetch_dict: bool,

    /// Whether count results are cached.
    pub cache_enabled: bool,

    /// Maximum cached entries per collection.
    pub cache_size: usize,

    /// Worker threads for maintenance tasks.
    pub task_workers: usize,

    /// Bounded queue length for maintenance tasks.
    pub task_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "uni".to_string(),
            database_string: "sqlite://uni.db".to_string(),
            database_export_directory: PathBuf::from("./dumps"),
            performance_default_fetch_dict: false,
            cache_enabled: false,
            cache_size: 1000,
            task_workers: 2,
            task_queue: 16,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file. Missing keys keep defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Sets the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Sets the connection string.
    #[must_use]
    pub fn database_string(mut self, value: impl Into<String>) -> Self {
        self.database_string = value.into();
        self
    }

    /// Sets the export directory.
    #[must_use]
    pub fn export_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.database_export_directory = dir.into();
        self
    }

    /// Sets the default fetch mode.
    #[must_use]
    pub const fn default_fetch_dict(mut self, value: bool) -> Self {
        self.performance_default_fetch_dict = value;
        self
    }

    /// Enables or disables the count cache.
    #[must_use]
    pub const fn cache_enabled(mut self, value: bool) -> Self {
        self.cache_enabled = value;
        self
    }

    /// Sets the per-collection cache size.
    #[must_use]
    pub const fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets maintenance task pool bounds.
    #[must_use]
    pub const fn task_pool(mut self, workers: usize, queue: usize) -> Self {
        self.task_workers = workers;
        self.task_queue = queue;
        self
    }

    /// Returns the storage scheme of the connection string.
    pub fn scheme(&self) -> Result<Scheme> {
        Scheme::parse(&self.database_string)
    }

    /// Returns the connection string without its scheme.
    pub fn database_location(&self) -> &str {
        self.database_string
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or("")
    }
}
