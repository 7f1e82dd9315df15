//! Configuration for a Cairn data directory.
//!
//! Configuration lives in `<data_dir>/config.yaml`. Every field is optional in
//! the file; missing fields take their defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Language;

/// Default data directory, relative to the current directory.
pub const DEFAULT_DATA_DIR: &str = ".cairn";

/// Name of the configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default database file name inside the data directory.
pub const DEFAULT_DATABASE_FILE: &str = "cairn.db";

/// Default cap on impact-analysis results.
pub const DEFAULT_IMPACT_LIMIT: usize = 100;

/// Default cap on dependency-chain results.
pub const DEFAULT_CHAIN_LIMIT: usize = 100;

/// Default upper bound for traversal depth.
pub const DEFAULT_MAX_TRAVERSAL_DEPTH: u32 = 50;

/// Default embedding vector width.
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Directory names never descended into during discovery.
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "target",
    "node_modules",
    "bin",
    "obj",
    "build",
    "dist",
    "vendor",
    "__pycache__",
    ".git",
    "venv",
    ".venv",
];

/// Cairn configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    /// Directory holding the database and this file
    pub data_dir: PathBuf,

    /// Database file name, relative to `data_dir`
    pub database_file: String,

    /// Directory names skipped during discovery
    pub excluded_dirs: Vec<String>,

    /// File extension allow-list
    pub extensions: Vec<String>,

    /// Worker threads for extraction (0 = one per core)
    pub workers: usize,

    /// Maximum entities returned per impact report
    pub impact_limit: usize,

    /// Maximum entities returned per dependency chain
    pub chain_limit: usize,

    /// Upper bound applied to requested traversal depths
    pub max_traversal_depth: u32,

    /// Width of embedding vectors
    pub embedding_dimensions: usize,

    /// Attempts for a file write hitting a busy database
    pub store_retry_attempts: u32,

    /// First retry delay in milliseconds (doubles per attempt)
    pub store_retry_base_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_file: DEFAULT_DATABASE_FILE.to_string(),
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(ToString::to_string).collect(),
            extensions: Language::ALL
                .iter()
                .flat_map(|l| l.extensions().iter().map(ToString::to_string))
                .collect(),
            workers: 0,
            impact_limit: DEFAULT_IMPACT_LIMIT,
            chain_limit: DEFAULT_CHAIN_LIMIT,
            max_traversal_depth: DEFAULT_MAX_TRAVERSAL_DEPTH,
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            store_retry_attempts: 5,
            store_retry_base_ms: 10,
        }
    }
}

impl Config {
    /// Default configuration rooted at a data directory.
    #[must_use]
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load `<data_dir>/config.yaml`, falling back to defaults when absent.
    ///
    /// `data_dir` always wins over any `data-dir` value inside the file, so a
    /// copied config never points at another directory's database.
    pub fn load_or_default(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `<data_dir>/config.yaml`.
    pub fn save(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.data_dir.join(CONFIG_FILE_NAME);
        let content =
            serde_yaml::to_string(self).map_err(|e| Error::Config(format!("YAML error: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(path)
    }

    /// Reject values that would make queries or writes meaningless.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("impact-limit", self.impact_limit),
            ("chain-limit", self.chain_limit),
            ("embedding-dimensions", self.embedding_dimensions),
            ("store-retry-attempts", self.store_retry_attempts as usize),
            ("max-traversal-depth", self.max_traversal_depth as usize),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(Error::Config(format!("{field} must be greater than zero")));
            }
        }
        if self.database_file.trim().is_empty() {
            return Err(Error::Config("database-file cannot be empty".to_string()));
        }
        if let Some(ext) = self
            .extensions
            .iter()
            .find(|e| Language::from_extension(e).is_none())
        {
            return Err(Error::Config(format!("unsupported extension '{ext}'")));
        }
        Ok(())
    }

    /// Full path of the database file.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    /// Returns `true` if files with this extension are indexed.
    #[must_use]
    pub fn is_allowed_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }

    /// Returns `true` if a directory with this name is skipped.
    #[must_use]
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.iter().any(|d| d == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        Config::default().validate().expect("defaults should validate");
    }

    #[test]
    fn default_allows_every_language() {
        let config = Config::default();
        assert!(config.is_allowed_extension("rs"));
        assert!(config.is_allowed_extension("cs"));
        assert!(config.is_allowed_extension("PY"));
        assert!(!config.is_allowed_extension("js"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = Config::with_data_dir(dir.path());
        config.workers = 3;
        config.impact_limit = 7;

        config.save().expect("save");
        let loaded = Config::load_or_default(dir.path()).expect("load");

        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let loaded = Config::load_or_default(dir.path()).expect("load");
        assert_eq!(loaded.impact_limit, DEFAULT_IMPACT_LIMIT);
        assert_eq!(loaded.data_dir, dir.path());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "workers: 2\n").expect("write");

        let loaded = Config::load_or_default(dir.path()).expect("load");

        assert_eq!(loaded.workers, 2);
        assert_eq!(loaded.chain_limit, DEFAULT_CHAIN_LIMIT);
    }

    #[rstest]
    #[case("impact-limit: 0\n")]
    #[case("chain-limit: 0\n")]
    #[case("embedding-dimensions: 0\n")]
    #[case("extensions: [js]\n")]
    fn invalid_values_rejected(#[case] yaml: &str) {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), yaml).expect("write");

        let err = Config::load_or_default(dir.path()).expect_err("should reject");
        assert!(matches!(err, Error::Config(_)), "got {err:?}");
    }
}
