use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "FINDABUG_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    #[default]
    Sqlite,
    Postgresql,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseType,

    #[serde(default = "default_db_path")]
    pub sqlite_path: PathBuf,

    /// libpq-style connection string, used when `backend = "postgresql"`.
    #[serde(default)]
    pub postgresql_url: Option<String>,

    #[serde(default)]
    pub pool_size: Option<u32>,

    /// Declare and enforce foreign keys between live tables.
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
}

fn default_db_path() -> PathBuf {
    data_dir().join("findabug.db")
}

fn default_foreign_keys() -> bool {
    true
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseType::default(),
            sqlite_path: default_db_path(),
            postgresql_url: None,
            pool_size: None,
            foreign_keys: default_foreign_keys(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// GTDB release whose live tables the API serves.
    #[serde(default = "default_release")]
    pub release: i64,

    /// Rows per page when a request asks for one.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_bind() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_release() -> i64 {
    207
}

fn default_page_size() -> usize {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            release: default_release(),
            page_size: default_page_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Root holding one `r{release}` directory per release.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Work units (files or file pairs) per insert transaction.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_failure_log_dir")]
    pub failure_log_dir: PathBuf,

    /// Load only GTDB species representatives from the metadata files.
    #[serde(default = "default_representatives_only")]
    pub representatives_only: bool,
}

fn default_data_dir() -> PathBuf {
    data_dir().join("gtdb")
}

fn default_chunk_size() -> usize {
    100
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_failure_log_dir() -> PathBuf {
    data_dir().join("failures")
}

fn default_representatives_only() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: default_chunk_size(),
            workers: default_workers(),
            failure_log_dir: default_failure_log_dir(),
            representatives_only: default_representatives_only(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("findabug")
}

impl Config {
    /// Load from `path`, else from `$FINDABUG_CONFIG`, else from the user
    /// config directory. A file that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(Self::config_path),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid configuration in {:?}", config_path))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("findabug")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\nforeign_keys = false\n\n[server]\nrelease = 214\n\n[ingest]\nchunk_size = 25\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.database.backend, DatabaseType::Sqlite);
        assert!(!config.database.foreign_keys);
        assert_eq!(config.server.release, 214);
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(config.server.page_size, 500);
        assert_eq!(config.ingest.chunk_size, 25);
        assert!(config.ingest.workers >= 1);
        assert!(config.ingest.representatives_only);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.server.release, 207);
        assert!(config.database.foreign_keys);
    }

    #[test]
    fn test_postgres_backend_parses() {
        let config: Config = toml::from_str(
            "[database]\nbackend = \"postgresql\"\npostgresql_url = \"host=db user=gtdb\"\npool_size = 4\n",
        )
        .unwrap();
        assert_eq!(config.database.backend, DatabaseType::Postgresql);
        assert_eq!(config.database.pool_size, Some(4));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[server]\nrelease = \"latest\"\n").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }
}
