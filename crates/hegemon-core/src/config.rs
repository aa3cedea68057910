//! Configuration structures for database backup and restore operations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::credentials::CredentialSource;
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database to back up or restore into
    pub database: DatabaseTarget,

    /// Local content store
    pub storage: StorageConfig,

    /// Backup options (compression, retention, schedule)
    #[serde(default)]
    pub backup: BackupConfig,

    /// Logging and notification options
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// PostgreSQL (relational)
    Postgresql,
    /// MySQL / MariaDB (relational)
    Mysql,
    /// MongoDB (document)
    Mongodb,
    /// SQLite (embedded file engine)
    Sqlite,
}

impl EngineKind {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgresql => "postgresql",
            EngineKind::Mysql => "mysql",
            EngineKind::Mongodb => "mongodb",
            EngineKind::Sqlite => "sqlite",
        }
    }

    /// Whether the engine is reached over the network
    pub fn is_networked(&self) -> bool {
        !matches!(self, EngineKind::Sqlite)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(EngineKind::Postgresql),
            "mysql" | "mariadb" => Ok(EngineKind::Mysql),
            "mongodb" | "mongo" => Ok(EngineKind::Mongodb),
            "sqlite" => Ok(EngineKind::Sqlite),
            other => Err(Error::Config(format!(
                "Unsupported database engine: {:?}",
                other
            ))),
        }
    }
}

/// Connection parameters for one database.
///
/// Built from configuration and never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseTarget {
    /// Engine name, resolved by the backend factory
    pub engine: String,

    /// Server host (ignored by sqlite)
    #[serde(default)]
    pub host: String,

    /// Server port (ignored by sqlite)
    #[serde(default)]
    pub port: u16,

    /// Login user (ignored by sqlite)
    #[serde(default)]
    pub username: String,

    /// Database name, or the database file path for sqlite
    pub database: String,

    /// Where to find the password
    #[serde(default)]
    pub credentials: CredentialConfig,

    /// Connect-phase timeout in seconds (default: 5)
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl DatabaseTarget {
    /// Resolve the configured engine name
    pub fn engine_kind(&self) -> Result<EngineKind> {
        self.engine.parse()
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

/// Credential indirection for a database target
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Logical key passed to the credential resolver
    #[serde(default)]
    pub key: String,

    /// Sources to try, in order (empty: resolver default order)
    #[serde(default)]
    pub preferred_sources: Vec<CredentialSource>,
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage root holding artifacts and the `metadata/` ledger
    pub path: PathBuf,
}

/// Backup-specific options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupConfig {
    #[serde(default)]
    pub compression: CompressionConfig,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Compression options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompressionConfig {
    /// Compress dumps before storing them (default: false)
    #[serde(default)]
    pub enabled: bool,

    /// Codec format
    #[serde(default)]
    pub format: CompressionFormat,

    /// Codec intensity
    #[serde(default)]
    pub level: CompressionLevel,
}

impl CompressionConfig {
    /// The codec parameters, independent of the enabled flag
    pub fn spec(&self) -> CompressionSpec {
        CompressionSpec {
            format: self.format,
            level: self.level,
        }
    }
}

/// Compression format.
///
/// Only `Zstd` has a codec; the others are accepted by the configuration
/// parser and rejected when a codec is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionFormat {
    #[default]
    Zstd,
    Lz4,
    Xz,
}

impl CompressionFormat {
    /// All formats the configuration accepts
    pub const DECLARED: [CompressionFormat; 3] = [
        CompressionFormat::Zstd,
        CompressionFormat::Lz4,
        CompressionFormat::Xz,
    ];

    /// Whether a codec exists for this format
    pub fn is_supported(&self) -> bool {
        matches!(self, CompressionFormat::Zstd)
    }

    /// File extension appended to compressed artifacts
    pub fn extension(&self) -> &'static str {
        match self {
            CompressionFormat::Zstd => ".zst",
            CompressionFormat::Lz4 => ".lz4",
            CompressionFormat::Xz => ".xz",
        }
    }

    /// Detect a declared format from a file name
    pub fn detect_from_extension(name: &str) -> Option<Self> {
        Self::DECLARED
            .into_iter()
            .find(|format| name.ends_with(format.extension()))
    }
}

impl fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompressionFormat::Zstd => "zstd",
            CompressionFormat::Lz4 => "lz4",
            CompressionFormat::Xz => "xz",
        };
        f.write_str(name)
    }
}

/// Compression intensity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

/// Immutable codec parameters for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionSpec {
    pub format: CompressionFormat,
    pub level: CompressionLevel,
}

/// Retention bounds enforced after each successful store.
///
/// A zero bound disables that rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum number of artifacts to keep (default: 10)
    #[serde(default = "default_max_count")]
    pub max_count: usize,

    /// Maximum artifact age in days (default: 30)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_count: default_max_count(),
            max_age_days: default_max_age_days(),
        }
    }
}

fn default_max_count() -> usize {
    10
}

fn default_max_age_days() -> u32 {
    30
}

/// Polling scheduler options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,

    /// `minute hour * * *` (default: daily at midnight)
    #[serde(default = "default_cron")]
    pub cron: String,

    /// Seconds between schedule checks (default: 60)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron: default_cron(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_cron() -> String {
    "0 0 * * *".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

/// Logging and notification options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log filter when neither RUST_LOG nor -v is given
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub enable_notifications: bool,

    #[serde(default)]
    pub notification_endpoint: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            enable_notifications: false,
            notification_endpoint: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load and validate a configuration file (YAML or JSON)
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Parse a configuration document, expanding `${VAR}` references
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let engine = self.database.engine_kind()?;

        if self.database.database.trim().is_empty() {
            return Err(Error::Config(match engine {
                EngineKind::Sqlite => "database file path cannot be empty".to_string(),
                _ => "database name cannot be empty".to_string(),
            }));
        }

        if engine.is_networked() {
            if self.database.host.trim().is_empty() {
                return Err(Error::Config("database host cannot be empty".to_string()));
            }
            if self.database.port == 0 {
                return Err(Error::Config("database port must be > 0".to_string()));
            }
            if self.database.credentials.key.trim().is_empty() {
                return Err(Error::Config(
                    "database credentials.key is required for networked engines".to_string(),
                ));
            }
        }

        if self.database.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect_timeout_secs must be > 0".to_string(),
            ));
        }

        if self.storage.path.as_os_str().is_empty() {
            return Err(Error::Config("storage path cannot be empty".to_string()));
        }

        if self.backup.schedule.poll_interval_secs == 0 {
            return Err(Error::Config(
                "schedule.poll_interval_secs must be > 0".to_string(),
            ));
        }

        if self.logging.enable_notifications
            && self
                .logging
                .notification_endpoint
                .as_deref()
                .map_or(true, |e| e.trim().is_empty())
        {
            return Err(Error::Config(
                "notification_endpoint is required when notifications are enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Replace every `${NAME}` with the value of environment variable NAME.
fn expand_env_vars(input: &str) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            Error::Config("Unterminated ${...} reference in configuration".to_string())
        })?;
        let name = &after[..end];
        if name.is_empty() {
            return Err(Error::Config(
                "Empty ${} reference in configuration".to_string(),
            ));
        }
        let value = std::env::var(name).map_err(|_| {
            Error::Config(format!("Environment variable {} is not set", name))
        })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}
