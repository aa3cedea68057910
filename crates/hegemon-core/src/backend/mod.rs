//! Database backends.
//!
//! Each engine implements [`DatabaseBackend`]; a [`BackendFactory`] picks the
//! implementation from the target's engine name so the orchestrators stay
//! engine-agnostic.

mod command;
mod mongodb;
mod mysql;
mod postgres;
mod sqlite;

pub use mongodb::MongoBackend;
pub use mysql::MySqlBackend;
pub use postgres::PostgresBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{DatabaseTarget, EngineKind};
use crate::credentials::{CredentialKind, CredentialResolver};
use crate::{Error, Result};

/// Connect, dump and restore capabilities for one engine.
///
/// `dump` and `restore` fail fast with a connection error when called
/// before a successful `connect`.
#[async_trait]
pub trait DatabaseBackend: Send {
    /// Engine name used in errors and logs
    fn name(&self) -> &str;

    /// Extension of files produced by `dump`, including the leading dot
    fn dump_extension(&self) -> &'static str;

    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    /// Write a full dump of the target database to `path`
    async fn dump(&mut self, path: &Path) -> Result<()>;

    /// Replace the target database contents from the dump at `path`
    async fn restore(&mut self, path: &Path) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Creates backends for database targets
pub trait BackendFactory: Send + Sync {
    fn create(&self, target: &DatabaseTarget) -> Result<Box<dyn DatabaseBackend>>;
}

/// Factory for the built-in engines
#[derive(Clone)]
pub struct EngineBackendFactory {
    credentials: Arc<CredentialResolver>,
}

impl EngineBackendFactory {
    pub fn new(credentials: Arc<CredentialResolver>) -> Self {
        Self { credentials }
    }
}

impl BackendFactory for EngineBackendFactory {
    fn create(&self, target: &DatabaseTarget) -> Result<Box<dyn DatabaseBackend>> {
        create_backend(target, self.credentials.clone())
    }
}

/// Create the backend for `target`; unknown engines are configuration errors
pub fn create_backend(
    target: &DatabaseTarget,
    credentials: Arc<CredentialResolver>,
) -> Result<Box<dyn DatabaseBackend>> {
    let backend: Box<dyn DatabaseBackend> = match target.engine_kind()? {
        EngineKind::Postgresql => Box::new(PostgresBackend::new(target.clone(), credentials)),
        EngineKind::Mysql => Box::new(MySqlBackend::new(target.clone(), credentials)),
        EngineKind::Mongodb => Box::new(MongoBackend::new(target.clone(), credentials)),
        EngineKind::Sqlite => Box::new(SqliteBackend::new(target.clone())),
    };
    Ok(backend)
}

/// Fetch the target's password once, at connect time
pub(crate) fn resolve_password(
    credentials: &CredentialResolver,
    target: &DatabaseTarget,
    engine: &str,
) -> Result<String> {
    let key = &target.credentials.key;
    credentials
        .get(
            key,
            CredentialKind::Password,
            &target.credentials.preferred_sources,
        )
        .map(|record| record.value)
        .ok_or_else(|| {
            Error::connection(engine, format!("no credential found for key {}", key))
        })
}

pub(crate) fn ensure_connected(connected: bool, engine: &str) -> Result<()> {
    if connected {
        Ok(())
    } else {
        Err(Error::connection(engine, "not connected"))
    }
}

/// Last-resort detection of credential rejections in client messages
pub(crate) fn looks_like_auth_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("access denied")
        || lower.contains("password authentication failed")
        || lower.contains("authentication failed")
        || (lower.contains("role") && lower.contains("does not exist"))
}

/// Map a handshake error, preferring SQLSTATE codes over message text
pub(crate) fn classify_connect_error(engine: &str, err: sqlx::Error) -> Error {
    let auth = match &err {
        sqlx::Error::Database(db) => {
            let sqlstate_auth = db.code().is_some_and(|code| code.starts_with("28"));
            sqlstate_auth || looks_like_auth_failure(db.message())
        }
        other => looks_like_auth_failure(&other.to_string()),
    };

    if auth {
        Error::authentication(engine, err.to_string())
    } else {
        Error::connection(engine, err.to_string())
    }
}
