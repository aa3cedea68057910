//! SQLite backend.
//!
//! "Connecting" opens a local handle. Dumps use `VACUUM INTO`, which writes a
//! consistent copy of the whole database in one statement; restores verify
//! the dump and swap it in with a rename.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::{ConnectOptions, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{ensure_connected, DatabaseBackend};
use crate::config::DatabaseTarget;
use crate::{Error, Result};

const ENGINE: &str = "sqlite";

pub struct SqliteBackend {
    db_path: PathBuf,
    connection: Option<SqliteConnection>,
}

impl SqliteBackend {
    pub fn new(target: DatabaseTarget) -> Self {
        Self {
            db_path: PathBuf::from(target.database),
            connection: None,
        }
    }

    async fn open(path: &Path, read_only: bool) -> std::result::Result<SqliteConnection, sqlx::Error> {
        SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(!read_only)
            .read_only(read_only)
            .journal_mode(SqliteJournalMode::Delete)
            .disable_statement_logging()
            .connect()
            .await
    }

    /// Run `PRAGMA integrity_check` against a candidate restore source
    async fn verify_source(path: &Path) -> Result<()> {
        let mut source = Self::open(path, true).await.map_err(|e| {
            Error::restore(ENGINE, format!("cannot open {}: {}", path.display(), e))
        })?;

        let result: std::result::Result<(String,), sqlx::Error> =
            sqlx::query_as("PRAGMA integrity_check")
                .fetch_one(&mut source)
                .await;
        let _ = source.close().await;

        match result {
            Ok((status,)) if status == "ok" => Ok(()),
            Ok((status,)) => Err(Error::restore(
                ENGINE,
                format!("{} failed integrity check: {}", path.display(), status),
            )),
            Err(e) => Err(Error::restore(
                ENGINE,
                format!("{} is not a usable database: {}", path.display(), e),
            )),
        }
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self
            .db_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(suffix);
        self.db_path.with_file_name(name)
    }
}

#[async_trait]
impl DatabaseBackend for SqliteBackend {
    fn name(&self) -> &str {
        ENGINE
    }

    fn dump_extension(&self) -> &'static str {
        ".db"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    Error::connection(
                        ENGINE,
                        format!("cannot create {}: {}", parent.display(), e),
                    )
                })?;
            }
        }

        let connection = Self::open(&self.db_path, false).await.map_err(|e| {
            Error::connection(ENGINE, format!("{}: {}", self.db_path.display(), e))
        })?;

        info!(path = %self.db_path.display(), "Opened SQLite database");
        self.connection = Some(connection);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .await
                .map_err(|e| Error::connection(ENGINE, format!("close failed: {}", e)))?;
            debug!(path = %self.db_path.display(), "Closed SQLite database");
        }
        Ok(())
    }

    async fn dump(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| Error::connection(ENGINE, "not connected"))?;

        // VACUUM INTO refuses to overwrite an existing file.
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(Error::dump(
                    ENGINE,
                    format!("cannot replace {}: {}", path.display(), e),
                ))
            }
        }

        let target = path
            .to_str()
            .ok_or_else(|| Error::dump(ENGINE, format!("non UTF-8 path: {}", path.display())))?;
        sqlx::query("VACUUM INTO ?")
            .bind(target)
            .execute(&mut *connection)
            .await
            .map_err(|e| Error::dump(ENGINE, e.to_string()))?;

        info!(path = %path.display(), "SQLite dump complete");
        Ok(())
    }

    async fn restore(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        Self::verify_source(path).await?;

        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .await
                .map_err(|e| Error::restore(ENGINE, format!("close failed: {}", e)))?;
        }

        let staged = self.sibling(".restore");
        let swap = async {
            tokio::fs::copy(path, &staged).await?;
            tokio::fs::rename(&staged, &self.db_path).await
        };
        if let Err(e) = swap.await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(Error::restore(
                ENGINE,
                format!("cannot replace {}: {}", self.db_path.display(), e),
            ));
        }
        for suffix in ["-journal", "-wal", "-shm"] {
            let _ = tokio::fs::remove_file(self.sibling(suffix)).await;
        }

        let connection = Self::open(&self.db_path, false).await.map_err(|e| {
            Error::restore(ENGINE, format!("reopen {}: {}", self.db_path.display(), e))
        })?;
        self.connection = Some(connection);

        info!(
            source = %path.display(),
            path = %self.db_path.display(),
            "SQLite restore complete"
        );
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}
