//! MySQL backend: `mysqldump` / `mysql` with a `--defaults-extra-file`.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::command::{run_tool, SecretFile};
use super::{ensure_connected, resolve_password, DatabaseBackend};
use crate::config::DatabaseTarget;
use crate::credentials::CredentialResolver;
use crate::{Error, Result};

const ENGINE: &str = "mysql";

/// Server error number for "Access denied for user"
const ER_ACCESS_DENIED: &str = "1045";

pub struct MySqlBackend {
    target: DatabaseTarget,
    credentials: Arc<CredentialResolver>,
    connection: Option<MySqlConnection>,
    password: Option<String>,
}

impl MySqlBackend {
    pub fn new(target: DatabaseTarget, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            target,
            credentials,
            connection: None,
            password: None,
        }
    }

    fn defaults_file(&self) -> Result<SecretFile> {
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| Error::connection(ENGINE, "not connected"))?;
        let escaped = password.replace('\\', "\\\\").replace('"', "\\\"");
        SecretFile::create(
            "hegemon-mysql-",
            &format!("[client]\npassword=\"{}\"\n", escaped),
        )
    }

    /// `--defaults-extra-file` must come first on the command line
    fn tool_command(&self, tool: &str, defaults: &SecretFile) -> Command {
        let mut command = Command::new(tool);
        command
            .arg(format!("--defaults-extra-file={}", defaults.path().display()))
            .arg(format!("--host={}", self.target.host))
            .arg(format!("--port={}", self.target.port))
            .arg(format!("--user={}", self.target.username));
        command
    }
}

fn classify(err: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &err {
        let mysql_code = db
            .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
            .map(|e| e.number().to_string());
        if db.code().as_deref() == Some("28000") || mysql_code.as_deref() == Some(ER_ACCESS_DENIED)
        {
            return Error::authentication(ENGINE, err.to_string());
        }
    }
    super::classify_connect_error(ENGINE, err)
}

#[async_trait]
impl DatabaseBackend for MySqlBackend {
    fn name(&self) -> &str {
        ENGINE
    }

    fn dump_extension(&self) -> &'static str {
        ".sql"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        let password = resolve_password(&self.credentials, &self.target, ENGINE)?;
        let options = MySqlConnectOptions::new()
            .host(&self.target.host)
            .port(self.target.port)
            .username(&self.target.username)
            .password(&password)
            .database(&self.target.database)
            .disable_statement_logging();

        let timeout = Duration::from_secs(self.target.connect_timeout_secs);
        let connection = tokio::time::timeout(timeout, options.connect())
            .await
            .map_err(|_| {
                Error::connection(
                    ENGINE,
                    format!(
                        "connect to {}:{} timed out after {}s",
                        self.target.host, self.target.port, self.target.connect_timeout_secs
                    ),
                )
            })?
            .map_err(classify)?;

        info!(
            host = %self.target.host,
            port = self.target.port,
            database = %self.target.database,
            "Connected to MySQL"
        );
        self.connection = Some(connection);
        self.password = Some(password);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.password = None;
        if let Some(connection) = self.connection.take() {
            connection
                .close()
                .await
                .map_err(|e| Error::connection(ENGINE, format!("close failed: {}", e)))?;
            debug!("Disconnected from MySQL");
        }
        Ok(())
    }

    async fn dump(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let defaults = self.defaults_file()?;

        let mut command = self.tool_command("mysqldump", &defaults);
        command
            .arg("--single-transaction")
            .arg("--add-drop-database")
            .arg("--add-drop-table")
            .arg("--create-options")
            .arg("--quote-names")
            .arg("--set-gtid-purged=OFF")
            .arg(format!("--result-file={}", path.display()))
            .arg("--databases")
            .arg(&self.target.database);

        let output = run_tool("mysqldump", command, None, |m| Error::dump(ENGINE, m)).await?;
        drop(defaults);
        if !output.success {
            return Err(Error::dump(ENGINE, output.describe("mysqldump")));
        }

        info!(path = %path.display(), "MySQL dump complete");
        Ok(())
    }

    async fn restore(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let defaults = self.defaults_file()?;

        let mut command = self.tool_command("mysql", &defaults);
        command.arg(&self.target.database);

        let output = run_tool("mysql", command, Some(path), |m| Error::restore(ENGINE, m)).await?;
        drop(defaults);
        if !output.success {
            return Err(Error::restore(ENGINE, output.describe("mysql")));
        }

        info!(path = %path.display(), "MySQL restore complete");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}
