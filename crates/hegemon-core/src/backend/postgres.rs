//! PostgreSQL backend: `pg_dump` / `psql` with a temporary PGPASSFILE.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::command::{run_tool, SecretFile};
use super::{classify_connect_error, ensure_connected, resolve_password, DatabaseBackend};
use crate::config::DatabaseTarget;
use crate::credentials::CredentialResolver;
use crate::{Error, Result};

const ENGINE: &str = "postgresql";

pub struct PostgresBackend {
    target: DatabaseTarget,
    credentials: Arc<CredentialResolver>,
    connection: Option<PgConnection>,
    password: Option<String>,
}

impl PostgresBackend {
    pub fn new(target: DatabaseTarget, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            target,
            credentials,
            connection: None,
            password: None,
        }
    }

    /// `host:port:database:user:password` with `:` and `\` escaped
    fn pgpass_line(&self, password: &str) -> String {
        let escape = |s: &str| s.replace('\\', "\\\\").replace(':', "\\:");
        format!(
            "{}:{}:{}:{}:{}\n",
            escape(&self.target.host),
            self.target.port,
            escape(&self.target.database),
            escape(&self.target.username),
            escape(password)
        )
    }

    fn tool_command(&self, tool: &str, passfile: &SecretFile) -> Command {
        let mut command = Command::new(tool);
        command
            .env("PGPASSFILE", passfile.path())
            .arg("--no-password")
            .arg("-h")
            .arg(&self.target.host)
            .arg("-p")
            .arg(self.target.port.to_string())
            .arg("-U")
            .arg(&self.target.username)
            .arg("-d")
            .arg(&self.target.database);
        command
    }

    fn passfile(&self) -> Result<SecretFile> {
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| Error::connection(ENGINE, "not connected"))?;
        SecretFile::create("hegemon-pgpass-", &self.pgpass_line(password))
    }
}

#[async_trait]
impl DatabaseBackend for PostgresBackend {
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
        let options = PgConnectOptions::new()
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
                    format!("connect to {}:{} timed out", self.target.host, self.target.port),
                )
            })?
            .map_err(|e| classify_connect_error(ENGINE, e))?;

        info!(
            host = %self.target.host,
            port = self.target.port,
            database = %self.target.database,
            "Connected to PostgreSQL"
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
            debug!("Disconnected from PostgreSQL");
        }
        Ok(())
    }

    async fn dump(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let passfile = self.passfile()?;

        let mut command = self.tool_command("pg_dump", &passfile);
        command.arg("-F").arg("p").arg("-f").arg(path);

        let output = run_tool("pg_dump", command, None, |m| Error::dump(ENGINE, m)).await?;
        drop(passfile);
        if !output.success {
            return Err(Error::dump(ENGINE, output.describe("pg_dump")));
        }

        info!(path = %path.display(), "PostgreSQL dump complete");
        Ok(())
    }

    async fn restore(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let passfile = self.passfile()?;

        let mut command = self.tool_command("psql", &passfile);
        command
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-f")
            .arg(path);

        let output = run_tool("psql", command, None, |m| Error::restore(ENGINE, m)).await?;
        drop(passfile);
        if !output.success {
            return Err(Error::restore(ENGINE, output.describe("psql")));
        }

        info!(path = %path.display(), "PostgreSQL restore complete");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }
}
