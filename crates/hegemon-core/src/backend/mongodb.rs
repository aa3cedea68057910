//! MongoDB backend: `mongodump` / `mongorestore` archives.
//!
//! The password reaches the tools through a `--config` YAML file, never argv.

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::{debug, info};

use super::command::{run_tool, SecretFile, ToolOutput};
use super::{ensure_connected, looks_like_auth_failure, resolve_password, DatabaseBackend};
use crate::config::DatabaseTarget;
use crate::credentials::CredentialResolver;
use crate::{Error, Result};

const ENGINE: &str = "mongodb";

#[derive(Serialize)]
struct ToolConfig<'a> {
    password: &'a str,
}

pub struct MongoBackend {
    target: DatabaseTarget,
    credentials: Arc<CredentialResolver>,
    password: Option<String>,
}

impl MongoBackend {
    pub fn new(target: DatabaseTarget, credentials: Arc<CredentialResolver>) -> Self {
        Self {
            target,
            credentials,
            password: None,
        }
    }

    fn config_file(&self) -> Result<SecretFile> {
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| Error::connection(ENGINE, "not connected"))?;
        let yaml = serde_yaml::to_string(&ToolConfig { password })
            .map_err(|e| Error::Serialization(e.to_string()))?;
        SecretFile::create("hegemon-mongo-", &yaml)
    }

    fn tool_command(&self, tool: &str, config: &SecretFile, archive: &Path) -> Command {
        let mut command = Command::new(tool);
        command
            .arg(format!("--config={}", config.path().display()))
            .arg(format!("--host={}", self.target.host))
            .arg(format!("--port={}", self.target.port))
            .arg(format!("--username={}", self.target.username))
            .arg("--authenticationDatabase=admin")
            .arg(format!("--archive={}", archive.display()))
            .arg("--gzip");
        command
    }

    fn failure(&self, tool: &str, output: &ToolOutput, stage: fn(&str, String) -> Error) -> Error {
        if looks_like_auth_failure(&output.stderr) {
            Error::authentication(ENGINE, output.describe(tool))
        } else {
            stage(ENGINE, output.describe(tool))
        }
    }
}

#[async_trait]
impl DatabaseBackend for MongoBackend {
    fn name(&self) -> &str {
        ENGINE
    }

    fn dump_extension(&self) -> &'static str {
        ".archive"
    }

    async fn connect(&mut self) -> Result<()> {
        if self.password.is_some() {
            return Ok(());
        }

        let password = resolve_password(&self.credentials, &self.target, ENGINE)?;
        let timeout = Duration::from_secs(self.target.connect_timeout_secs);
        let address = (self.target.host.as_str(), self.target.port);

        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                Error::connection(
                    ENGINE,
                    format!("connect to {}:{} timed out", self.target.host, self.target.port),
                )
            })?
            .map_err(|e| {
                Error::connection(
                    ENGINE,
                    format!("{}:{} unreachable: {}", self.target.host, self.target.port, e),
                )
            })?;
        drop(stream);

        info!(
            host = %self.target.host,
            port = self.target.port,
            database = %self.target.database,
            "MongoDB reachable"
        );
        self.password = Some(password);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.password.take().is_some() {
            debug!("Disconnected from MongoDB");
        }
        Ok(())
    }

    async fn dump(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let config = self.config_file()?;

        let mut command = self.tool_command("mongodump", &config, path);
        command.arg(format!("--db={}", self.target.database));

        let output = run_tool("mongodump", command, None, |m| Error::dump(ENGINE, m)).await?;
        drop(config);
        if !output.success {
            return Err(self.failure("mongodump", &output, |e, m| Error::dump(e, m)));
        }

        info!(path = %path.display(), "MongoDB dump complete");
        Ok(())
    }

    async fn restore(&mut self, path: &Path) -> Result<()> {
        ensure_connected(self.is_connected(), ENGINE)?;
        let config = self.config_file()?;

        let mut command = self.tool_command("mongorestore", &config, path);
        command
            .arg("--drop")
            .arg(format!("--nsInclude={}.*", self.target.database));

        let output =
            run_tool("mongorestore", command, None, |m| Error::restore(ENGINE, m)).await?;
        drop(config);
        if !output.success {
            return Err(self.failure("mongorestore", &output, |e, m| Error::restore(e, m)));
        }

        info!(path = %path.display(), "MongoDB restore complete");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.password.is_some()
    }
}
