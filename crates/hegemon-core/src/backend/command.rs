//! External dump tool invocation and owner-only secret files.

use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// A short-lived secret file readable only by the current user.
///
/// Removed from disk when dropped, on success and failure paths alike.
pub(crate) struct SecretFile {
    file: NamedTempFile,
}

impl SecretFile {
    pub(crate) fn create(prefix: &str, contents: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new().prefix(prefix).tempfile()?;
        restrict_to_owner(file.path())?;
        file.write_all(contents.as_bytes())?;
        file.flush()?;
        Ok(Self { file })
    }

    pub(crate) fn path(&self) -> &Path {
        self.file.path()
    }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Result of one external tool run
pub(crate) struct ToolOutput {
    pub(crate) success: bool,
    pub(crate) status: String,
    pub(crate) stderr: String,
}

impl ToolOutput {
    /// `"<tool> exited with <status>: <stderr>"`
    pub(crate) fn describe(&self, tool: &str) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("{} exited with {}", tool, self.status)
        } else {
            format!("{} exited with {}: {}", tool, self.status, stderr)
        }
    }
}

/// Run `command` to completion, optionally feeding `stdin_from` as stdin.
///
/// Spawn failures (tool missing from PATH) are reported with `on_error`.
pub(crate) async fn run_tool(
    tool: &str,
    mut command: Command,
    stdin_from: Option<&Path>,
    on_error: impl Fn(String) -> Error,
) -> Result<ToolOutput> {
    match stdin_from {
        Some(path) => {
            let input = std::fs::File::open(path)
                .map_err(|e| on_error(format!("cannot open {}: {}", path.display(), e)))?;
            command.stdin(Stdio::from(input));
        }
        None => {
            command.stdin(Stdio::null());
        }
    }
    command
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(tool = tool, "Running external tool");
    let output = command
        .output()
        .await
        .map_err(|e| on_error(format!("failed to run {}: {}", tool, e)))?;

    Ok(ToolOutput {
        success: output.status.success(),
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
