//! Built-in credential providers.

use std::path::{Path, PathBuf};
use tracing::warn;

use super::{CredentialKind, CredentialProvider};

/// Prefix tried before the bare key for environment lookups
pub const ENV_PREFIX: &str = "HEGEMON_";

/// Reads `HEGEMON_<KEY>`, then `<KEY>`, from the process environment.
#[derive(Debug, Clone)]
pub struct EnvironmentProvider {
    prefix: String,
}

impl EnvironmentProvider {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvironmentProvider {
    fn default() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }
}

impl CredentialProvider for EnvironmentProvider {
    fn lookup(&self, key: &str, _kind: CredentialKind) -> Option<String> {
        let prefixed = format!("{}{}", self.prefix, key);
        let found = [prefixed.as_str(), key]
            .into_iter()
            .filter_map(|name| std::env::var(name).ok())
            .find(|value| !value.is_empty());
        found
    }
}

/// Reads the first line of `<dir>/<key>` from a list of search directories.
///
/// Files readable or writable by group or others are skipped.
#[derive(Debug, Clone)]
pub struct FileProvider {
    search_dirs: Vec<PathBuf>,
}

impl FileProvider {
    pub fn new(search_dirs: Vec<PathBuf>) -> Self {
        Self { search_dirs }
    }

    fn read_candidate(path: &Path) -> Option<String> {
        let metadata = std::fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        if !owner_only(&metadata) {
            warn!(
                path = %path.display(),
                "Ignoring credential file with group/other permissions"
            );
            return None;
        }

        let content = std::fs::read_to_string(path).ok()?;
        let line = content.lines().next()?.trim_end_matches('\r');
        if line.is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

impl Default for FileProvider {
    fn default() -> Self {
        let mut dirs = Vec::new();
        let home = std::env::var_os("HOME").map(PathBuf::from);
        if let Some(home) = &home {
            dirs.push(home.join(".config/hegemon/credentials"));
        }
        dirs.push(PathBuf::from("/etc/hegemon/credentials"));
        if let Some(home) = &home {
            dirs.push(home.join(".hegemon"));
        }
        Self::new(dirs)
    }
}

impl CredentialProvider for FileProvider {
    fn lookup(&self, key: &str, _kind: CredentialKind) -> Option<String> {
        if key.is_empty() || key.contains('/') || key.contains("..") {
            return None;
        }
        self.search_dirs
            .iter()
            .find_map(|dir| Self::read_candidate(&dir.join(key)))
    }
}

#[cfg(unix)]
fn owner_only(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o066 == 0
}

#[cfg(not(unix))]
fn owner_only(_metadata: &std::fs::Metadata) -> bool {
    true
}
