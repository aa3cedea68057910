//! Multi-source credential resolution.
//!
//! A [`CredentialResolver`] maps a logical key (for example
//! `ORDERS_DB_PASSWORD`) to a secret by trying an ordered list of sources.
//! Ephemeral credentials stored in memory are consulted first and are
//! consumed by the read that returns them.

mod sources;

pub use sources::{EnvironmentProvider, FileProvider, ENV_PREFIX};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{Error, Result};

/// What a secret is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    Password,
    ApiKey,
    Certificate,
    Token,
}

/// Where a secret came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    File,
    #[serde(alias = "keystore")]
    KeyStore,
    #[serde(alias = "config")]
    ConfigFile,
    #[serde(alias = "ssm")]
    ParameterStore,
    Vault,
}

impl CredentialSource {
    /// Lookup order used when the caller expresses no preference
    pub const DEFAULT_ORDER: [CredentialSource; 6] = [
        CredentialSource::KeyStore,
        CredentialSource::File,
        CredentialSource::Environment,
        CredentialSource::ParameterStore,
        CredentialSource::Vault,
        CredentialSource::ConfigFile,
    ];
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CredentialSource::Environment => "environment",
            CredentialSource::File => "file",
            CredentialSource::KeyStore => "keystore",
            CredentialSource::ConfigFile => "config",
            CredentialSource::ParameterStore => "parameter_store",
            CredentialSource::Vault => "vault",
        };
        f.write_str(name)
    }
}

/// A resolved secret.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub value: String,
    pub kind: CredentialKind,
    pub source: CredentialSource,
    pub ephemeral: bool,
}

impl fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("value", &"<redacted>")
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

/// A lookup backend for one credential source
pub trait CredentialProvider: Send + Sync {
    fn lookup(&self, key: &str, kind: CredentialKind) -> Option<String>;
}

/// Resolves credential keys against ordered sources.
///
/// Shared across the process behind an `Arc`; the ephemeral cache is
/// guarded by a mutex and wiped on drop.
pub struct CredentialResolver {
    ephemeral: Mutex<HashMap<String, CredentialRecord>>,
    providers: HashMap<CredentialSource, Box<dyn CredentialProvider>>,
}

impl CredentialResolver {
    /// Resolver with the environment and file sources registered
    pub fn new() -> Self {
        let mut resolver = Self::empty();
        resolver.providers.insert(
            CredentialSource::Environment,
            Box::new(EnvironmentProvider::default()),
        );
        resolver
            .providers
            .insert(CredentialSource::File, Box::new(FileProvider::default()));
        resolver
    }

    /// Resolver with no sources registered; only stored credentials resolve
    pub fn empty() -> Self {
        Self {
            ephemeral: Mutex::new(HashMap::new()),
            providers: HashMap::new(),
        }
    }

    /// Convenience for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register (or replace) the provider for a source.
    ///
    /// The inline config source cannot be backed by a provider.
    pub fn with_provider(
        mut self,
        source: CredentialSource,
        provider: impl CredentialProvider + 'static,
    ) -> Result<Self> {
        if source == CredentialSource::ConfigFile {
            return Err(Error::Credential(
                "inline config credentials are disabled".to_string(),
            ));
        }
        self.providers.insert(source, Box::new(provider));
        Ok(self)
    }

    /// Resolve `key`, trying `preferred` sources in order (or the default
    /// order when empty). Returns `None` when no source has it.
    pub fn get(
        &self,
        key: &str,
        kind: CredentialKind,
        preferred: &[CredentialSource],
    ) -> Option<CredentialRecord> {
        if let Some(record) = self.take_ephemeral(key) {
            debug!(key = key, "Using stored ephemeral credential");
            return Some(record);
        }

        let order: &[CredentialSource] = if preferred.is_empty() {
            &CredentialSource::DEFAULT_ORDER
        } else {
            preferred
        };

        for &source in order {
            if let Some(value) = self.lookup(source, key, kind) {
                debug!(key = key, source = %source, "Resolved credential");
                return Some(CredentialRecord {
                    value,
                    kind,
                    source,
                    ephemeral: false,
                });
            }
        }

        warn!(key = key, "Credential not found in any source");
        None
    }

    /// Resolve `key` or fail with a credential error
    pub fn require(
        &self,
        key: &str,
        kind: CredentialKind,
        preferred: &[CredentialSource],
    ) -> Result<CredentialRecord> {
        self.get(key, kind, preferred)
            .ok_or_else(|| Error::Credential(format!("No credential found for key {}", key)))
    }

    fn lookup(&self, source: CredentialSource, key: &str, kind: CredentialKind) -> Option<String> {
        if source == CredentialSource::ConfigFile {
            return None;
        }
        self.providers
            .get(&source)
            .and_then(|provider| provider.lookup(key, kind))
    }

    fn take_ephemeral(&self, key: &str) -> Option<CredentialRecord> {
        let mut cache = self.ephemeral.lock();
        match cache.get(key) {
            Some(record) if record.ephemeral => cache.remove(key),
            Some(record) => Some(record.clone()),
            None => None,
        }
    }

    /// Cache a credential in memory. Ephemeral entries are consumed by the
    /// first `get`; others stay until cleared.
    pub fn store_credential(
        &self,
        key: &str,
        value: impl Into<String>,
        kind: CredentialKind,
        source: CredentialSource,
        ephemeral: bool,
    ) {
        self.ephemeral.lock().insert(
            key.to_string(),
            CredentialRecord {
                value: value.into(),
                kind,
                source,
                ephemeral,
            },
        );
    }

    /// Forget the cached credential for `key`
    pub fn clear(&self, key: &str) -> bool {
        self.ephemeral.lock().remove(key).is_some()
    }

    /// Forget every cached credential
    pub fn clear_all(&self) {
        self.ephemeral.lock().clear();
    }

    pub fn cached_count(&self) -> usize {
        self.ephemeral.lock().len()
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CredentialResolver {
    fn drop(&mut self) {
        self.ephemeral.get_mut().clear();
    }
}
