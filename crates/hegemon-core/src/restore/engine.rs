//! Restore orchestration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFactory, DatabaseBackend, EngineBackendFactory};
use crate::compression::{detect_from_extension, Codec};
use crate::config::{CompressionSpec, Config};
use crate::credentials::CredentialResolver;
use crate::error::{CompressionError, StorageError};
use crate::notification::{LogNotifier, Notifier};
use crate::storage::StorageManager;
use crate::{Error, Result};

/// Outcome of a successful restore
#[derive(Debug, Clone)]
pub struct RestoreReport {
    /// Resolved artifact path
    pub artifact: PathBuf,
    pub decompressed: bool,
    pub elapsed: Duration,
}

/// Restore engine: validate, connect, decompress, restore, clean up
pub struct RestoreEngine {
    config: Config,
    factory: Arc<dyn BackendFactory>,
    storage: Arc<StorageManager>,
    codec: Option<Codec>,
    notifier: Arc<dyn Notifier>,
}

impl RestoreEngine {
    pub fn new(config: Config, credentials: Arc<CredentialResolver>) -> Result<Self> {
        config.validate()?;

        // Restores decode whether or not compression of new backups is on.
        // An unsupported configured format leaves detection to the artifact.
        let codec = Codec::new(config.backup.compression.spec()).ok();

        Ok(Self {
            factory: Arc::new(EngineBackendFactory::new(credentials)),
            storage: Arc::new(StorageManager::new(config.storage.path.clone())),
            notifier: Arc::new(LogNotifier::from_config(&config.logging)),
            codec,
            config,
        })
    }

    pub fn with_backend_factory(mut self, factory: Arc<dyn BackendFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_storage(mut self, storage: Arc<StorageManager>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Restore from a ledger entry name or a filesystem path.
    ///
    /// A missing artifact is rejected before any backend is created.
    pub async fn run(&self, artifact: &str) -> Result<RestoreReport> {
        let started = Instant::now();
        let path = self.resolve_artifact(artifact).await?;

        info!(
            artifact = %path.display(),
            engine = %self.config.database.engine,
            database = %self.config.database.database,
            "Starting restore"
        );
        self.notifier.notify(&format!(
            "Restore started: {} into {} ({})",
            path.display(),
            self.config.database.database,
            self.config.database.engine
        ));

        match self.pipeline(&path).await {
            Ok(decompressed) => {
                let report = RestoreReport {
                    artifact: path,
                    decompressed,
                    elapsed: started.elapsed(),
                };
                info!(
                    artifact = %report.artifact.display(),
                    decompressed = report.decompressed,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Restore completed"
                );
                self.notifier
                    .notify(&format!("Restore completed: {}", report.artifact.display()));
                Ok(report)
            }
            Err(e) => {
                error!(artifact = %path.display(), error = %e, "Restore failed");
                self.notifier.notify(&format!("Restore failed: {}", e));
                Err(e)
            }
        }
    }

    async fn resolve_artifact(&self, artifact: &str) -> Result<PathBuf> {
        let artifact = artifact.trim();
        if artifact.is_empty() {
            return Err(Error::Validation(
                "artifact name or path must not be empty".to_string(),
            ));
        }

        let candidate = Path::new(artifact);
        let is_path = candidate.is_absolute() || candidate.components().count() > 1;
        if !is_path {
            match self.storage.retrieve(artifact).await {
                Ok(path) => return Ok(path),
                Err(Error::Storage(StorageError::NotFound(_))) | Err(Error::Validation(_)) => {
                    debug!(artifact = artifact, "Not a ledger entry, trying as a path");
                }
                Err(e) => return Err(e),
            }
        }

        match tokio::fs::metadata(candidate).await {
            Ok(meta) if meta.is_file() => Ok(candidate.to_path_buf()),
            Ok(_) => Err(Error::Validation(format!(
                "artifact is not a regular file: {}",
                artifact
            ))),
            Err(_) => Err(Error::Validation(format!(
                "artifact does not exist: {}",
                artifact
            ))),
        }
    }

    async fn pipeline(&self, artifact: &Path) -> Result<bool> {
        let mut backend = self.factory.create(&self.config.database)?;

        let restored = match backend.connect().await {
            Ok(()) => self.restore_from(backend.as_mut(), artifact).await,
            Err(e) => Err(e),
        };

        if let Err(e) = backend.disconnect().await {
            warn!(backend = backend.name(), error = %e, "Failed to disconnect");
        }

        restored
    }

    async fn restore_from(&self, backend: &mut dyn DatabaseBackend, artifact: &Path) -> Result<bool> {
        let name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // The artifact's extension decides the codec; the configured format
        // only supplies it when they agree.
        let codec = match self.codec {
            Some(codec) if codec.matches(&name) => Some(codec),
            _ => match detect_from_extension(&name) {
                Some(format) => {
                    let spec = CompressionSpec {
                        format,
                        level: self.config.backup.compression.level,
                    };
                    let codec = Codec::new(spec).map_err(|_| {
                        CompressionError::UnsupportedFormat(format!(
                            "{} (artifact {})",
                            format, name
                        ))
                    })?;
                    Some(codec)
                }
                None => None,
            },
        };

        let Some(codec) = codec else {
            backend.restore(artifact).await?;
            return Ok(false);
        };

        let temp = decompress_to_sibling(codec, artifact).await?;
        let result = backend.restore(&temp).await;

        let temp_display = temp.display().to_string();
        if let Err(e) = temp.close() {
            warn!(path = %temp_display, error = %e, "Failed to remove decompressed file");
        }

        result.map(|()| true)
    }
}

/// Decompress `artifact` next to itself; the file is removed when dropped
async fn decompress_to_sibling(codec: Codec, artifact: &Path) -> Result<TempPath> {
    let dir = artifact
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = stem
        .strip_suffix(codec.file_extension())
        .unwrap_or(&stem)
        .to_string();

    let temp = tempfile::Builder::new()
        .prefix(".restore-")
        .suffix(&format!("-{}", stem))
        .tempfile_in(dir)
        .map_err(|e| CompressionError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?
        .into_temp_path();

    let (src, dst) = (artifact.to_path_buf(), temp.to_path_buf());
    let size = tokio::task::spawn_blocking(move || codec.decompress(&src, &dst))
        .await
        .map_err(|e| CompressionError::Task(e.to_string()))??;

    debug!(
        artifact = %artifact.display(),
        decompressed_bytes = size,
        "Decompressed artifact"
    );
    Ok(temp)
}
