//! Backup orchestration.

use chrono::{DateTime, Local};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendFactory, DatabaseBackend, EngineBackendFactory};
use crate::compression::Codec;
use crate::config::Config;
use crate::credentials::CredentialResolver;
use crate::error::CompressionError;
use crate::notification::{LogNotifier, Notifier};
use crate::storage::{ArtifactDescriptor, StorageManager};
use crate::{Error, Result};

/// Backup type label.
///
/// Every kind currently produces a full dump; the label only names the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
    Differential,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "differential" => Ok(BackupKind::Differential),
            "" => Err(Error::Validation("backup type must not be empty".to_string())),
            other => Err(Error::Validation(format!(
                "unknown backup type {:?} (expected full, incremental or differential)",
                other
            ))),
        }
    }
}

/// Outcome of a successful backup run
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub kind: BackupKind,
    pub artifact: ArtifactDescriptor,
    /// False when compression was disabled or fell back to the raw dump
    pub compressed: bool,
    pub retention_deleted: usize,
    pub elapsed: Duration,
}

/// Backup engine: connect, dump, compress, store, apply retention.
///
/// Runs are serialised by an internal lock so scheduled and manual runs
/// never overlap.
pub struct BackupEngine {
    config: Config,
    factory: Arc<dyn BackendFactory>,
    storage: Arc<StorageManager>,
    codec: Option<Codec>,
    notifier: Arc<dyn Notifier>,
    run_lock: Arc<Mutex<()>>,
}

impl BackupEngine {
    /// Create a backup engine for the built-in database engines.
    ///
    /// Fails if compression is enabled with a format that has no codec.
    pub fn new(config: Config, credentials: Arc<CredentialResolver>) -> Result<Self> {
        config.validate()?;

        let codec = if config.backup.compression.enabled {
            Some(Codec::new(config.backup.compression.spec())?)
        } else {
            None
        };

        Ok(Self {
            factory: Arc::new(EngineBackendFactory::new(credentials)),
            storage: Arc::new(StorageManager::new(config.storage.path.clone())),
            notifier: Arc::new(LogNotifier::from_config(&config.logging)),
            run_lock: Arc::new(Mutex::new(())),
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

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &Arc<StorageManager> {
        &self.storage
    }

    /// Run one backup, waiting for any in-flight run to finish first
    pub async fn run(&self, kind: &str) -> Result<BackupReport> {
        let kind: BackupKind = kind.parse()?;
        let _guard = self.run_lock.lock().await;
        self.execute(kind).await
    }

    /// Run one backup unless another run is in flight (returns `None` then)
    pub async fn try_run(&self, kind: &str) -> Result<Option<BackupReport>> {
        let kind: BackupKind = kind.parse()?;
        let Ok(_guard) = self.run_lock.try_lock() else {
            return Ok(None);
        };
        self.execute(kind).await.map(Some)
    }

    async fn execute(&self, kind: BackupKind) -> Result<BackupReport> {
        let started = Instant::now();
        let database = &self.config.database;

        info!(
            kind = %kind,
            engine = %database.engine,
            database = %database.database,
            "Starting backup"
        );
        self.notifier.notify(&format!(
            "Backup started: {} backup of {} ({})",
            kind, database.database, database.engine
        ));

        match self.pipeline(kind, started).await {
            Ok(report) => {
                info!(
                    artifact = %report.artifact.file_name,
                    size_bytes = report.artifact.size_bytes,
                    compressed = report.compressed,
                    retention_deleted = report.retention_deleted,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "Backup completed"
                );
                self.notifier.notify(&format!(
                    "Backup completed: {} ({} bytes, sha256 {})",
                    report.artifact.file_name, report.artifact.size_bytes, report.artifact.checksum
                ));
                Ok(report)
            }
            Err(e) => {
                error!(kind = %kind, error = %e, "Backup failed");
                self.notifier.notify(&format!("Backup failed: {}", e));
                Err(e)
            }
        }
    }

    async fn pipeline(&self, kind: BackupKind, started: Instant) -> Result<BackupReport> {
        let mut backend = self.factory.create(&self.config.database)?;

        let produced = match backend.connect().await {
            Ok(()) => self.produce(backend.as_mut(), kind).await,
            Err(e) => Err(e),
        };

        if let Err(e) = backend.disconnect().await {
            warn!(backend = backend.name(), error = %e, "Failed to disconnect");
        }

        let (artifact, compressed, staged) = produced?;

        for path in staged {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to clean staging file");
                }
            }
        }

        let retention_deleted = match self
            .storage
            .apply_retention(&self.config.backup.retention)
            .await
        {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(error = %e, "Retention failed; backup is kept");
                0
            }
        };

        Ok(BackupReport {
            kind,
            artifact,
            compressed,
            retention_deleted,
            elapsed: started.elapsed(),
        })
    }

    /// Dump into staging, optionally compress, and store.
    ///
    /// Returns the descriptor, whether the stored file is compressed, and
    /// the staging files to clean up. Staging is left intact on failure.
    async fn produce(
        &self,
        backend: &mut dyn DatabaseBackend,
        kind: BackupKind,
    ) -> Result<(ArtifactDescriptor, bool, Vec<PathBuf>)> {
        self.storage.ensure_layout().await?;

        let dump_name = dump_file_name(Local::now(), kind, backend.dump_extension());
        let dump_path = self.storage.staging_dir().join(&dump_name);

        debug!(path = %dump_path.display(), "Dumping database");
        backend.dump(&dump_path).await?;

        let mut staged = vec![dump_path.clone()];
        let (artifact_path, compressed) = match &self.codec {
            Some(codec) => match self.compress(*codec, &dump_path).await {
                Ok(path) => {
                    staged.push(path.clone());
                    (path, true)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Compression failed; storing the uncompressed dump"
                    );
                    (dump_path.clone(), false)
                }
            },
            None => (dump_path.clone(), false),
        };

        let descriptor = self.storage.store(&artifact_path).await?;
        Ok((descriptor, compressed, staged))
    }

    async fn compress(
        &self,
        codec: Codec,
        src: &Path,
    ) -> std::result::Result<PathBuf, CompressionError> {
        let dst = with_suffix(src, codec.file_extension());

        let input_size = tokio::fs::metadata(src)
            .await
            .map_err(|e| CompressionError::Io {
                path: src.to_path_buf(),
                source: e,
            })?
            .len();
        let estimated = codec.estimate_size(input_size);
        match self.storage.available_space().await {
            Ok(available) if available < estimated => {
                return Err(CompressionError::InsufficientSpace {
                    estimated,
                    available,
                })
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Skipping compression space pre-flight"),
        }

        let (task_src, task_dst) = (src.to_path_buf(), dst.clone());
        let result = tokio::task::spawn_blocking(move || codec.compress(&task_src, &task_dst))
            .await
            .map_err(|e| CompressionError::Task(e.to_string()))
            .and_then(|r| r);

        match result {
            Ok(size) => {
                debug!(
                    input_bytes = input_size,
                    output_bytes = size,
                    path = %dst.display(),
                    "Compressed dump"
                );
                Ok(dst)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&dst).await;
                Err(e)
            }
        }
    }
}

/// `backup_<YYYYMMDD_HHMMSS>_<kind><ext>` in local time
pub fn dump_file_name(at: DateTime<Local>, kind: BackupKind, extension: &str) -> String {
    format!("backup_{}_{}{}", at.format("%Y%m%d_%H%M%S"), kind, extension)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
