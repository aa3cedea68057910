//! Storage manager: artifact persistence, checksums, and retention.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::ledger::{ArtifactDescriptor, Ledger};
use super::space::{required_with_margin, SpaceProbe, DiskSpaceProbe};
use crate::config::RetentionPolicy;
use crate::error::StorageError;
use crate::{Error, Result};

/// Subdirectory of the root holding the ledger
pub const METADATA_DIR: &str = "metadata";

/// Ledger file name inside [`METADATA_DIR`]
pub const LEDGER_FILE: &str = "backups.json";

/// Subdirectory of the root holding raw dumps before they are stored
pub const STAGING_DIR: &str = "staging";

const CHECKSUM_BUFFER: usize = 64 * 1024;

/// Manages artifacts under a local storage root.
///
/// The ledger at `metadata/backups.json` is the single source of truth:
/// listing, deletion and retention never scan the directory.
pub struct StorageManager {
    root: PathBuf,
    probe: Arc<dyn SpaceProbe>,
    ledger_lock: Mutex<()>,
}

impl StorageManager {
    /// Create a manager that measures free space from the mounted disk list
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_space_probe(root, Arc::new(DiskSpaceProbe))
    }

    pub fn with_space_probe(root: impl Into<PathBuf>, probe: Arc<dyn SpaceProbe>) -> Self {
        Self {
            root: root.into(),
            probe,
            ledger_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    fn ledger_path(&self) -> PathBuf {
        self.root.join(METADATA_DIR).join(LEDGER_FILE)
    }

    /// Create the root, metadata and staging directories if missing
    pub async fn ensure_layout(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.root.join(METADATA_DIR),
            self.staging_dir(),
        ] {
            fs::create_dir_all(&dir).await.map_err(|e| {
                StorageError::Backend(format!(
                    "Failed to create directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Bytes available on the volume holding the root
    pub async fn available_space(&self) -> Result<u64> {
        let mut probe_path = self.root.as_path();
        while !probe_path.exists() {
            match probe_path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => probe_path = parent,
                _ => {
                    probe_path = Path::new(".");
                    break;
                }
            }
        }
        self.probe.available_bytes(probe_path)
    }

    /// Copy `source` into the root, checksum it, and commit a descriptor.
    ///
    /// Refuses when free space is below the source size plus 10%. The
    /// descriptor is appended only after the checksum is computed; if the
    /// ledger cannot be written the stored copy is removed again.
    pub async fn store(&self, source: &Path) -> Result<ArtifactDescriptor> {
        let metadata = fs::metadata(source).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(source.display().to_string())
            } else {
                StorageError::Backend(format!(
                    "Failed to stat source {}: {}",
                    source.display(),
                    e
                ))
            }
        })?;
        if !metadata.is_file() {
            return Err(Error::Validation(format!(
                "Artifact source is not a regular file: {}",
                source.display()
            )));
        }

        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "Artifact source has no usable file name: {}",
                    source.display()
                ))
            })?
            .to_string();
        validate_name(&file_name)?;

        self.ensure_layout().await?;

        let size = metadata.len();
        let required = required_with_margin(size);
        let available = self.available_space().await?;
        if available < required {
            return Err(StorageError::InsufficientSpace {
                required,
                available,
            }
            .into());
        }

        let _guard = self.ledger_lock.lock().await;
        let mut ledger = Ledger::load(&self.ledger_path()).await?;

        let stored_name = self.unique_name(&ledger, &file_name);
        let dest = self.root.join(&stored_name);
        let partial = self.root.join(format!("{}.partial", stored_name));

        debug!(
            source = %source.display(),
            dest = %dest.display(),
            "Copying artifact into storage"
        );
        if let Err(e) = fs::copy(source, &partial).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StorageError::Backend(format!(
                "Failed to copy {} into storage: {}",
                source.display(),
                e
            ))
            .into());
        }
        fs::rename(&partial, &dest).await.map_err(|e| {
            StorageError::Backend(format!(
                "Failed to move {} into place: {}",
                partial.display(),
                e
            ))
        })?;

        let checksum = match checksum_file(&dest).await {
            Ok(checksum) => checksum,
            Err(e) => {
                let _ = fs::remove_file(&dest).await;
                return Err(e);
            }
        };

        let descriptor = ArtifactDescriptor {
            file_name: stored_name,
            created_at: Utc::now(),
            size_bytes: size,
            checksum,
        };
        ledger.artifacts.push(descriptor.clone());

        if let Err(e) = ledger.save(&self.ledger_path()).await {
            if let Err(rm) = fs::remove_file(&dest).await {
                warn!(
                    path = %dest.display(),
                    error = %rm,
                    "Failed to remove uncommitted artifact"
                );
            }
            return Err(e);
        }

        info!(
            artifact = %descriptor.file_name,
            size_bytes = descriptor.size_bytes,
            checksum = %descriptor.checksum,
            "Stored artifact"
        );
        Ok(descriptor)
    }

    /// Resolve a ledger entry to its path on disk
    pub async fn retrieve(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        let ledger = Ledger::load(&self.ledger_path()).await?;
        if !ledger.contains(name) {
            return Err(StorageError::NotFound(name.to_string()).into());
        }

        let path = self.root.join(name);
        if fs::metadata(&path).await.is_err() {
            return Err(StorageError::NotFound(format!(
                "{} is in the ledger but missing from {}",
                name,
                self.root.display()
            ))
            .into());
        }
        Ok(path)
    }

    /// All descriptors, in creation order
    pub async fn list(&self) -> Result<Vec<ArtifactDescriptor>> {
        Ok(Ledger::load(&self.ledger_path()).await?.artifacts)
    }

    /// Delete an artifact's file, then its descriptor.
    ///
    /// Returns `false` when the ledger has no such entry. If the file
    /// cannot be removed the descriptor is kept.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let _guard = self.ledger_lock.lock().await;
        self.delete_locked(name).await
    }

    async fn delete_locked(&self, name: &str) -> Result<bool> {
        let mut ledger = Ledger::load(&self.ledger_path()).await?;
        if !ledger.contains(name) {
            return Ok(false);
        }

        let path = self.root.join(name);
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(artifact = name, "Artifact file already gone, dropping descriptor");
            }
            Err(e) => {
                return Err(StorageError::Backend(format!(
                    "Failed to delete {}: {}",
                    path.display(),
                    e
                ))
                .into());
            }
        }

        ledger.remove(name);
        ledger.save(&self.ledger_path()).await?;
        info!(artifact = name, "Deleted artifact");
        Ok(true)
    }

    /// Delete artifacts beyond the policy's count and age bounds.
    ///
    /// Entries are ranked newest first. Each deletion is independent: an
    /// entry whose file cannot be removed is kept and the rest proceed.
    pub async fn apply_retention(&self, policy: &RetentionPolicy) -> Result<usize> {
        let _guard = self.ledger_lock.lock().await;
        let ledger = Ledger::load(&self.ledger_path()).await?;

        let cutoff = (policy.max_age_days > 0)
            .then(|| Utc::now() - Duration::days(i64::from(policy.max_age_days)));

        let candidates: Vec<String> = ledger
            .newest_first()
            .into_iter()
            .enumerate()
            .filter(|(rank, descriptor)| {
                let over_count = policy.max_count > 0 && *rank >= policy.max_count;
                let too_old = cutoff.is_some_and(|cutoff| descriptor.created_at < cutoff);
                over_count || too_old
            })
            .map(|(_, descriptor)| descriptor.file_name.clone())
            .collect();

        if candidates.is_empty() {
            debug!(
                artifacts = ledger.artifacts.len(),
                "Retention: nothing to delete"
            );
            return Ok(0);
        }

        let mut deleted = 0;
        for name in &candidates {
            match self.delete_locked(name).await {
                Ok(true) => deleted += 1,
                Ok(false) => {}
                Err(e) => warn!(artifact = %name, error = %e, "Retention failed to delete artifact"),
            }
        }

        info!(
            deleted = deleted,
            candidates = candidates.len(),
            max_count = policy.max_count,
            max_age_days = policy.max_age_days,
            "Applied retention policy"
        );
        Ok(deleted)
    }

    /// Recompute an artifact's checksum and compare it with the ledger
    pub async fn verify(&self, name: &str) -> Result<bool> {
        validate_name(name)?;
        let ledger = Ledger::load(&self.ledger_path()).await?;
        let descriptor = ledger
            .find(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        let path = self.root.join(name);
        let actual = checksum_file(&path).await?;
        let ok = actual == descriptor.checksum;
        if !ok {
            warn!(
                artifact = name,
                expected = %descriptor.checksum,
                actual = %actual,
                "Checksum mismatch"
            );
        }
        Ok(ok)
    }

    /// Pick a name not used by the ledger or an existing file.
    ///
    /// `backup_x_full.db.zst` becomes `backup_x_full_1.db.zst`, `_2`, ...
    fn unique_name(&self, ledger: &Ledger, file_name: &str) -> String {
        let taken = |name: &str| ledger.contains(name) || self.root.join(name).exists();
        if !taken(file_name) {
            return file_name.to_string();
        }

        let (stem, exts) = match file_name.find('.') {
            Some(idx) => file_name.split_at(idx),
            None => (file_name, ""),
        };
        (1u32..)
            .map(|n| format!("{}_{}{}", stem, n, exts))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| file_name.to_string())
    }
}

/// Stream a file through SHA-256 and return the lowercase hex digest
pub async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path.display().to_string())
        } else {
            StorageError::Backend(format!("Failed to open {}: {}", path.display(), e))
        }
    })?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHECKSUM_BUFFER];
    loop {
        let n = file.read(&mut buf).await.map_err(|e| {
            StorageError::Backend(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Artifact names are plain file names inside the root
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(Error::Validation(format!("Invalid artifact name: {:?}", name)));
    }
    Ok(())
}
