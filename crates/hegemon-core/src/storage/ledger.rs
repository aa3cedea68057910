//! Metadata ledger: the ordered set of artifact descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::Result;

/// Current on-disk ledger format version
pub const LEDGER_VERSION: u32 = 1;

/// Metadata for one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// File name relative to the storage root
    pub file_name: String,

    /// When the artifact was committed
    pub created_at: DateTime<Utc>,

    pub size_bytes: u64,

    /// Lowercase hex SHA-256 of the stored file
    pub checksum: String,
}

/// Descriptors in insertion (creation) order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,

    #[serde(default)]
    pub artifacts: Vec<ArtifactDescriptor>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            version: LEDGER_VERSION,
            artifacts: Vec::new(),
        }
    }
}

impl Ledger {
    /// Load the ledger, treating a missing file as empty
    pub async fn load(path: &Path) -> Result<Self> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(StorageError::Ledger(format!(
                    "Failed to read ledger {}: {}",
                    path.display(),
                    e
                ))
                .into())
            }
        };

        let ledger: Ledger = serde_json::from_slice(&data).map_err(|e| {
            StorageError::Ledger(format!("Failed to parse ledger {}: {}", path.display(), e))
        })?;

        if ledger.version != LEDGER_VERSION {
            return Err(StorageError::Ledger(format!(
                "Unsupported ledger version {} in {}",
                ledger.version,
                path.display()
            ))
            .into());
        }

        Ok(ledger)
    }

    /// Write the ledger wholesale via a temporary sibling and rename
    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        let tmp = path.with_extension("json.tmp");

        let write = async {
            let mut file = fs::File::create(&tmp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&tmp, path).await
        };

        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StorageError::Ledger(format!(
                "Failed to write ledger {}: {}",
                path.display(),
                e
            ))
            .into());
        }

        Ok(())
    }

    pub fn find(&self, file_name: &str) -> Option<&ArtifactDescriptor> {
        self.artifacts.iter().find(|a| a.file_name == file_name)
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.find(file_name).is_some()
    }

    /// Remove a descriptor, returning it if present
    pub fn remove(&mut self, file_name: &str) -> Option<ArtifactDescriptor> {
        let index = self
            .artifacts
            .iter()
            .position(|a| a.file_name == file_name)?;
        Some(self.artifacts.remove(index))
    }

    /// Descriptors ordered newest first; ties put the later insertion first
    pub fn newest_first(&self) -> Vec<&ArtifactDescriptor> {
        let mut indexed: Vec<(usize, &ArtifactDescriptor)> =
            self.artifacts.iter().enumerate().collect();
        indexed.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        indexed.into_iter().map(|(_, a)| a).collect()
    }
}
