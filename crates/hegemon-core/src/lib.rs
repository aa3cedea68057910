//! Hegemon Core Library
//!
//! This crate provides the core functionality for backing up and restoring
//! PostgreSQL, MySQL, MongoDB and SQLite databases to a local, checksummed
//! artifact store with compression and retention.

pub mod backend;
pub mod backup;
pub mod compression;
pub mod config;
pub mod credentials;
pub mod error;
pub mod notification;
pub mod restore;
pub mod scheduler;
pub mod storage;

pub use backend::{create_backend, BackendFactory, DatabaseBackend, EngineBackendFactory};
pub use backup::{BackupEngine, BackupKind, BackupReport};
pub use compression::Codec;
pub use config::{
    CompressionFormat, CompressionLevel, CompressionSpec, Config, DatabaseTarget, EngineKind,
    RetentionPolicy,
};
pub use credentials::{
    CredentialKind, CredentialProvider, CredentialRecord, CredentialResolver, CredentialSource,
};
pub use error::{CompressionError, Error, Result, StorageError};
pub use notification::{LogNotifier, Notifier};
pub use restore::{RestoreEngine, RestoreReport};
pub use scheduler::{CronSpec, Scheduler};
pub use storage::{ArtifactDescriptor, SpaceProbe, StorageManager};
