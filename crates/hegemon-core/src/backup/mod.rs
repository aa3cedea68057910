//! Backup engine module.

pub mod engine;

pub use engine::{dump_file_name, BackupEngine, BackupKind, BackupReport};
