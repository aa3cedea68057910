//! Local artifact storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//!   backup_20240101_020000_full.sql.zst   stored artifacts
//!   metadata/backups.json                 descriptor ledger
//!   staging/                              raw dumps awaiting storage
//! ```

mod ledger;
mod manager;
mod space;

pub use ledger::{ArtifactDescriptor, Ledger, LEDGER_VERSION};
pub use manager::{checksum_file, StorageManager, LEDGER_FILE, METADATA_DIR, STAGING_DIR};
pub use space::{required_with_margin, FixedSpace, SpaceProbe, DiskSpaceProbe};
