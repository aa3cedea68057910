//! Free-space probing for the storage volume.

use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

use crate::error::StorageError;
use crate::Result;

/// Reports the bytes available to unprivileged writers under a path
pub trait SpaceProbe: Send + Sync {
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// Reads free space from the mounted disk list.
///
/// The disk whose mount point is the longest prefix of the probed path wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiskSpaceProbe;

impl SpaceProbe for DiskSpaceProbe {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let path = std::fs::canonicalize(path).map_err(|e| {
            StorageError::Backend(format!("cannot resolve {}: {}", path.display(), e))
        })?;

        let disks = Disks::new_with_refreshed_list();
        let mounts = disks
            .list()
            .iter()
            .map(|disk| (disk.mount_point(), disk.available_space()));

        match covering_mount(mounts, &path) {
            Some((mount, available)) => {
                debug!(
                    path = %path.display(),
                    mount = %mount.display(),
                    available_bytes = available,
                    "Probed free space"
                );
                Ok(available)
            }
            None => Err(StorageError::Backend(format!(
                "no mounted disk holds {}",
                path.display()
            ))
            .into()),
        }
    }
}

/// The mount with the longest mount point that contains `path`
fn covering_mount<'a>(
    mounts: impl IntoIterator<Item = (&'a Path, u64)>,
    path: &Path,
) -> Option<(&'a Path, u64)> {
    mounts
        .into_iter()
        .filter(|(mount, _)| path.starts_with(mount))
        .max_by_key(|(mount, _)| mount.components().count())
}

/// Always reports the same number of bytes; simulates a fixed-size volume
#[derive(Debug, Clone, Copy)]
pub struct FixedSpace(pub u64);

impl SpaceProbe for FixedSpace {
    fn available_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0)
    }
}

/// Bytes required to store `size` bytes with the 10% safety margin
pub fn required_with_margin(size: u64) -> u64 {
    size.saturating_add(size.div_ceil(10))
}
