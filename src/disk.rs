//! A single-syscall disk usage sample for the pruner's pressure check.

use std::path::Path;

use nix::sys::statvfs::statvfs;

use crate::error::{Error, Result};

/// Total and free bytes of the filesystem backing `path`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Samples disk usage for `path` via a single `statvfs` call.
pub fn disk_usage(path: &Path) -> Result<DiskUsage> {
    let stats = statvfs(path).map_err(|errno| {
        Error::FilesystemIo(std::io::Error::from_raw_os_error(errno as i32))
    })?;

    let block_size = stats.fragment_size().max(1) as u64;
    Ok(DiskUsage {
        total_bytes: stats.blocks() as u64 * block_size,
        free_bytes: stats.blocks_available() as u64 * block_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_usage_of_tempdir_is_nonzero_total() {
        let dir = tempfile::tempdir().unwrap();
        let usage = disk_usage(dir.path()).unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.free_bytes <= usage.total_bytes);
    }
}
