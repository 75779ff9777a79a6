//! Volume records and the in-memory registry that mirrors the `volumes`
//! catalog bucket.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How a volume's backing storage is attached. Only [`AccessType::Mount`] is
/// handled end to end by this crate; `Block` is accepted in the schema so
/// catalog entries written by older or future code still decode, but every
/// create/unpublish path that encounters it returns
/// [`Error::Unsupported`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Mount,
    Block,
}

/// A single ephemeral scratch volume.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub name: String,
    pub id: String,
    #[serde(rename = "podUUID")]
    pub pod_uuid: String,
    pub size: i64,
    pub path: PathBuf,
    #[serde(rename = "accessType")]
    pub access_type: AccessType,
    #[serde(rename = "parentVolID", skip_serializing_if = "Option::is_none", default)]
    pub parent_vol_id: Option<String>,
    pub ephemeral: bool,
}

/// Joins `workdir`, `pod_uuid` and `leaf` into the on-disk path for a volume
/// or its parent workload directory.
pub fn full_path(workdir: &Path, pod_uuid: &str, leaf: &str) -> PathBuf {
    workdir.join(pod_uuid).join(leaf)
}

/// The in-memory mapping from volume id to [`VolumeRecord`], mirroring the
/// `volumes` catalog bucket. Guarded by a readers-writer lock: the original
/// source left this map unguarded because its single binary serialized
/// access through a single gRPC dispatch goroutine per request type, but
/// nothing else in that design actually prevented concurrent callers, so
/// this port adds the lock explicitly.
#[derive(Default)]
pub struct VolumeRegistry {
    volumes: RwLock<HashMap<String, VolumeRecord>>,
}

impl VolumeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from catalog scan results taken at startup.
    /// Entries that fail to decode are logged and skipped; a corrupt record
    /// for one volume must never prevent every other volume from loading.
    pub fn rehydrate(entries: Vec<(String, Vec<u8>)>) -> Self {
        let mut volumes = HashMap::with_capacity(entries.len());
        for (id, bytes) in entries {
            match serde_json::from_slice::<VolumeRecord>(&bytes) {
                Ok(record) => {
                    debug!(volume = %id, "loaded volume record into memory");
                    volumes.insert(id, record);
                }
                Err(err) => {
                    warn!(volume = %id, error = %err, "unable to decode volume record, skipping");
                }
            }
        }
        Self {
            volumes: RwLock::new(volumes),
        }
    }

    /// Creates the on-disk directory for a new ephemeral volume and inserts
    /// its record in memory. Does not persist to the catalog — the caller
    /// does that once the directory is ready for use (see
    /// [`crate::driver::Driver::publish_volume`]).
    pub fn create_ephemeral_volume(
        &self,
        workdir: &Path,
        id: &str,
        pod_uuid: &str,
        name: &str,
        size: i64,
        access_type: AccessType,
    ) -> Result<VolumeRecord> {
        if id.is_empty() {
            return Err(Error::InvalidArgument("volume id missing".to_string()));
        }

        let path = full_path(workdir, pod_uuid, id);

        match access_type {
            AccessType::Mount => {
                std::fs::create_dir_all(&path).map_err(Error::FilesystemIo)?;
                set_permissive_mode(&path)?;
            }
            AccessType::Block => {
                // Loop-device attachment belongs to the externally-owned mount
                // layer; this crate only manages directory-tree volumes.
                return Err(Error::Unsupported(id.to_string()));
            }
        }

        let record = VolumeRecord {
            name: name.to_string(),
            id: id.to_string(),
            pod_uuid: pod_uuid.to_string(),
            size,
            path,
            access_type,
            parent_vol_id: None,
            ephemeral: true,
        };

        self.volumes.write().insert(id.to_string(), record.clone());
        Ok(record)
    }

    /// Looks up a volume record by id.
    pub fn volume_by_id(&self, id: &str) -> Result<VolumeRecord> {
        self.volumes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Drops `id` from memory only; the caller is responsible for removing
    /// the catalog entry.
    pub fn remove(&self, id: &str) {
        self.volumes.write().remove(id);
    }

    /// Number of volumes currently tracked.
    pub fn len(&self) -> usize {
        self.volumes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(unix)]
fn set_permissive_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o777)).map_err(Error::FilesystemIo)
}

#[cfg(not(unix))]
fn set_permissive_mode(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_ephemeral_volume_makes_directory_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VolumeRegistry::new();
        let record = registry
            .create_ephemeral_volume(dir.path(), "vol-1", "pod-a", "ephemeral-vol-1", 0, AccessType::Mount)
            .unwrap();
        assert!(record.path.is_dir());
        assert_eq!(record.path, dir.path().join("pod-a").join("vol-1"));
        assert_eq!(registry.volume_by_id("vol-1").unwrap(), record);
    }

    #[test]
    fn create_ephemeral_volume_rejects_empty_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VolumeRegistry::new();
        let err = registry
            .create_ephemeral_volume(dir.path(), "", "pod-a", "name", 0, AccessType::Mount)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn create_ephemeral_volume_rejects_block_access() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VolumeRegistry::new();
        let err = registry
            .create_ephemeral_volume(dir.path(), "vol-1", "pod-a", "name", 0, AccessType::Block)
            .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn volume_by_id_missing_is_not_found() {
        let registry = VolumeRegistry::new();
        assert!(matches!(registry.volume_by_id("nope").unwrap_err(), Error::NotFound(_)));
    }

    #[test]
    fn remove_drops_from_memory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = VolumeRegistry::new();
        registry
            .create_ephemeral_volume(dir.path(), "vol-1", "pod-a", "name", 0, AccessType::Mount)
            .unwrap();
        registry.remove("vol-1");
        assert!(registry.volume_by_id("vol-1").is_err());
    }

    #[test]
    fn rehydrate_skips_corrupt_entries() {
        let good = serde_json::to_vec(&VolumeRecord {
            name: "n".into(),
            id: "vol-1".into(),
            pod_uuid: "pod-a".into(),
            size: 0,
            path: "/tmp/pod-a/vol-1".into(),
            access_type: AccessType::Mount,
            parent_vol_id: None,
            ephemeral: true,
        })
        .unwrap();
        let entries = vec![
            ("vol-1".to_string(), good),
            ("vol-2".to_string(), b"not json".to_vec()),
        ];
        let registry = VolumeRegistry::rehydrate(entries);
        assert_eq!(registry.len(), 1);
        assert!(registry.volume_by_id("vol-1").is_ok());
    }
}
