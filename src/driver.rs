//! Lifecycle wiring: opens the catalog, rehydrates the in-memory registry and
//! deletion queue from it, starts the pruner, and exposes the publish /
//! unpublish contract the serving layer calls into.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{Catalog, DELETED_VOLUMES_BUCKET, VOLUMES_BUCKET};
use crate::config::Config;
use crate::deletion::{DeletionCandidate, DeletionQueue};
use crate::error::{Error, Result};
use crate::pruner::{Pruner, PrunerHandle};
use crate::volume::{full_path, AccessType, VolumeRecord, VolumeRegistry};

/// Owns every durable and in-memory component for one node and wires them
/// together. A `Driver` is the single entry point a serving layer (CSI
/// dispatch, a CLI, a test harness) uses to publish and unpublish volumes.
pub struct Driver {
    config: Config,
    catalog: Arc<Catalog>,
    registry: VolumeRegistry,
    queue: Arc<DeletionQueue>,
    pruner: Option<PrunerHandle>,
}

impl Driver {
    /// Opens the catalog at `{workdir}/deletedVolumes.db`, rehydrates both
    /// in-memory maps from it, creates `workdir` if absent, and starts the
    /// pruner on its own thread.
    pub fn start(config: Config) -> Result<Self> {
        let workdir_existed = config.workdir.exists();
        std::fs::create_dir_all(&config.workdir).map_err(Error::FilesystemIo)?;
        if !workdir_existed {
            set_workdir_mode(&config.workdir)?;
        }

        let db_path = config.workdir.join("deletedVolumes.db");
        let catalog = Catalog::open(db_path, &[VOLUMES_BUCKET, DELETED_VOLUMES_BUCKET])?;

        let volume_entries = catalog.scan(VOLUMES_BUCKET)?;
        let registry = VolumeRegistry::rehydrate(volume_entries);

        let deleted_entries = catalog.scan(DELETED_VOLUMES_BUCKET)?;
        let queue = Arc::new(DeletionQueue::rehydrate(deleted_entries));

        info!(
            node = %config.node_id,
            workdir = %config.workdir.display(),
            volumes = registry.len(),
            queued = queue.len(),
            "rehydrated node state from catalog"
        );

        let catalog = Arc::new(catalog);
        let pruner = Pruner::spawn(
            Arc::clone(&catalog),
            Arc::clone(&queue),
            config.workdir.clone(),
            config.prune_interval,
            config.headroom,
        );

        Ok(Driver {
            config,
            catalog,
            registry,
            queue,
            pruner: Some(pruner),
        })
    }

    /// Creates a new ephemeral volume directory and persists its record.
    /// Mirrors the CSI `NodePublishVolume` contract: the path is created,
    /// then the record is persisted, and only then is the call considered
    /// successful.
    pub fn publish_volume(
        &self,
        id: &str,
        pod_uuid: &str,
        name: &str,
        size: i64,
        access_type: AccessType,
    ) -> Result<VolumeRecord> {
        let record = self.registry.create_ephemeral_volume(
            &self.config.workdir,
            id,
            pod_uuid,
            name,
            size,
            access_type,
        )?;

        let encoded = serde_json::to_vec(&record)
            .map_err(|e| Error::Internal(format!("unable to serialize volume record {id}: {e}")))?;
        if let Err(err) = self.catalog.put(VOLUMES_BUCKET, id, &encoded) {
            warn!(volume = %id, error = %err, "failed to persist volume record, rolling back in-memory insert");
            self.registry.remove(id);
            return Err(err);
        }

        info!(volume = %id, pod = %pod_uuid, path = %record.path.display(), "published volume");
        Ok(record)
    }

    /// Retires a volume: moves it from the live registry into the deletion
    /// queue with `afterLifespan` as its grace period, and returns as soon as
    /// the queue entry is persisted. Physical deletion happens later, on the
    /// pruner's schedule.
    ///
    /// Unpublishing an id the registry has no record of is not an error: the
    /// candidate is still queued with a best-effort path, matching the
    /// original driver's "handling deletion for volume even though it was
    /// not found in memory" behavior rather than refusing the request.
    pub fn unpublish_volume(&self, id: &str) -> Result<()> {
        let record = match self.registry.volume_by_id(id) {
            Ok(record) => Some(record),
            Err(_) => {
                warn!(volume = %id, "handling deletion for volume even though it was not found in memory");
                None
            }
        };

        if let Some(record) = &record {
            if matches!(record.access_type, AccessType::Block) {
                return Err(Error::Unsupported(id.to_string()));
            }
        }

        let path = record
            .as_ref()
            .map(|record| record.path.clone())
            .unwrap_or_else(|| full_path(&self.config.workdir, "", id));

        let candidate = DeletionCandidate::new(Utc::now(), self.config.after_lifespan, path);
        self.queue.queue(&self.catalog, id, candidate);
        self.registry.remove(id);

        if let Err(err) = self.catalog.delete(VOLUMES_BUCKET, id) {
            warn!(volume = %id, error = %err, "failed to remove volume record from catalog after unpublish");
        }

        info!(volume = %id, "unpublished volume, queued for deletion");
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn volume_count(&self) -> usize {
        self.registry.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    /// Stops the pruner, which is the sole closer of the catalog. Drops this
    /// handle's own catalog reference first so the pruner thread holds the
    /// last one and its own shutdown path can actually close it, then blocks
    /// until the pruner thread has exited.
    pub fn shutdown(self) {
        let Driver { config, catalog, pruner, .. } = self;
        drop(catalog);
        if let Some(pruner) = pruner {
            pruner.shutdown();
        }
        info!(node = %config.node_id, "driver shut down");
    }
}

#[cfg(unix)]
fn set_workdir_mode(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o750)).map_err(Error::FilesystemIo)
}

#[cfg(not(unix))]
fn set_workdir_mode(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        Config::new(
            "scratchvol.csi.example.com".to_string(),
            "test-node".to_string(),
            "unix:///tmp/csi.sock".to_string(),
            dir.to_path_buf(),
            0,
            std::time::Duration::from_secs(600),
            std::time::Duration::from_secs(3600),
            0.10,
            None,
        )
        .unwrap()
    }

    #[test]
    fn publish_then_unpublish_moves_volume_into_queue() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::start(test_config(dir.path())).unwrap();

        let record = driver
            .publish_volume("vol-1", "pod-a", "ephemeral-vol", 0, AccessType::Mount)
            .unwrap();
        assert!(record.path.is_dir());
        assert_eq!(driver.volume_count(), 1);

        driver.unpublish_volume("vol-1").unwrap();
        assert_eq!(driver.volume_count(), 0);
        assert_eq!(driver.queued_count(), 1);

        driver.shutdown();
    }

    #[test]
    fn unpublish_of_unknown_volume_is_best_effort() {
        // Unpublishing an id the registry never saw (e.g. after a crash that
        // lost the in-memory map but not the workload's directory) still
        // queues a deletion candidate rather than failing the call.
        let dir = tempfile::tempdir().unwrap();
        let driver = Driver::start(test_config(dir.path())).unwrap();
        driver.unpublish_volume("never-published").unwrap();
        assert_eq!(driver.queued_count(), 1);
        driver.shutdown();
    }

    #[test]
    fn unpublish_of_block_volume_is_unsupported() {
        // Block volumes never reach the registry through `publish_volume`
        // (creation itself rejects them), so a stored Block record can only
        // arrive via rehydration from the catalog. Write one directly and
        // restart the driver to pick it up.
        let dir = tempfile::tempdir().unwrap();
        {
            let catalog = Catalog::open(dir.path().join("deletedVolumes.db"), &[VOLUMES_BUCKET, DELETED_VOLUMES_BUCKET]).unwrap();
            let record = VolumeRecord {
                name: "block-vol".to_string(),
                id: "vol-1".to_string(),
                pod_uuid: "pod-a".to_string(),
                size: 0,
                path: dir.path().join("pod-a").join("vol-1"),
                access_type: AccessType::Block,
                parent_vol_id: None,
                ephemeral: true,
            };
            catalog.put(VOLUMES_BUCKET, "vol-1", &serde_json::to_vec(&record).unwrap()).unwrap();
            catalog.close();
        }

        let driver = Driver::start(test_config(dir.path())).unwrap();
        assert_eq!(driver.volume_count(), 1);

        let err = driver.unpublish_volume("vol-1").unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));

        driver.shutdown();
    }

    #[test]
    fn restart_rehydrates_state_from_catalog() {
        let dir = tempfile::tempdir().unwrap();
        {
            let driver = Driver::start(test_config(dir.path())).unwrap();
            driver
                .publish_volume("vol-1", "pod-a", "ephemeral-vol", 0, AccessType::Mount)
                .unwrap();
            driver.shutdown();
        }

        let driver = Driver::start(test_config(dir.path())).unwrap();
        assert_eq!(driver.volume_count(), 1);
        driver.shutdown();
    }
}
