//! The deletion queue: an in-memory mirror of the `deletedVolumes` catalog
//! bucket, written through before being made visible in memory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, DELETED_VOLUMES_BUCKET};

/// A volume awaiting physical deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionCandidate {
    #[serde(rename = "deleteTime")]
    pub delete_time: DateTime<Utc>,
    /// Stored as nanoseconds, matching how the original Go implementation's
    /// `time.Duration` marshals to JSON, so that on-disk records stay a
    /// plain integer rather than needing a custom duration codec.
    #[serde(rename = "lifespan")]
    lifespan_nanos: i64,
    pub path: PathBuf,
}

impl DeletionCandidate {
    pub fn new(delete_time: DateTime<Utc>, lifespan: Duration, path: PathBuf) -> Self {
        Self {
            delete_time,
            lifespan_nanos: lifespan.as_nanos() as i64,
            path,
        }
    }

    pub fn lifespan(&self) -> Duration {
        Duration::from_nanos(self.lifespan_nanos.max(0) as u64)
    }
}

/// In-memory mapping from volume id to deletion candidate, guarded by a
/// readers-writer lock and backed by the `deletedVolumes` catalog bucket.
pub struct DeletionQueue {
    candidates: RwLock<HashMap<String, DeletionCandidate>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            candidates: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds a queue from catalog scan results taken at startup. Entries
    /// that fail to decode are logged and skipped.
    pub fn rehydrate(entries: Vec<(String, Vec<u8>)>) -> Self {
        let mut candidates = HashMap::with_capacity(entries.len());
        for (id, bytes) in entries {
            match serde_json::from_slice::<DeletionCandidate>(&bytes) {
                Ok(candidate) => {
                    candidates.insert(id, candidate);
                }
                Err(err) => {
                    warn!(volume = %id, error = %err, "unable to decode deletion candidate, skipping");
                }
            }
        }
        Self {
            candidates: RwLock::new(candidates),
        }
    }

    /// Queues `id` for deletion. A no-op if `id` is already queued — a
    /// deletion candidate is immutable once queued; there is no re-queue of
    /// an existing id.
    ///
    /// Persists to the catalog **before** taking the write lock and
    /// inserting in memory (I1: every in-memory candidate has a
    /// corresponding catalog entry). If persistence fails, the in-memory map
    /// is left untouched and the failure is logged; the unpublish contract
    /// this backs is best-effort, so the caller still reports success.
    pub fn queue(&self, catalog: &Catalog, id: &str, candidate: DeletionCandidate) {
        if self.candidates.read().contains_key(id) {
            return;
        }

        let encoded = match serde_json::to_vec(&candidate) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(volume = %id, error = %err, "unable to serialize deletion candidate");
                return;
            }
        };

        if let Err(err) = catalog.put(DELETED_VOLUMES_BUCKET, id, &encoded) {
            warn!(volume = %id, path = %candidate.path.display(), error = %err, "failed to persist deletion candidate");
            return;
        }

        self.candidates.write().insert(id.to_string(), candidate);
    }

    /// Removes `id` from the catalog, then from memory. A catalog failure
    /// leaves the in-memory entry intact so the pruner retries on the next
    /// pass.
    pub fn remove(&self, catalog: &Catalog, id: &str) {
        if let Err(err) = catalog.delete(DELETED_VOLUMES_BUCKET, id) {
            warn!(volume = %id, error = %err, "failed to remove deletion candidate from catalog, will retry");
            return;
        }
        self.candidates.write().remove(id);
        info!(volume = %id, "removed deletion candidate");
    }

    /// Takes a point-in-time copy of the candidates map under the read lock,
    /// then releases the lock. Mandatory for the pruner: iterating the live
    /// map while calling `remove` (which takes the write lock) would
    /// deadlock.
    pub fn snapshot(&self) -> HashMap<String, DeletionCandidate> {
        self.candidates.read().clone()
    }

    pub fn len(&self) -> usize {
        self.candidates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DeletionQueue {
    fn default() -> Self {
        Self::new()
    }
}
