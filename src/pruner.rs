//! The background pruner: a dedicated OS thread that periodically walks the
//! deletion queue and physically removes expired candidates.

use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};

use crate::catalog::Catalog;
use crate::deletion::DeletionQueue;
use crate::disk::disk_usage;
use crate::pressure::{pressure_factor, FALLBACK_FACTOR};

/// Handle returned by [`Pruner::spawn`]. Dropping it does not stop the
/// worker — call [`PrunerHandle::shutdown`] and then join, mirroring the
/// one-shot stop channel plus `WaitGroup` pattern the lifecycle layer uses.
pub struct PrunerHandle {
    shutdown_tx: Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl PrunerHandle {
    /// Signals the worker to stop after its current pass and blocks until it
    /// has exited.
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                error!("pruner thread panicked during shutdown");
            }
        }
    }
}

/// Periodic worker that consults the pressure model, walks the deletion
/// queue, and physically deletes expired paths.
pub struct Pruner;

impl Pruner {
    /// Starts the pruner on a dedicated thread against a catalog handle
    /// shared with the driver. `interval` is sampled once here and never
    /// re-read.
    pub fn spawn(
        catalog: Arc<Catalog>,
        queue: Arc<DeletionQueue>,
        workdir: PathBuf,
        interval: Duration,
        headroom: f64,
    ) -> PrunerHandle {
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel();

        let join_handle = std::thread::spawn(move || {
            run(catalog, queue, workdir, interval, headroom, shutdown_rx);
        });

        PrunerHandle {
            shutdown_tx,
            join_handle: Some(join_handle),
        }
    }
}

fn run(
    catalog: Arc<Catalog>,
    queue: Arc<DeletionQueue>,
    workdir: PathBuf,
    interval: Duration,
    headroom: f64,
    shutdown_rx: Receiver<()>,
) {
    loop {
        match shutdown_rx.recv_timeout(Duration::from_millis(0)) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                prune_pass(&catalog, &queue, &workdir, headroom);
                // Sleep in short slices so shutdown is noticed promptly
                // rather than only between whole-interval sleeps, while
                // still only running one pass per `interval`.
                match shutdown_rx.recv_timeout(interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }
        }
    }

    close_catalog(catalog);
}

/// The pruner is the sole closer of the catalog (§4.6): by the time this
/// runs, `Driver::shutdown` has already dropped its own handle, so this
/// thread's clone is normally the last one and `close()` actually fires.
fn close_catalog(catalog: Arc<Catalog>) {
    match Arc::try_unwrap(catalog) {
        Ok(catalog) => catalog.close(),
        Err(_) => warn!("catalog still has other live references at pruner shutdown, skipping explicit close"),
    }
}

#[instrument(skip(catalog, queue))]
fn prune_pass(catalog: &Catalog, queue: &DeletionQueue, workdir: &Path, headroom: f64) {
    let now = Utc::now();

    let factor = match disk_usage(workdir).and_then(|usage| pressure_factor(usage.total_bytes, usage.free_bytes, headroom)) {
        Ok(factor) => factor,
        Err(err) => {
            warn!(error = %err, fallback = FALLBACK_FACTOR, "error calculating pressure factor, using fallback");
            FALLBACK_FACTOR
        }
    };

    let candidates = queue.snapshot();
    info!(queued = candidates.len(), factor, "starting prune pass");

    for (id, candidate) in candidates {
        if !candidate.path.exists() {
            info!(volume = %id, path = %candidate.path.display(), "removing candidate, path no longer exists");
            queue.remove(catalog, &id);
            continue;
        }

        let deadline = candidate.delete_time + chrono::Duration::from_std(candidate.lifespan().mul_f64(factor)).unwrap_or_default();
        if now <= deadline {
            continue;
        }

        match std::fs::remove_dir_all(&candidate.path) {
            Ok(()) => {
                if let Some(parent) = candidate.path.parent() {
                    // Best effort: other sibling volumes of the same workload
                    // may still live under this directory, so a non-empty
                    // failure here is expected and ignored.
                    let _ = std::fs::remove_dir(parent);
                }
                info!(volume = %id, path = %candidate.path.display(), "deleted expired volume");
                queue.remove(catalog, &id);
            }
            Err(err) => {
                warn!(volume = %id, path = %candidate.path.display(), error = %err, "unable to delete volume, will retry next pass");
            }
        }
    }
}
