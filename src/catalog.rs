//! The durable, single-file embedded catalog backing the volume registry and
//! the deletion queue.
//!
//! This is a thin wrapper around [`redb`], an embedded ACID key-value store.
//! Two named tables ("buckets" in the terminology the rest of this crate
//! uses) hold JSON-encoded records: `volumes` for live volume records and
//! `deletedVolumes` for deletion candidates awaiting the pruner.

use std::path::Path;
use std::time::{Duration, Instant};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// How long [`Catalog::open`] will retry against a locked database file
/// before giving up. Mirrors the `Timeout` option the original bbolt-backed
/// store used.
const OPEN_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const OPEN_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Logical bucket for live volume records.
pub const VOLUMES_BUCKET: &str = "volumes";
/// Logical bucket for queued deletion candidates.
pub const DELETED_VOLUMES_BUCKET: &str = "deletedVolumes";

const VOLUMES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new(VOLUMES_BUCKET);
const DELETED_VOLUMES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new(DELETED_VOLUMES_BUCKET);

/// Maps a bucket name to its table handle. Unknown bucket names are treated
/// as never-created: callers only ever pass [`VOLUMES_BUCKET`] or
/// [`DELETED_VOLUMES_BUCKET`] in practice, but accepting arbitrary strings
/// here keeps `put`/`delete`/`scan` honest about which buckets actually
/// exist rather than panicking on a typo.
fn table_for(bucket: &str) -> Option<TableDefinition<'static, &'static str, &'static [u8]>> {
    match bucket {
        VOLUMES_BUCKET => Some(VOLUMES_TABLE),
        DELETED_VOLUMES_BUCKET => Some(DELETED_VOLUMES_TABLE),
        _ => None,
    }
}

/// A single-writer, crash-safe key-value store with named buckets.
pub struct Catalog {
    db: Database,
    path: std::path::PathBuf,
}

impl Catalog {
    /// Opens (or creates) the catalog file at `path`, creating any of
    /// `bucket_names` that don't already exist. Retries on lock contention
    /// for up to [`OPEN_LOCK_TIMEOUT`].
    pub fn open<P: AsRef<Path>>(path: P, bucket_names: &[&str]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let deadline = Instant::now() + OPEN_LOCK_TIMEOUT;

        let db = loop {
            match Database::create(&path) {
                Ok(db) => break db,
                Err(err) if is_lock_contention(&err) && Instant::now() < deadline => {
                    warn!(path = %path.display(), "catalog locked, retrying open");
                    std::thread::sleep(OPEN_RETRY_INTERVAL);
                }
                Err(err) => {
                    return Err(Error::CatalogIo(anyhow::anyhow!(
                        "unable to open catalog {}: {err}",
                        path.display()
                    )));
                }
            }
        };

        set_catalog_file_mode(&path)?;

        let catalog = Catalog { db, path };

        let write_txn = catalog
            .db
            .begin_write()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to start transaction: {e}")))?;
        for name in bucket_names {
            let table = table_for(name)
                .ok_or_else(|| Error::CatalogIo(anyhow::anyhow!("unknown bucket name {name}")))?;
            write_txn
                .open_table(table)
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to create bucket {name}: {e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to commit bucket creation: {e}")))?;

        info!(path = %catalog.path.display(), "opened persistent catalog");
        Ok(catalog)
    }

    /// Writes `value` under `key` in `bucket`. Fails if the bucket has never
    /// been created by [`Catalog::open`].
    pub fn put(&self, bucket: &str, key: &str, value: &[u8]) -> Result<()> {
        let table_def = table_for(bucket)
            .ok_or_else(|| Error::CatalogIo(anyhow::anyhow!("bucket {bucket} does not exist")))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to start transaction: {e}")))?;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("bucket {bucket} does not exist: {e}")))?;
            table
                .insert(key, value)
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to insert into {bucket}: {e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to commit put to {bucket}: {e}")))?;
        Ok(())
    }

    /// Removes `key` from `bucket`. Idempotent: removing an absent key is
    /// not an error.
    pub fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let table_def = table_for(bucket)
            .ok_or_else(|| Error::CatalogIo(anyhow::anyhow!("bucket {bucket} does not exist")))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to start transaction: {e}")))?;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("bucket {bucket} does not exist: {e}")))?;
            table
                .remove(key)
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to delete from {bucket}: {e}")))?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to commit delete from {bucket}: {e}")))?;
        Ok(())
    }

    /// Returns every `(key, value)` pair currently in `bucket`, in whatever
    /// order the underlying engine iterates in. The scan runs inside its own
    /// read transaction and is not restartable.
    pub fn scan(&self, bucket: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let Some(table_def) = table_for(bucket) else {
            return Ok(Vec::new());
        };
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to start read transaction: {e}")))?;
        let table = match read_txn.open_table(table_def) {
            Ok(table) => table,
            // A bucket that was never created scans as empty rather than erroring;
            // callers that require it to exist should have created it via `open`.
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(Error::CatalogIo(anyhow::anyhow!("unable to open bucket {bucket}: {e}"))),
        };

        let mut out = Vec::new();
        let iter = table
            .iter()
            .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to iterate bucket {bucket}: {e}")))?;
        for entry in iter {
            let (key, value) = entry
                .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to read entry in {bucket}: {e}")))?;
            out.push((key.value().to_string(), value.value().to_vec()));
        }
        Ok(out)
    }

    /// Releases the catalog. Any further use of this handle after `close`
    /// would fail; in practice the pruner is the sole owner and drops it on
    /// shutdown, which is sufficient since `redb::Database` has no explicit
    /// close method — flushing and unlocking happen on drop.
    pub fn close(self) {
        info!(path = %self.path.display(), "closing persistent catalog");
        drop(self);
    }
}

fn is_lock_contention(err: &redb::DatabaseError) -> bool {
    matches!(err, redb::DatabaseError::DatabaseAlreadyOpen)
}

/// Restricts the catalog file to owner read/write, matching the mode the
/// original bbolt-backed store opened its file with.
#[cfg(unix)]
fn set_catalog_file_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| Error::CatalogIo(anyhow::anyhow!("unable to set catalog file mode: {e}")))
}

#[cfg(not(unix))]
fn set_catalog_file_mode(_path: &Path) -> Result<()> {
    Ok(())
}
