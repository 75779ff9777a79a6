//! Domain error taxonomy shared by every component in this crate.
//!
//! Each variant maps to one of the error kinds named in the propagation
//! policy: callers that need to distinguish "bad input" from "best effort,
//! retry later" should match on these rather than inspecting message text.

use thiserror::Error;

/// Errors surfaced by the catalog, registry, deletion queue, pressure model
/// and pruner.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller-supplied field missing or out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A volume id was looked up but is not present in the registry.
    #[error("volume {0} not found")]
    NotFound(String),

    /// A block-access volume reached a code path that only handles mount
    /// volumes.
    #[error("unsupported access type for volume {0}")]
    Unsupported(String),

    /// The persistent catalog failed to open, or a transaction against it
    /// failed.
    #[error("catalog I/O error: {0}")]
    CatalogIo(#[source] anyhow::Error),

    /// A filesystem operation (stat, mkdir, remove) failed.
    #[error("filesystem I/O error: {0}")]
    FilesystemIo(#[source] std::io::Error),

    /// A catalog entry could not be decoded back into its record type.
    #[error("corrupt record for key {key}: {source}")]
    CorruptRecord {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Anything that doesn't fit the other kinds.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
