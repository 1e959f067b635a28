//! Error types for the backup verification core.

use thiserror::Error;

/// Result type alias for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Error variants for backup and verification operations.
#[derive(Debug, Error)]
pub enum BackupError {
    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot stream command exited nonzero. The stream cannot be
    /// trusted, so the whole run must stop.
    #[error("Stream command failed with status {code}: {command}")]
    StreamCommand {
        /// The shell command that produced the stream.
        command: String,
        /// The nonzero exit code (or -1 if killed by a signal).
        code: i32,
    },

    /// An incremental snapshot appeared with no preceding full baseline.
    #[error("Incremental snapshot {snapshot} has no parent: first entry of a dataset must be a full backup")]
    OrphanIncremental {
        /// The snapshot identifier with no possible parent.
        snapshot: String,
    },

    /// A remote object decoded to a snapshot that does not exist locally.
    #[error("Remote object {key} (snapshot {snapshot}) has no matching lineage entry")]
    UnknownObject {
        /// The remote object key.
        key: String,
        /// The decoded snapshot identifier.
        snapshot: String,
    },

    /// Object store backend error.
    #[error("Store error during {op}: {reason}")]
    Store {
        /// The store operation that failed.
        op: String,
        /// Description of the failure.
        reason: String,
    },

    /// Snapshot source backend error (listing, estimates, properties).
    #[error("Snapshot source error: {reason}")]
    Source {
        /// Description of the failure.
        reason: String,
    },
}
