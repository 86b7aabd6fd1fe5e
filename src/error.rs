//! Error types for log bundle operations.
//!
//! Every fallible library operation returns a [`Result<T>`], an alias for
//! `Result<T, BundleError>`.
//!
//! # Error Categories
//!
//! - **I/O**: [`Io`] carries the failing operation and the path it touched
//! - **Archive content**: [`NotARegularFile`], [`InvalidEntryName`]
//! - **Control**: [`Cancelled`], [`Task`]
//! - **Collaborators**: [`Metadata`], [`UnsupportedPlatform`], [`Gather`]
//!
//! Per-source problems during a merge (a missing source, a source that can't
//! be removed afterwards) are not errors; they are reported through
//! [`crate::merge::SourceOutcome`].
//!
//! [`Io`]: BundleError::Io
//! [`NotARegularFile`]: BundleError::NotARegularFile
//! [`InvalidEntryName`]: BundleError::InvalidEntryName
//! [`Cancelled`]: BundleError::Cancelled
//! [`Task`]: BundleError::Task
//! [`Metadata`]: BundleError::Metadata
//! [`UnsupportedPlatform`]: BundleError::UnsupportedPlatform
//! [`Gather`]: BundleError::Gather

use std::path::{Path, PathBuf};

/// Result type alias for operations that may return a BundleError.
pub type Result<T> = std::result::Result<T, BundleError>;

/// Error types for log bundle operations.
#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    /// An I/O operation failed on the given path.
    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        /// Short description of what was being done, e.g. "open source archive".
        op: &'static str,
        /// The file or archive involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// A path handed to the archive writer is not a regular file.
    #[error("not a regular file: {0}")]
    NotARegularFile(PathBuf),

    /// A source archive contains an entry name that can't be rewritten.
    #[error("invalid entry name in {}: {name}", archive.display())]
    InvalidEntryName {
        /// The source archive holding the entry.
        archive: PathBuf,
        /// Lossy rendering of the offending name.
        name: String,
    },

    /// The merge was cancelled between two entries.
    #[error("merge into {} cancelled", .0.display())]
    Cancelled(PathBuf),

    /// A blocking task running an archive operation did not complete.
    #[error("archive task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The cluster metadata file could not be parsed.
    #[error("invalid cluster metadata in {}: {source}", path.display())]
    Metadata {
        /// The metadata file.
        path: PathBuf,
        /// The parse error.
        source: serde_json::Error,
    },

    /// No gatherer is registered for the platform.
    #[error("no gatherer registered for platform {0:?}")]
    UnsupportedPlatform(String),

    /// A gatherer failed while collecting logs.
    #[error("gather for platform {platform:?} failed: {source:#}")]
    Gather {
        /// The platform the gatherer was selected for.
        platform: String,
        /// The gatherer's error.
        source: anyhow::Error,
    },
}

/// Attaches the operation name and path to an [`std::io::Result`].
pub(crate) trait IoContext<T> {
    fn with_path(self, op: &'static str, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn with_path(self, op: &'static str, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| BundleError::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}
