//! Log bundle aggregation.
//!
//! This crate packs collected diagnostic files into gzip-compressed tar archives and merges
//! several such archives into one bundle whose entries all live under a single top-level
//! directory named after the bundle.
//!
//! Key functionality includes:
//! - [`archive::create_archive`]: pack an ordered list of files into a `.tar.gz`
//! - [`merge::combine_archives`]: merge per-node archives into one bundle, rewriting entry paths
//!   and removing the consumed sources
//! - [`cleaner::delete_archive_directory`]: remove a staging directory, refusing dangerous paths
//! - [`bundle::gather_bundle`]: the end-to-end flow (load cluster metadata, run the platform
//!   gatherer, merge, clean up)

pub mod archive;
pub mod bundle;
pub mod cleaner;
pub mod error;
pub mod gather;
pub mod merge;
pub mod metadata;
pub mod rewrite;


pub use archive::{create_archive, SourceFile, SourceFileSet};
pub use cleaner::delete_archive_directory;
pub use error::{BundleError, Result};
pub use merge::{
    combine_archives, combine_archives_async, MergeMapping, MergeOptions, MergeReport,
    SourceOutcome,
};

/// The file name suffix of a gzip-compressed tar archive.
pub const ARCHIVE_SUFFIX: &str = ".tar.gz";
