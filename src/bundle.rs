//! The end-to-end gather flow: metadata → gatherer → merge → cleanup.

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    cleaner::delete_archive_directory,
    error::{BundleError, IoContext, Result},
    gather::{GatherContext, GatherRegistry},
    merge::{combine_archives, MergeMapping, MergeOptions, MergeReport},
    metadata::ClusterMetadata,
    ARCHIVE_SUFFIX,
};

/// Parameters of one [`gather_bundle`] run.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    /// Directory containing `metadata.json`.
    pub metadata_dir: PathBuf,
    /// Directory the gatherer leaves its per-node archives in.
    pub staging_dir: PathBuf,
    /// The bundle to write.
    pub output: PathBuf,
    /// Remove the staging directory once the bundle is written.
    pub cleanup: bool,
    pub merge: MergeOptions,
}

/// Maps every `<name>.tar.gz` directly inside `dir` to the sub-directory `<name>`.
pub fn staged_archives(dir: &Path) -> Result<MergeMapping> {
    let mut mapping = MergeMapping::new();
    for entry in fs::read_dir(dir).with_path("read staging directory", dir)? {
        let entry = entry.with_path("read staging directory", dir)?;
        let path = entry.path();
        let Some(node) = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_suffix(ARCHIVE_SUFFIX))
        else {
            continue;
        };
        if !node.is_empty() && path.is_file() {
            mapping.insert(path.clone(), node);
        }
    }
    Ok(mapping)
}

/// Runs the gatherer for the cluster described in `request.metadata_dir`, then merges whatever
/// it staged into `request.output`.
pub fn gather_bundle(request: &BundleRequest, registry: &GatherRegistry) -> Result<MergeReport> {
    let metadata = ClusterMetadata::load(&request.metadata_dir)?;
    info!(
        "gathering logs for {} on platform {:?}",
        metadata.cluster_name.as_deref().unwrap_or("cluster"),
        metadata.platform
    );

    let context = GatherContext {
        staging_dir: request.staging_dir.clone(),
    };
    registry
        .create(&metadata, &context)?
        .run()
        .map_err(|source| BundleError::Gather {
            platform: metadata.platform.clone(),
            source,
        })?;

    let mapping = staged_archives(&request.staging_dir)?;
    let report = combine_archives(&request.output, &mapping, &request.merge)?;
    info!(
        "wrote {} entries from {} archives to {:?}",
        report.entries(),
        report.merged().count(),
        request.output
    );

    if request.cleanup {
        delete_archive_directory(&request.staging_dir)?;
    }
    Ok(report)
}
