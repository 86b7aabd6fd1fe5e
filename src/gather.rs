//! Platform-specific log gathering.
//!
//! A [`Gather`] collects logs for a cluster and leaves them in the staging directory as one
//! `<node>.tar.gz` per node, ready to be merged into a bundle.  Gatherers are selected by the
//! platform recorded in the cluster metadata through a [`GatherRegistry`].
//!
//! Remote collection lives outside this crate; the only built-in gatherer, [`StagingGather`],
//! packs node directories that something else already copied into the staging directory.

use std::{
    collections::HashMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info};
use walkdir::WalkDir;

use crate::{
    archive::{create_archive, SourceFileSet},
    error::BundleError,
    metadata::ClusterMetadata,
    ARCHIVE_SUFFIX,
};

/// Collects logs into the staging directory.
pub trait Gather {
    fn run(&self) -> Result<()>;
}

/// Everything a gatherer factory needs besides the metadata.
#[derive(Debug, Clone)]
pub struct GatherContext {
    /// Directory where per-node archives are to be left.
    pub staging_dir: PathBuf,
}

/// Builds a gatherer for one cluster.
pub type GatherFactory =
    Box<dyn Fn(&ClusterMetadata, &GatherContext) -> Result<Box<dyn Gather>> + Send + Sync>;

/// Maps platform names to gatherer factories.
#[derive(Default)]
pub struct GatherRegistry {
    factories: HashMap<String, GatherFactory>,
}

impl fmt::Debug for GatherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut platforms: Vec<_> = self.factories.keys().collect();
        platforms.sort();
        f.debug_struct("GatherRegistry")
            .field("platforms", &platforms)
            .finish()
    }
}

impl GatherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in gatherers: `staging` ([`StagingGather`]).
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StagingGather::PLATFORM, Box::new(staging_factory));
        registry
    }

    /// Registers `factory` for `platform`, replacing any previous one.
    pub fn register(&mut self, platform: impl Into<String>, factory: GatherFactory) {
        self.factories.insert(platform.into(), factory);
    }

    /// Builds the gatherer for the platform in `metadata`.
    pub fn create(
        &self,
        metadata: &ClusterMetadata,
        context: &GatherContext,
    ) -> crate::Result<Box<dyn Gather>> {
        let factory = self
            .factories
            .get(&metadata.platform)
            .ok_or_else(|| BundleError::UnsupportedPlatform(metadata.platform.clone()))?;
        factory(metadata, context).map_err(|source| BundleError::Gather {
            platform: metadata.platform.clone(),
            source,
        })
    }
}

fn staging_factory(_: &ClusterMetadata, context: &GatherContext) -> Result<Box<dyn Gather>> {
    Ok(Box::new(StagingGather::new(&context.staging_dir)))
}

/// Packs every node directory found in the staging directory into `<node>.tar.gz` next to it.
///
/// Entries are named `<node>/<path relative to the node directory>`.  Only regular files are
/// packed; empty node directories produce empty archives.
#[derive(Debug, Clone)]
pub struct StagingGather {
    staging_dir: PathBuf,
}

impl StagingGather {
    pub const PLATFORM: &'static str = "staging";

    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    fn pack_node(&self, node_dir: &Path, node: &str) -> Result<PathBuf> {
        let mut files = SourceFileSet::new();
        for entry in WalkDir::new(node_dir).sort_by_file_name() {
            let entry = entry.with_context(|| format!("walking {node_dir:?}"))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(node_dir)?;
            files.push_as(entry.path(), Path::new(node).join(relative));
        }

        let archive = self.staging_dir.join(format!("{node}{ARCHIVE_SUFFIX}"));
        debug!("packing {} files from {node_dir:?}", files.len());
        create_archive(&files, &archive)?;
        Ok(archive)
    }
}

impl Gather for StagingGather {
    fn run(&self) -> Result<()> {
        let mut nodes = vec![];
        for entry in fs::read_dir(&self.staging_dir)
            .with_context(|| format!("reading staging directory {:?}", self.staging_dir))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                nodes.push(entry.path());
            }
        }
        nodes.sort();

        for node_dir in nodes {
            let Some(node) = node_dir.file_name().and_then(|name| name.to_str()) else {
                anyhow::bail!("node directory {node_dir:?} is not valid UTF-8");
            };
            let archive = self.pack_node(&node_dir, node)?;
            info!("packed {node_dir:?} into {archive:?}");
            fs::remove_dir_all(&node_dir)
                .with_context(|| format!("removing packed directory {node_dir:?}"))?;
        }
        Ok(())
    }
}
