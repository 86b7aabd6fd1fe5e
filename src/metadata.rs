//! Cluster metadata, as written by the installer into `metadata.json`.
//!
//! Only the platform is interpreted here; it selects the gatherer (see [`crate::gather`]).  All
//! other fields are kept as opaque JSON for the gatherer to use.
//!
//! ```json
//! {
//!   "clusterName": "ocp-dev",
//!   "platform": "aws",
//!   "aws": { "region": "us-east-1" }
//! }
//! ```

use std::{fs, path::Path};

use serde::Deserialize;

use crate::error::{BundleError, IoContext, Result};

/// File name of the metadata inside the installation directory.
pub const METADATA_FILENAME: &str = "metadata.json";

/// Metadata of the cluster whose logs are gathered.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterMetadata {
    /// Platform the cluster runs on, e.g. `aws` or `staging`.
    pub platform: String,

    #[serde(default, rename = "clusterName")]
    pub cluster_name: Option<String>,

    /// Everything else, uninterpreted.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ClusterMetadata {
    /// Parse metadata from JSON content.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is invalid or lacks a `platform`.
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Load `metadata.json` from the installation directory `dir`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let path = dir.as_ref().join(METADATA_FILENAME);
        let content = fs::read_to_string(&path).with_path("read cluster metadata", &path)?;
        Self::from_json(&content).map_err(|source| BundleError::Metadata { path, source })
    }

    /// An opaque field by name.
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }
}
