//! Entry name rewriting for merged bundles.
//!
//! Every entry of a merged bundle must end up below one top-level directory, the *combined
//! directory*, named after the bundle file.  Source archives are produced independently (one per
//! node, usually) and nest their entries below a directory named after themselves; that
//! directory is replaced by the sub-directory the source is mapped to, and whatever isn't under
//! the combined directory afterwards is moved below it.
//!
//! All matching is done on whole path segments: a source prefix `node1/` rewrites `node1/x` and
//! `logs/node1/x`, but never `mynode1/x`.

use std::path::Path;

use crate::ARCHIVE_SUFFIX;

/// Strips [`ARCHIVE_SUFFIX`] if present.
fn strip_archive_suffix(name: &str) -> &str {
    name.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(name)
}

/// The top-level directory of a bundle written to `archive_name`: its file name without the
/// `.tar.gz` suffix, e.g. `bundle` for `/var/tmp/bundle.tar.gz`.
pub fn combined_directory(archive_name: &Path) -> String {
    let name = archive_name.to_string_lossy();
    let name = strip_archive_suffix(name.trim_end_matches('/'));
    name.rsplit('/').next().unwrap_or(name).to_string()
}

/// The directory prefixes under which a source archive's entries are expected to live, most
/// specific first: the archive path without suffix (made relative, since tar members are), then
/// just its stem.
fn source_prefixes(source_archive: &Path) -> Vec<String> {
    let path = source_archive.to_string_lossy();
    let mut stem = strip_archive_suffix(&path);
    loop {
        if let Some(rest) = stem.strip_prefix("./") {
            stem = rest;
        } else if let Some(rest) = stem.strip_prefix('/') {
            stem = rest;
        } else {
            break;
        }
    }

    let mut prefixes = vec![];
    if !stem.is_empty() {
        prefixes.push(format!("{stem}/"));
    }
    if let Some(base) = stem.rsplit('/').next() {
        if !base.is_empty() && base != stem {
            prefixes.push(format!("{base}/"));
        }
    }
    prefixes
}

/// Position of the first occurrence of `prefix` in `name` that starts a path segment.
fn find_segment_prefix(name: &str, prefix: &str) -> Option<usize> {
    std::iter::once(0)
        .chain(name.match_indices('/').map(|(i, _)| i + 1))
        .find(|&i| name[i..].starts_with(prefix))
}

/// Whether `name` is `dir` itself or lies below it.
fn is_within(name: &str, dir: &str) -> bool {
    dir.is_empty()
        || name
            .strip_prefix(dir)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Joins two relative paths, dropping empty and `.` segments.
fn join(base: &str, name: &str) -> String {
    base.split('/')
        .chain(name.split('/'))
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Rewrites the entry names of one source archive for the bundle it is merged into.
#[derive(Debug, Clone)]
pub struct EntryRewriter {
    combined: String,
    prefixes: Vec<String>,
    sub_directory: String,
}

impl EntryRewriter {
    /// A rewriter for entries of `source_archive`, mapped to `sub_directory` (empty for the
    /// bundle's top level) of a bundle whose combined directory is `combined`.
    pub fn new(combined: impl Into<String>, source_archive: &Path, sub_directory: &str) -> Self {
        let mut sub_directory = sub_directory.to_string();
        if !sub_directory.is_empty() && !sub_directory.ends_with('/') {
            sub_directory.push('/');
        }

        Self {
            combined: combined.into(),
            prefixes: source_prefixes(source_archive),
            sub_directory,
        }
    }

    /// Replaces the first segment-aligned occurrence of the source's directory prefix with the
    /// mapped sub-directory.
    fn replace_source_prefix(&self, name: &str) -> String {
        for prefix in &self.prefixes {
            if let Some(pos) = find_segment_prefix(name, prefix) {
                return format!(
                    "{}{}{}",
                    &name[..pos],
                    self.sub_directory,
                    &name[pos + prefix.len()..]
                );
            }
            // directory entry for the prefix itself, stored without its trailing slash
            if name == prefix.trim_end_matches('/') {
                return self.sub_directory.clone();
            }
        }
        name.to_string()
    }

    /// The name `name` gets in the bundle, or `None` if the entry must be dropped (it rewrites to
    /// nothing, or it would escape the bundle through `..`).
    ///
    /// Names that already lie under the combined directory after prefix replacement are kept
    /// as they are, so merging an already merged bundle doesn't nest it twice.
    pub fn rewrite(&self, name: &str) -> Option<String> {
        let replaced = self.replace_source_prefix(name);
        let rewritten = if is_within(&replaced, &self.combined) {
            replaced
        } else {
            join(&self.combined, &replaced)
        };

        if rewritten.is_empty() || rewritten.split('/').any(|segment| segment == "..") {
            None
        } else {
            Some(rewritten)
        }
    }
}
