//! Merging per-node archives into one bundle.
//!
//! [`combine_archives`] re-emits every entry of a set of source `.tar.gz` archives into one
//! destination archive.  Entry names are rewritten by [`EntryRewriter`] so that the bundle is a
//! single tree under the directory named after the destination; entry metadata and payloads are
//! otherwise copied verbatim.
//!
//! Sources that don't exist are skipped, and failing to remove a source after it was merged is
//! only a warning: one bad input must not throw away everything else that was collected.  Each
//! source's fate is returned in the [`MergeReport`].  Anything that goes wrong while writing the
//! destination, or while reading a source that did open, aborts the merge.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufReader, Read},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use tar::EntryType;

use crate::{
    archive::{
        append_payload, finish_destination, open_destination, set_entry_names, ArchiveBuilder,
    },
    error::{BundleError, IoContext, Result},
    rewrite::{combined_directory, EntryRewriter},
};

/// Source archives to merge, each with the sub-directory (possibly empty) its entries move to.
///
/// Sources are visited in path order.
#[derive(Debug, Clone, Default)]
pub struct MergeMapping {
    archives: BTreeMap<PathBuf, String>,
}

impl MergeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `archive` to `sub_directory`, returning the previous mapping for that archive.
    pub fn insert(
        &mut self,
        archive: impl Into<PathBuf>,
        sub_directory: impl Into<String>,
    ) -> Option<String> {
        self.archives.insert(archive.into(), sub_directory.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, &str)> {
        self.archives
            .iter()
            .map(|(archive, sub_directory)| (archive.as_path(), sub_directory.as_str()))
    }

    pub fn len(&self) -> usize {
        self.archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archives.is_empty()
    }
}

impl<P: Into<PathBuf>, S: Into<String>> FromIterator<(P, S)> for MergeMapping {
    fn from_iter<I: IntoIterator<Item = (P, S)>>(iter: I) -> Self {
        Self {
            archives: iter
                .into_iter()
                .map(|(archive, sub_directory)| (archive.into(), sub_directory.into()))
                .collect(),
        }
    }
}

/// Options for [`combine_archives`].
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Delete each source archive once its content has been merged.  Defaults to `true`.
    pub remove_sources: bool,
    /// Checked before every entry; once set, the merge stops with [`BundleError::Cancelled`].
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            remove_sources: true,
            cancel: None,
        }
    }
}

impl MergeOptions {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }
}

/// What happened to one source archive during a merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    /// The archive was merged.
    Merged {
        /// Entries written to the bundle.
        entries: usize,
        /// Entries dropped because their names couldn't be placed inside the bundle.
        skipped: usize,
        /// Whether the source archive was deleted afterwards.
        removed: bool,
    },
    /// The archive didn't exist and was skipped.
    Missing,
}

/// The result of a merge: the bundle written and the outcome for each source, in merge order.
#[derive(Debug, Clone)]
pub struct MergeReport {
    pub archive: PathBuf,
    pub sources: Vec<(PathBuf, SourceOutcome)>,
}

impl MergeReport {
    /// Sources that were merged.
    pub fn merged(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .filter(|(_, outcome)| matches!(outcome, SourceOutcome::Merged { .. }))
            .map(|(source, _)| source.as_path())
    }

    /// Sources that were skipped because they didn't exist.
    pub fn missing(&self) -> impl Iterator<Item = &Path> {
        self.sources
            .iter()
            .filter(|(_, outcome)| *outcome == SourceOutcome::Missing)
            .map(|(source, _)| source.as_path())
    }

    /// Total number of entries written to the bundle.
    pub fn entries(&self) -> usize {
        self.sources
            .iter()
            .map(|(_, outcome)| match outcome {
                SourceOutcome::Merged { entries, .. } => *entries,
                SourceOutcome::Missing => 0,
            })
            .sum()
    }
}

fn utf8_name(bytes: &[u8], archive: &Path) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|_| BundleError::InvalidEntryName {
            archive: archive.to_path_buf(),
            name: String::from_utf8_lossy(bytes).into_owned(),
        })
}

/// A fresh GNU header with everything of `source` but its names, stored as `entry_type`.
///
/// Nothing else of the source header, such as a ustar name prefix or GNU sparse fields, is carried
/// over.
fn copy_header(source: &tar::Header, entry_type: EntryType, size: u64) -> io::Result<tar::Header> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(source.mode()?);
    header.set_uid(source.uid()?);
    header.set_gid(source.gid()?);
    header.set_mtime(source.mtime()?);
    if let Ok(Some(user)) = source.username() {
        header.set_username(user)?;
    }
    if let Ok(Some(group)) = source.groupname() {
        header.set_groupname(group)?;
    }
    if entry_type.is_block_special() || entry_type.is_character_special() {
        if let Some(major) = source.device_major()? {
            header.set_device_major(major)?;
        }
        if let Some(minor) = source.device_minor()? {
            header.set_device_minor(minor)?;
        }
    }
    Ok(header)
}

/// The PAX records of `entry` that still apply after it is renamed: everything except the names
/// and the size, which are written afresh.
fn carried_pax_records<R: Read>(
    entry: &mut tar::Entry<'_, R>,
) -> io::Result<Vec<(String, Vec<u8>)>> {
    let Some(extensions) = entry.pax_extensions()? else {
        return Ok(vec![]);
    };
    let mut records = vec![];
    for extension in extensions {
        let extension = extension?;
        let Ok(key) = extension.key() else {
            continue;
        };
        if !matches!(key, "path" | "linkpath" | "size") {
            records.push((key.to_string(), extension.value_bytes().to_vec()));
        }
    }
    Ok(records)
}

/// Copies every entry of `source` into `builder`, returning (written, skipped) counts.
fn merge_source(
    builder: &mut ArchiveBuilder,
    archive_name: &Path,
    source: &Path,
    rewriter: &EntryRewriter,
    options: &MergeOptions,
) -> Result<(usize, usize)> {
    let file = File::open(source).with_path("open source archive", source)?;
    let mut archive = tar::Archive::new(MultiGzDecoder::new(BufReader::new(file)));

    let mut written = 0;
    let mut skipped = 0;
    for entry in archive.entries().with_path("read source archive", source)? {
        if options.is_cancelled() {
            return Err(BundleError::Cancelled(archive_name.to_path_buf()));
        }

        let mut entry = entry.with_path("read entry from", source)?;
        let entry_type = entry.header().entry_type();
        if entry_type == EntryType::XGlobalHeader {
            debug!("{source:?}: dropping global pax header");
            continue;
        }

        let name = utf8_name(&entry.path_bytes(), source)?;
        let Some(new_name) = rewriter.rewrite(&name) else {
            warn!("{source:?}: skipping entry {name:?}, it can't be placed inside the bundle");
            skipped += 1;
            continue;
        };

        let is_link = entry_type.is_hard_link() || entry_type.is_symlink();
        let link_target = if is_link {
            let Some(target) = entry.link_name_bytes() else {
                warn!("{source:?}: skipping link {name:?} without a target");
                skipped += 1;
                continue;
            };
            let target = utf8_name(&target, source)?;
            // hard links name another member of the archive, so follow its rename
            if !entry_type.is_hard_link() {
                Some(target)
            } else if let Some(renamed) = rewriter.rewrite(&target) {
                Some(renamed)
            } else {
                warn!("{source:?}: skipping hard link {name:?} to {target:?}");
                skipped += 1;
                continue;
            }
        } else {
            None
        };

        // the entry reader expands sparse files; store the expanded content
        let stored_type = if entry_type.is_gnu_sparse() {
            EntryType::Regular
        } else {
            entry_type
        };
        let size = if is_link { 0 } else { entry.size() };
        let mut header = copy_header(entry.header(), stored_type, size)
            .with_path("read entry header from", source)?;
        let records = carried_pax_records(&mut entry).with_path("read pax header from", source)?;

        set_entry_names(
            builder,
            &mut header,
            new_name.as_bytes(),
            link_target.as_deref().map(str::as_bytes),
            &records,
        )
        .with_path("write entry header to", archive_name)?;
        if is_link {
            append_payload(builder, &header, io::empty(), source, archive_name)?;
        } else {
            append_payload(builder, &header, &mut entry, source, archive_name)?;
        }

        debug!("{source:?}: {name:?} -> {new_name:?}");
        written += 1;
    }

    Ok((written, skipped))
}

fn remove_source(source: &Path, remove: &impl Fn(&Path) -> io::Result<()>) -> bool {
    match remove(source) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to remove merged archive {source:?}: {err}");
            false
        }
    }
}

/// Merges the source archives in `archives` into a new archive at `archive_name`.
///
/// Every entry ends up below the combined directory (the file name of `archive_name` without its
/// `.tar.gz` suffix); see [`EntryRewriter`] for the exact rule.  Missing sources are skipped with
/// a warning.  Merged sources are deleted unless [`MergeOptions::remove_sources`] is unset; a
/// failed deletion is a warning too.
///
/// Failures creating or writing the destination, and read errors inside a source, abort the
/// merge.  The destination may then be left partially written.
pub fn combine_archives(
    archive_name: impl AsRef<Path>,
    archives: &MergeMapping,
    options: &MergeOptions,
) -> Result<MergeReport> {
    merge_into(archive_name.as_ref(), archives, options, |source: &Path| {
        fs::remove_file(source)
    })
}

/// [`combine_archives`], deleting merged sources with `remove`.
fn merge_into(
    archive_name: &Path,
    archives: &MergeMapping,
    options: &MergeOptions,
    remove: impl Fn(&Path) -> io::Result<()>,
) -> Result<MergeReport> {
    let combined = combined_directory(archive_name);
    let mut builder = open_destination(archive_name)?;

    let mut report = MergeReport {
        archive: archive_name.to_path_buf(),
        sources: Vec::with_capacity(archives.len()),
    };

    for (source, sub_directory) in archives.iter() {
        if !source.exists() {
            warn!("archive {source:?} does not exist, skipping it");
            report.sources.push((source.to_path_buf(), SourceOutcome::Missing));
            continue;
        }

        let rewriter = EntryRewriter::new(combined.as_str(), source, sub_directory);
        let (entries, skipped) =
            merge_source(&mut builder, archive_name, source, &rewriter, options)?;
        let removed = options.remove_sources && remove_source(source, &remove);

        info!("merged {entries} entries from {source:?} into {archive_name:?}");
        report.sources.push((
            source.to_path_buf(),
            SourceOutcome::Merged {
                entries,
                skipped,
                removed,
            },
        ));
    }

    finish_destination(builder, archive_name)?;
    Ok(report)
}

/// [`combine_archives`] on tokio's blocking thread pool, for use from async code.
pub async fn combine_archives_async(
    archive_name: PathBuf,
    archives: MergeMapping,
    options: MergeOptions,
) -> Result<MergeReport> {
    tokio::task::spawn_blocking(move || combine_archives(&archive_name, &archives, &options))
        .await?
}
