//! Packing files into gzip-compressed tar archives.
//!
//! [`create_archive`] writes one `.tar.gz` from an ordered [`SourceFileSet`].  The destination is
//! a file wrapped by a gzip encoder wrapped by a tar builder; [`open_destination`] and
//! [`finish_destination`] are shared with the merger so that both produce the same container.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use flate2::{write::GzEncoder, Compression};
use log::debug;

use crate::error::{BundleError, IoContext, Result};

/// One file to pack: where it is on disk and what the entry is called in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Location of the file on disk.
    pub path: PathBuf,
    /// Entry name inside the archive.
    pub name: PathBuf,
}

impl SourceFile {
    /// A file archived under its own path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            path,
        }
    }

    /// A file archived under a different entry name.
    pub fn with_name(path: impl Into<PathBuf>, name: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }
}

/// An ordered list of files to pack.
#[derive(Debug, Clone, Default)]
pub struct SourceFileSet {
    files: Vec<SourceFile>,
}

impl SourceFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file archived under its own path.
    pub fn push(&mut self, path: impl Into<PathBuf>) {
        self.files.push(SourceFile::new(path));
    }

    /// Adds a file archived under `name`.
    pub fn push_as(&mut self, path: impl Into<PathBuf>, name: impl Into<PathBuf>) {
        self.files.push(SourceFile::with_name(path, name));
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceFile> {
        self.files.iter()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SourceFileSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(SourceFile::new).collect(),
        }
    }
}

impl From<Vec<SourceFile>> for SourceFileSet {
    fn from(files: Vec<SourceFile>) -> Self {
        Self { files }
    }
}

pub(crate) type ArchiveBuilder = tar::Builder<GzEncoder<File>>;

/// Creates (or truncates) `path` and returns a tar builder writing through a gzip encoder into it.
///
/// The enclosing directory is created if it doesn't exist yet.
pub(crate) fn open_destination(path: &Path) -> Result<ArchiveBuilder> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_path("create directory", parent)?;
    }
    let file = File::create(path).with_path("create archive", path)?;
    Ok(tar::Builder::new(GzEncoder::new(file, Compression::default())))
}

/// Writes the tar trailer, then the gzip trailer, then flushes the file.
pub(crate) fn finish_destination(builder: ArchiveBuilder, path: &Path) -> Result<()> {
    let encoder = builder.into_inner().with_path("finish tar stream of", path)?;
    let mut file = encoder.finish().with_path("finish gzip stream of", path)?;
    file.flush().with_path("flush archive", path)
}

/// Stores as much of `name` as fits in `field`, returning whether it was cut short.
fn store_name(field: &mut [u8], name: &[u8]) -> bool {
    field.fill(0);
    let len = name.len().min(field.len());
    field[..len].copy_from_slice(&name[..len]);
    name.len() > field.len()
}

/// Writes `name` (and `link_name`) into `header` byte for byte.
///
/// Names too long for the header go into a PAX `path`/`linkpath` record instead, with the header
/// keeping a truncated copy for readers that ignore PAX.  The records, together with `records`,
/// are appended to `builder` right away, so the header must be appended next.
pub(crate) fn set_entry_names(
    builder: &mut ArchiveBuilder,
    header: &mut tar::Header,
    name: &[u8],
    link_name: Option<&[u8]>,
    records: &[(String, Vec<u8>)],
) -> io::Result<()> {
    let mut pax: Vec<(&str, &[u8])> = records
        .iter()
        .map(|(key, value)| (key.as_str(), value.as_slice()))
        .collect();

    let old = header.as_old_mut();
    if store_name(&mut old.name, name) {
        pax.push(("path", name));
    }
    if let Some(target) = link_name {
        if store_name(&mut old.linkname, target) {
            pax.push(("linkpath", target));
        }
    }
    header.set_cksum();

    builder.append_pax_extensions(pax)
}

/// Counts the bytes read through it and remembers whether a read failed.
struct PayloadReader<R> {
    inner: R,
    read: u64,
    failed: bool,
}

impl<R: Read> Read for PayloadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf).inspect_err(|_| self.failed = true)?;
        self.read += n as u64;
        Ok(n)
    }
}

/// Appends `header` followed by its payload, read from `data`.
///
/// Read failures, and payloads shorter than the header's size, are blamed on `source`; write
/// failures on `destination`.
pub(crate) fn append_payload(
    builder: &mut ArchiveBuilder,
    header: &tar::Header,
    data: impl Read,
    source: &Path,
    destination: &Path,
) -> Result<()> {
    let size = header.entry_size().with_path("read entry size for", source)?;
    let mut payload = PayloadReader {
        inner: data,
        read: 0,
        failed: false,
    };

    match builder.append(header, &mut payload) {
        Err(err) if payload.failed => Err::<(), _>(err).with_path("read payload of", source),
        Err(err) => Err::<(), _>(err).with_path("write entry to", destination),
        Ok(()) if payload.read != size => Err::<(), _>(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {size} bytes, got {}", payload.read),
        ))
        .with_path("read payload of", source),
        Ok(()) => Ok(()),
    }
}

fn append_file(
    builder: &mut ArchiveBuilder,
    destination: &Path,
    source: &SourceFile,
) -> Result<()> {
    let file = File::open(&source.path).with_path("open source file", &source.path)?;
    let metadata = file.metadata().with_path("stat source file", &source.path)?;
    if !metadata.is_file() {
        return Err(BundleError::NotARegularFile(source.path.clone()));
    }

    let mut header = tar::Header::new_gnu();
    header.set_metadata(&metadata);
    set_entry_names(
        builder,
        &mut header,
        source.name.as_os_str().as_encoded_bytes(),
        None,
        &[],
    )
    .with_path("write entry header to", destination)?;

    // the header records the size from stat; never copy more than that
    append_payload(
        builder,
        &header,
        file.take(metadata.len()),
        &source.path,
        destination,
    )
}

/// Packs `files`, in order, into a new gzip-compressed tar archive at `archive_name`.
///
/// Each entry is named after [`SourceFile::name`], which defaults to the path as given, and is
/// stored byte for byte: no base-name, `./` or leading `/` normalisation.  Mode, owner, mtime and
/// size come from the file's metadata.
///
/// Any failure aborts the whole operation.  A partially written archive may be left behind.
pub fn create_archive(files: &SourceFileSet, archive_name: impl AsRef<Path>) -> Result<()> {
    let archive_name = archive_name.as_ref();
    let mut builder = open_destination(archive_name)?;

    for source in files.iter() {
        debug!("adding {:?} as {:?}", source.path, source.name);
        append_file(&mut builder, archive_name, source)?;
    }

    finish_destination(builder, archive_name)?;
    debug!("wrote {} entries to {archive_name:?}", files.len());
    Ok(())
}
