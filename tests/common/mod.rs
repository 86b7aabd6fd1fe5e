#![allow(dead_code)]

use std::{collections::BTreeMap, fs::File, io::Read, path::Path};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use tempfile::TempDir;

pub fn tempdir() -> TempDir {
    TempDir::with_prefix("logbundle-test-").unwrap()
}

/// Entry name to content, for every entry of a `.tar.gz`.
pub fn read_archive(path: impl AsRef<Path>) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    let mut entries = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = String::from_utf8(entry.path_bytes().into_owned()).unwrap();
        let mut content = vec![];
        entry.read_to_end(&mut content).unwrap();
        assert!(
            entries.insert(name.clone(), content).is_none(),
            "duplicate entry {name}"
        );
    }
    entries
}

/// Entry names in archive order.
pub fn entry_names(path: impl AsRef<Path>) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|entry| String::from_utf8(entry.unwrap().path_bytes().into_owned()).unwrap())
        .collect()
}

/// Writes a `.tar.gz` holding one regular file per `(name, content)` pair.
pub fn write_archive(path: impl AsRef<Path>, files: &[(&str, &[u8])]) {
    let encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_ustar();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}
