//! ZIP container access.
//!
//! Thin wrappers around the `zip` crate that pin down the guarantees the
//! engine relies on: entry names are unique and slash-separated, insertion
//! order equals central-directory order, per-entry compression is Store or
//! Deflate, and an entry's uncompressed size is authoritative.

use crate::errors::{BagError, BagResult, IoResultExt};
use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Per-entry compression method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    Deflate,
    Store,
}

impl Compression {
    fn method(self) -> CompressionMethod {
        match self {
            Compression::Deflate => CompressionMethod::Deflated,
            Compression::Store => CompressionMethod::Stored,
        }
    }
}

/// Streaming archive writer. Entries are written one at a time through the
/// [`Write`] impl; [`BagWriter::finish`] flushes the central directory.
pub struct BagWriter {
    inner: ZipWriter<File>,
    names: HashSet<String>,
    path: PathBuf,
}

impl BagWriter {
    /// Creates the container file. Fails with `AlreadyExists` if the path
    /// is taken; a partial file from an aborted build is the caller's to
    /// reap.
    pub fn create(path: &Path) -> BagResult<Self> {
        if path.exists() {
            return Err(BagError::AlreadyExists(path.display().to_string()));
        }
        let file =
            File::create(path).io_context(|| format!("cannot create '{}'", path.display()))?;
        Ok(Self {
            inner: ZipWriter::new(file),
            names: HashSet::new(),
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens a new entry; subsequent writes go into it until the next
    /// entry begins. Duplicate names are rejected.
    pub fn begin_entry(&mut self, name: &str, compression: Compression) -> BagResult<()> {
        if !self.names.insert(name.to_string()) {
            return Err(BagError::Config(format!("duplicate archive entry '{name}'")));
        }
        let options = FileOptions::default()
            .compression_method(compression.method())
            .large_file(true);
        self.inner.start_file(name, options)?;
        Ok(())
    }

    /// Finishes the current entry list and flushes the central directory.
    pub fn finish(mut self) -> BagResult<()> {
        self.inner.finish()?;
        Ok(())
    }
}

impl Write for BagWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

/// Archive reader. Entries stream in central-directory order by index.
pub struct BagReader {
    archive: ZipArchive<File>,
    path: PathBuf,
}

impl BagReader {
    pub fn open(path: &Path) -> BagResult<Self> {
        let file = File::open(path).io_context(|| format!("cannot open '{}'", path.display()))?;
        let archive = ZipArchive::new(file)?;
        Ok(Self {
            archive,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }

    /// Opens the entry at `index` for streaming.
    pub fn entry(&mut self, index: usize) -> BagResult<Entry<'_>> {
        Ok(Entry(self.archive.by_index(index)?))
    }
}

/// One open archive entry.
pub struct Entry<'a>(zip::read::ZipFile<'a>);

impl Entry<'_> {
    /// Slash-separated in-archive name.
    pub fn name(&self) -> String {
        self.0.name().replace('\\', "/")
    }

    /// Uncompressed size as recorded in the central directory.
    pub fn size(&self) -> u64 {
        self.0.size()
    }
}

impl Read for Entry<'_> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn roundtrip_preserves_order_and_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.zip");

        let mut writer = BagWriter::create(&path).unwrap();
        writer.begin_entry("bagit.txt", Compression::Deflate).unwrap();
        writer.write_all(b"first").unwrap();
        writer.begin_entry("data/a.bin", Compression::Store).unwrap();
        writer.write_all(&[0u8; 16]).unwrap();
        writer.begin_entry("data/b.txt", Compression::Deflate).unwrap();
        writer.write_all(b"third").unwrap();
        writer.finish().unwrap();

        let mut reader = BagReader::open(&path).unwrap();
        assert_eq!(reader.len(), 3);

        let expected = ["bagit.txt", "data/a.bin", "data/b.txt"];
        for (i, want) in expected.iter().enumerate() {
            let mut entry = reader.entry(i).unwrap();
            assert_eq!(entry.name(), *want);
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            match i {
                0 => assert_eq!(content, b"first"),
                1 => assert_eq!(content, vec![0u8; 16]),
                _ => assert_eq!(content, b"third"),
            }
        }

        let entry = reader.entry(1).unwrap();
        assert_eq!(entry.size(), 16, "store entry reports uncompressed size");
    }

    #[test]
    fn duplicate_entry_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.zip");

        let mut writer = BagWriter::create(&path).unwrap();
        writer.begin_entry("same.txt", Compression::Deflate).unwrap();
        let err = writer
            .begin_entry("same.txt", Compression::Deflate)
            .unwrap_err();
        assert!(matches!(err, BagError::Config(_)));
    }

    #[test]
    fn create_refuses_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.zip");
        std::fs::write(&path, b"occupied").unwrap();

        let err = match BagWriter::create(&path) {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, BagError::AlreadyExists(_)));
    }
}
