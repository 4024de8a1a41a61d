//! Opening a container and listing its contents
//!
//! Listing prefers the plaintext index. When the index is missing or cannot
//! be decoded the entry names themselves are used instead; that listing has
//! no modification times and only approximate sizes.

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result, read_error};
use crate::index::{ArchiveIndex, ENCRYPTED_SUFFIX, INDEX_ENTRY_NAME, IndexEntry};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

/// Where a listing came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Index,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub entries: Vec<IndexEntry>,
    pub source: IndexSource,
}

/// A read-only handle on one container, opened once and reused for every
/// entry read from it.
pub struct ArchiveReader {
    archive: ZipArchive<BufReader<File>>,
    path: PathBuf,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| read_error(path, e))?;
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Container,
                format!("{} is not a readable archive", path.display()),
                e,
            )
        })?;
        debug!(path = %path.display(), entries = archive.len(), "opened archive");
        Ok(Self {
            archive,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode `index.json`.
    ///
    /// Every failure is reported as `NoIndex`.
    pub fn read_index(&mut self) -> Result<ArchiveIndex> {
        let entry = self.archive.by_name(INDEX_ENTRY_NAME).map_err(|e| {
            let msg = match e {
                ZipError::FileNotFound => format!("no {} found in archive", INDEX_ENTRY_NAME),
                _ => format!("failed to open {}", INDEX_ENTRY_NAME),
            };
            ArchiveError::with_kind_and_source(ErrorCategory::User, ErrorKind::NoIndex, msg, e)
        })?;
        ArchiveIndex::read_from(entry)
    }

    /// List entries from the index.
    pub fn list_fast(&mut self) -> Result<Vec<IndexEntry>> {
        let index = self.read_index()?;
        info!(files = index.entries.len(), "read archive index");
        Ok(index.entries)
    }

    /// Reconstruct a listing from `.enc` entry names alone.
    ///
    /// `original_size` is the stored payload length, which still includes
    /// the IV, so sizes are approximate.
    pub fn list_fallback(&mut self) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for i in 0..self.archive.len() {
            let file = self.archive.by_index_raw(i).map_err(|e| {
                ArchiveError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Container,
                    format!("failed to read entry {} of {}", i, self.path.display()),
                    e,
                )
            })?;
            if file.is_dir() {
                continue;
            }
            let name = file.name();
            let Some(relative_path) = name.strip_suffix(ENCRYPTED_SUFFIX) else {
                continue;
            };
            if relative_path.is_empty() {
                continue;
            }
            entries.push(IndexEntry {
                relative_path: relative_path.to_string(),
                original_size: file.size(),
                modified_at: None,
                container_name: name.to_string(),
            });
        }
        info!(files = entries.len(), "listed archive by entry name");
        Ok(entries)
    }

    /// Index listing, falling back to entry names only when the index is
    /// unusable. Other failures propagate.
    pub fn list(&mut self) -> Result<Listing> {
        match self.list_fast() {
            Ok(entries) => Ok(Listing {
                entries,
                source: IndexSource::Index,
            }),
            Err(e) if e.is(ErrorKind::NoIndex) => {
                warn!(error = %e, "failed to read index, trying fallback");
                Ok(Listing {
                    entries: self.list_fallback()?,
                    source: IndexSource::Fallback,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Open the container entry named exactly `name` and hand its payload
    /// to `f`.
    pub fn with_entry<T>(
        &mut self,
        name: &str,
        f: impl FnOnce(&mut dyn Read) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self.archive.by_name(name).map_err(|e| match e {
            ZipError::FileNotFound => ArchiveError::with_kind(
                ErrorCategory::User,
                ErrorKind::EntryNotFound,
                format!("{} not found in archive", name),
            ),
            other => ArchiveError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::Container,
                format!("failed to open {}", name),
                other,
            ),
        })?;
        f(&mut entry)
    }
}

/// List a container from its index.
pub fn list_fast(container_path: &Path) -> Result<Vec<IndexEntry>> {
    ArchiveReader::open(container_path)?.list_fast()
}

/// List a container from its entry names.
pub fn list_fallback(container_path: &Path) -> Result<Vec<IndexEntry>> {
    ArchiveReader::open(container_path)?.list_fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    fn make_zip(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("test.zip");
        let mut zip = ZipWriter::new(File::create(&path).unwrap());
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
        path
    }

    #[test]
    fn test_missing_index_is_no_index() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(dir.path(), &[("a.txt.enc", "0123456789abcdefXY")]);
        let err = list_fast(&path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NoIndex));
    }

    #[test]
    fn test_malformed_index_is_no_index() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(dir.path(), &[(INDEX_ENTRY_NAME, "not json")]);
        let err = list_fast(&path).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::NoIndex));
    }

    #[test]
    fn test_unopenable_container_is_not_no_index() {
        let dir = TempDir::new().unwrap();
        let err = list_fast(&dir.path().join("absent.zip")).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Io));

        let garbage = dir.path().join("garbage.zip");
        std::fs::write(&garbage, b"definitely not a zip").unwrap();
        let err = list_fast(&garbage).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::Container));
    }

    #[test]
    fn test_fallback_strips_suffix_and_ignores_others() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(
            dir.path(),
            &[
                ("notes.txt", "plain"),
                ("a.txt.enc", "0123456789abcdefXY"),
                ("sub/b.txt.enc", "0123456789abcdefWORLD"),
                (".enc", "nameless"),
            ],
        );
        let entries = list_fallback(&path).unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.txt"]);
        assert_eq!(entries[1].container_name, "sub/b.txt.enc");
        assert_eq!(entries[1].original_size, 21);
        assert!(entries[1].modified_at.is_none());
    }

    #[test]
    fn test_fallback_on_empty_archive() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(dir.path(), &[]);
        assert!(list_fallback(&path).unwrap().is_empty());

        let listing = ArchiveReader::open(&path).unwrap().list().unwrap();
        assert_eq!(listing.source, IndexSource::Fallback);
        assert!(listing.entries.is_empty());
    }

    #[test]
    fn test_with_entry_not_found() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(dir.path(), &[("a.txt.enc", "x")]);
        let mut reader = ArchiveReader::open(&path).unwrap();
        let err = reader.with_entry("b.txt.enc", |_| Ok(())).unwrap_err();
        assert_eq!(err.kind, Some(ErrorKind::EntryNotFound));

        let mut contents = Vec::new();
        reader
            .with_entry("a.txt.enc", |r| {
                r.read_to_end(&mut contents).map_err(|e| {
                    ArchiveError::with_source(ErrorCategory::Internal, "read failed", e)
                })
            })
            .unwrap();
        assert_eq!(contents, b"x");
    }
}
