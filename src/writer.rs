//! Building a container from a directory tree
//!
//! The container is assembled in a temporary file next to the destination
//! and only renamed into place once every entry has been written and
//! synced. A failed build leaves the destination untouched.

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result, read_error, write_error};
use crate::index::{ArchiveIndex, INDEX_ENTRY_NAME, IndexEntry};
use crate::key::ArchiveKey;
use crate::progress::Progress;
use crate::stream::{IV_LEN, encrypt_stream, generate_iv};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

/// What a successful build packaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildSummary {
    pub files: usize,
    pub total_bytes: u64,
}

pub struct ArchiveWriter {
    key: ArchiveKey,
    overwrite: bool,
}

impl ArchiveWriter {
    pub fn new(key: ArchiveKey) -> Self {
        Self {
            key,
            overwrite: false,
        }
    }

    /// Replace an existing destination instead of failing.
    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Package every regular file under `source_tree` into `destination`.
    ///
    /// `progress` is advanced by plaintext bytes across all files; its total
    /// is the returned `total_bytes`, which is known before any encryption
    /// starts.
    pub fn build(
        &self,
        source_tree: &Path,
        destination: &Path,
        progress: &dyn Progress,
    ) -> Result<BuildSummary> {
        let mut entries = collect_entries(source_tree)?;
        // An existing destination inside the tree must not be packed into itself.
        if let Ok(existing) = fs::canonicalize(destination) {
            entries.retain(|entry| {
                let path = native_path(source_tree, &entry.relative_path);
                let is_destination = fs::canonicalize(&path).is_ok_and(|p| p == existing);
                if is_destination {
                    debug!(path = %path.display(), "skipping destination archive");
                }
                !is_destination
            });
        }
        let index = ArchiveIndex::new(entries);
        let summary = BuildSummary {
            files: index.entries.len(),
            total_bytes: index.total_size(),
        };
        info!(
            files = summary.files,
            total_bytes = summary.total_bytes,
            destination = %destination.display(),
            "building archive"
        );

        progress.set_total(summary.total_bytes);

        let parent = match destination.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
        let mut temp_file = tempfile::Builder::new()
            .prefix(".encpack-")
            .suffix(".tmp")
            .tempfile_in(parent)
            .map_err(|e| {
                ArchiveError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to create tempfile in {}", parent.display()),
                    e,
                )
            })?;

        {
            let mut zip = ZipWriter::new(BufWriter::new(temp_file.as_file_mut()));
            write_index(&mut zip, &index)?;
            for entry in &index.entries {
                let source_path = native_path(source_tree, &entry.relative_path);
                self.write_entry(&mut zip, &source_path, entry, progress)
                    .map_err(|e| e.with_context(format!("failed to encrypt {}", entry.relative_path)))?;
            }
            let mut buffered = zip.finish().map_err(|e| container_error("failed to finish archive", e))?;
            buffered.flush().map_err(|e| {
                ArchiveError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to flush tempfile",
                    e,
                )
            })?;
        }

        // fsync() before the rename so the destination never names a
        // partially written container.
        temp_file.as_file().sync_all().map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to sync file prior to rename",
                e,
            )
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp_file
                .as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| {
                    ArchiveError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::Io,
                        "failed to set tempfile permissions",
                        e,
                    )
                })?;
        }

        let persisted = if self.overwrite {
            temp_file.persist(destination)
        } else {
            temp_file.persist_noclobber(destination)
        };
        persisted.map_err(|e| {
            let category = if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                ErrorCategory::User
            } else {
                ErrorCategory::Internal
            };
            ArchiveError::with_kind_and_source(
                category,
                ErrorKind::Io,
                format!("failed to create {}", destination.display()),
                e.error,
            )
        })?;

        info!(destination = %destination.display(), "archive written");
        Ok(summary)
    }

    fn write_entry<W: Write + Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        source_path: &Path,
        entry: &IndexEntry,
        progress: &dyn Progress,
    ) -> Result<()> {
        let mut source = File::open(source_path).map_err(|e| read_error(source_path, e))?;
        let iv = generate_iv()?;

        let payload_len = entry.original_size + IV_LEN as u64;
        zip.start_file(
            entry.container_name.as_str(),
            stored_options().large_file(payload_len >= u32::MAX as u64),
        )
        .map_err(|e| container_error(format!("failed to add {}", entry.container_name), e))?;
        zip.write_all(&iv).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write IV",
                e,
            )
        })?;
        let written = encrypt_stream(&self.key, &iv, &mut source, zip, progress).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to stream {}", source_path.display()),
                e,
            )
        })?;
        debug!(path = %entry.relative_path, bytes = written, "encrypted");
        Ok(())
    }
}

fn stored_options() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Stored)
}

fn write_index<W: Write + Seek>(zip: &mut ZipWriter<W>, index: &ArchiveIndex) -> Result<()> {
    zip.start_file(INDEX_ENTRY_NAME, stored_options())
        .map_err(|e| container_error("failed to create index", e))?;
    index
        .write_to(zip)
        .map_err(|e| e.with_context("failed to create index"))
}

fn container_error(msg: impl Into<String>, err: zip::result::ZipError) -> ArchiveError {
    ArchiveError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Container, msg, err)
}

/// Enumerate regular files under `source_tree` in file-name order.
///
/// Directories are implied by the paths; symlinks and other special files
/// are skipped.
pub fn collect_entries(source_tree: &Path) -> Result<Vec<IndexEntry>> {
    let metadata = fs::metadata(source_tree).map_err(|e| read_error(source_tree, e))?;
    if !metadata.is_dir() {
        return Err(ArchiveError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not a directory", source_tree.display()),
        ));
    }

    let mut entries = Vec::new();
    for item in WalkDir::new(source_tree).sort_by_file_name() {
        let item = item.map_err(|e| {
            let msg = match e.path() {
                Some(p) => format!("failed to walk {}", p.display()),
                None => format!("failed to walk {}", source_tree.display()),
            };
            ArchiveError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, e)
        })?;
        let file_type = item.file_type();
        if file_type.is_dir() {
            continue;
        }
        if !file_type.is_file() {
            debug!(path = %item.path().display(), "skipping non-regular file");
            continue;
        }
        let metadata = item.metadata().map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to stat {}", item.path().display()),
                e,
            )
        })?;
        let relative_path = slash_path(source_tree, item.path())?;
        let modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
        entries.push(IndexEntry::new(relative_path, metadata.len(), modified_at));
    }
    Ok(entries)
}

/// `path` relative to `root`, joined with forward slashes.
fn slash_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path.strip_prefix(root).map_err(|e| {
        ArchiveError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::InternalInvariant,
            format!("{} is not under {}", path.display(), root.display()),
            e,
        )
    })?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let Component::Normal(part) = component else {
            return Err(ArchiveError::with_kind(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("unexpected component in {}", relative.display()),
            ));
        };
        let part = part.to_str().ok_or_else(|| {
            ArchiveError::with_kind(
                ErrorCategory::User,
                ErrorKind::Io,
                format!("{} is not valid UTF-8", path.display()),
            )
        })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Rebuild a native path from a slash-separated relative path.
pub(crate) fn native_path(root: &Path, relative_path: &str) -> PathBuf {
    relative_path
        .split('/')
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}
