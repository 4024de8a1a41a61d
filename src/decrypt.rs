//! Decrypting a chosen subset of a container
//!
//! Entries are processed one at a time, in index order, over a single open
//! container. A failing entry is recorded and the batch moves on; the
//! outcome of every selected entry is in the returned [`DecryptReport`].

use crate::cleanup::{CancelFlag, CleanupRegistry};
use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result, write_error};
use crate::index::IndexEntry;
use crate::key::ArchiveKey;
use crate::progress::{NoProgress, Progress};
use crate::reader::ArchiveReader;
use crate::stream::{StreamCipher, read_iv};
use crate::writer::native_path;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

/// One entry that could not be decrypted.
#[derive(Debug)]
pub struct EntryFailure {
    pub relative_path: String,
    /// Set when an output file was created before the failure. The
    /// partial file is left in place.
    pub partial_output: Option<PathBuf>,
    pub error: ArchiveError,
}

#[derive(Debug, Default)]
pub struct DecryptReport {
    /// Outputs written in full, in processing order.
    pub decrypted: Vec<PathBuf>,
    pub failures: Vec<EntryFailure>,
    /// Selected entries never attempted because of cancellation.
    pub skipped: Vec<String>,
    pub cancelled: bool,
}

impl DecryptReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Entries of `index` whose relative path is in `selected`, in index order.
pub fn select_entries<'a>(index: &'a [IndexEntry], selected: &HashSet<String>) -> Vec<&'a IndexEntry> {
    index
        .iter()
        .filter(|e| selected.contains(&e.relative_path))
        .collect()
}

pub struct SelectiveDecryptor<'a> {
    key: &'a ArchiveKey,
    output_root: PathBuf,
    progress: &'a dyn Progress,
    cancel: Option<&'a CancelFlag>,
}

impl<'a> SelectiveDecryptor<'a> {
    pub fn new(key: &'a ArchiveKey, output_root: impl Into<PathBuf>) -> Self {
        Self {
            key,
            output_root: output_root.into(),
            progress: &NoProgress,
            cancel: None,
        }
    }

    pub fn progress(mut self, progress: &'a dyn Progress) -> Self {
        self.progress = progress;
        self
    }

    /// Stop before the next entry once `cancel` is raised.
    pub fn cancel(mut self, cancel: &'a CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Decrypt the entries of `index` named in `selected`.
    ///
    /// Each output lands at `output_root/relative_path` and is registered
    /// with `registry` once fully written.
    pub fn decrypt(
        &self,
        reader: &mut ArchiveReader,
        index: &[IndexEntry],
        selected: &HashSet<String>,
        registry: &mut CleanupRegistry,
    ) -> DecryptReport {
        let chosen = select_entries(index, selected);
        let mut report = DecryptReport::default();
        if chosen.is_empty() {
            return report;
        }
        let total_bytes = total_size_of(&chosen);
        info!(
            files = chosen.len(),
            total_bytes,
            archive = %reader.path().display(),
            "decrypting selection"
        );
        self.progress.set_total(total_bytes);

        for (i, entry) in chosen.iter().enumerate() {
            if self.cancel.is_some_and(CancelFlag::is_cancelled) {
                report.cancelled = true;
                report
                    .skipped
                    .extend(chosen[i..].iter().map(|e| e.relative_path.clone()));
                warn!(skipped = report.skipped.len(), "cancelled, stopping before next entry");
                break;
            }

            let mut partial_output = None;
            match self.decrypt_entry(reader, entry, &mut partial_output) {
                Ok(output_path) => {
                    let output_path = std::path::absolute(&output_path).unwrap_or(output_path);
                    registry.register(output_path.clone());
                    report.decrypted.push(output_path);
                }
                Err(error) => {
                    warn!(path = %entry.relative_path, error = %error, "failed to decrypt");
                    report.failures.push(EntryFailure {
                        relative_path: entry.relative_path.clone(),
                        partial_output,
                        error,
                    });
                }
            }
        }

        info!(
            decrypted = report.decrypted.len(),
            failed = report.failures.len(),
            "decryption finished"
        );
        report
    }

    fn decrypt_entry(
        &self,
        reader: &mut ArchiveReader,
        entry: &IndexEntry,
        partial_output: &mut Option<PathBuf>,
    ) -> Result<PathBuf> {
        let output_path = output_path(&self.output_root, &entry.relative_path)?;
        reader.with_entry(&entry.container_name, |payload| {
            // Read the IV before touching the filesystem so a truncated
            // entry leaves nothing behind.
            let iv = read_iv(&mut *payload)?;
            let mut cipher = StreamCipher::decryptor(self.key, &iv)?;

            if let Some(parent) = output_path.parent() {
                fs::create_dir_all(parent).map_err(|e| write_error(parent, e))?;
            }
            let mut output = create_output(&output_path)?;
            *partial_output = Some(output_path.clone());

            let bytes = cipher
                .copy(&mut *payload, &mut output, self.progress)
                .map_err(|e| {
                    ArchiveError::with_kind_and_source(
                        ErrorCategory::Internal,
                        ErrorKind::Io,
                        "decryption failed: likely wrong password or corrupted entry",
                        e,
                    )
                })?;
            output
                .flush()
                .map_err(|e| write_error(&output_path, e))?;
            debug!(path = %entry.relative_path, bytes, "decrypted");
            Ok(())
        })?;
        Ok(output_path)
    }
}

/// Decrypt `selected` entries of the container at `container_path`.
///
/// Only failing to open the container is an error; per-entry failures are
/// in the report.
pub fn decrypt_selected(
    container_path: &Path,
    full_index: &[IndexEntry],
    selected: &HashSet<String>,
    key: &ArchiveKey,
    progress: &dyn Progress,
    output_root: &Path,
    registry: &mut CleanupRegistry,
) -> Result<DecryptReport> {
    if selected.is_empty() {
        return Ok(DecryptReport::default());
    }
    let mut reader = ArchiveReader::open(container_path)?;
    Ok(SelectiveDecryptor::new(key, output_root)
        .progress(progress)
        .decrypt(&mut reader, full_index, selected, registry))
}

fn total_size_of(entries: &[&IndexEntry]) -> u64 {
    entries.iter().map(|e| e.original_size).sum()
}

/// Resolve where `relative_path` is written, refusing paths that would
/// land outside `root`.
fn output_path(root: &Path, relative_path: &str) -> Result<PathBuf> {
    let unsafe_path = || {
        ArchiveError::with_kind(
            ErrorCategory::User,
            ErrorKind::UnsafePath,
            format!("refusing to write outside the output directory: {}", relative_path),
        )
    };
    if relative_path.is_empty() || relative_path.starts_with('/') {
        return Err(unsafe_path());
    }
    for component in Path::new(relative_path).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(unsafe_path());
            }
        }
    }
    if relative_path.split('/').any(|part| part == "..") {
        return Err(unsafe_path());
    }
    Ok(native_path(root, relative_path))
}

/// Create (or truncate) an output file readable only by its owner.
fn create_output(path: &Path) -> Result<File> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options.open(path).map_err(|e| {
        ArchiveError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("failed to open {}", path.display()),
            e,
        )
    })
}
