//! Incremental plain-file mirroring of one directory tree into another
//!
//! No encryption is involved. A destination file is left alone when it has
//! the same size as the source and the source is not newer; everything in
//! the destination that no longer exists in the source is removed.

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result, read_error, write_error};
use crate::progress::Progress;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub copied: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Number of regular files under `root`, for sizing a progress bar.
pub fn count_files(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count() as u64
}

/// Mirror `source` into `destination`, advancing `progress` once per
/// source file.
pub fn sync_tree(source: &Path, destination: &Path, progress: &dyn Progress) -> Result<SyncSummary> {
    let metadata = fs::metadata(source).map_err(|e| read_error(source, e))?;
    if !metadata.is_dir() {
        return Err(ArchiveError::with_kind(
            ErrorCategory::User,
            ErrorKind::Io,
            format!("{} is not a directory", source.display()),
        ));
    }
    let mut summary = SyncSummary::default();

    for item in WalkDir::new(source).sort_by_file_name() {
        let item = item.map_err(|e| walk_error(source, e))?;
        let relative = item.path().strip_prefix(source).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                format!("{} is not under {}", item.path().display(), source.display()),
                e,
            )
        })?;
        let target = destination.join(relative);

        if item.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| write_error(&target, e))?;
            continue;
        }
        if !item.file_type().is_file() {
            debug!(path = %item.path().display(), "skipping non-regular file");
            continue;
        }

        let src_meta = item.metadata().map_err(|e| walk_error(source, e))?;
        if is_up_to_date(&src_meta, &target) {
            summary.unchanged += 1;
        } else {
            copy_file(item.path(), &target)?;
            debug!(path = %relative.display(), "copied");
            summary.copied += 1;
        }
        progress.advance(1);
    }

    let mut stale = WalkDir::new(destination).min_depth(1).into_iter();
    while let Some(item) = stale.next() {
        let item = item.map_err(|e| walk_error(destination, e))?;
        let relative = match item.path().strip_prefix(destination) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if fs::symlink_metadata(source.join(relative)).is_ok() {
            continue;
        }
        if item.file_type().is_dir() {
            fs::remove_dir_all(item.path()).map_err(|e| write_error(item.path(), e))?;
            stale.skip_current_dir();
        } else {
            fs::remove_file(item.path()).map_err(|e| write_error(item.path(), e))?;
        }
        debug!(path = %relative.display(), "removed");
        summary.removed += 1;
    }

    info!(
        copied = summary.copied,
        unchanged = summary.unchanged,
        removed = summary.removed,
        "backup finished"
    );
    Ok(summary)
}

fn is_up_to_date(src_meta: &fs::Metadata, target: &Path) -> bool {
    let Ok(dst_meta) = fs::metadata(target) else {
        return false;
    };
    if !dst_meta.is_file() || dst_meta.len() != src_meta.len() {
        return false;
    }
    match (src_meta.modified(), dst_meta.modified()) {
        (Ok(src), Ok(dst)) => src <= dst,
        _ => false,
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<()> {
    let mut input = File::open(from).map_err(|e| read_error(from, e))?;
    let mut output = File::create(to).map_err(|e| write_error(to, e))?;
    io::copy(&mut input, &mut output).map_err(|e| write_error(to, e))?;
    Ok(())
}

fn walk_error(root: &Path, err: walkdir::Error) -> ArchiveError {
    let msg = match err.path() {
        Some(p) => format!("failed to walk {}", p.display()),
        None => format!("failed to walk {}", root.display()),
    };
    ArchiveError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use crate::progress::testing::RecordingProgress;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_initial_sync_copies_everything() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "a.txt", "alpha");
        write(src.path(), "nested/b.txt", "beta");
        fs::create_dir_all(src.path().join("empty")).unwrap();

        let progress = RecordingProgress::default();
        let summary = sync_tree(src.path(), dst.path(), &progress).unwrap();
        assert_eq!(summary, SyncSummary { copied: 2, unchanged: 0, removed: 0 });
        assert_eq!(progress.total(), 2);
        assert_eq!(count_files(src.path()), 2);
        assert_eq!(fs::read_to_string(dst.path().join("nested/b.txt")).unwrap(), "beta");
        assert!(dst.path().join("empty").is_dir());
    }

    #[test]
    fn test_second_sync_skips_unchanged() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "a.txt", "alpha");
        sync_tree(src.path(), dst.path(), &NoProgress).unwrap();

        let summary = sync_tree(src.path(), dst.path(), &NoProgress).unwrap();
        assert_eq!(summary, SyncSummary { copied: 0, unchanged: 1, removed: 0 });
    }

    #[test]
    fn test_size_change_is_copied() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "a.txt", "alpha");
        sync_tree(src.path(), dst.path(), &NoProgress).unwrap();
        write(dst.path(), "a.txt", "tampered with");

        let summary = sync_tree(src.path(), dst.path(), &NoProgress).unwrap();
        assert_eq!(summary.copied, 1);
        assert_eq!(fs::read_to_string(dst.path().join("a.txt")).unwrap(), "alpha");
    }

    #[test]
    fn test_stale_destination_entries_removed() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(src.path(), "keep.txt", "k");
        write(dst.path(), "old.txt", "o");
        write(dst.path(), "old-dir/inner/x.txt", "x");

        let summary = sync_tree(src.path(), dst.path(), &NoProgress).unwrap();
        assert_eq!(summary.removed, 2);
        assert!(dst.path().join("keep.txt").exists());
        assert!(!dst.path().join("old.txt").exists());
        assert!(!dst.path().join("old-dir").exists());
    }

    #[test]
    fn test_missing_source_is_user_error() {
        let dir = TempDir::new().unwrap();
        let err = sync_tree(&dir.path().join("nope"), dir.path(), &NoProgress).unwrap_err();
        assert_eq!(err.category, ErrorCategory::User);
    }
}
