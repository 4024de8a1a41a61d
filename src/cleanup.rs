//! Tracking decrypted outputs for later removal, and cooperative cancellation

use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use tracing::{info, warn};

/// Paths of fully written plaintext outputs.
///
/// Owned by the caller. Nothing is removed until `purge_all` is called.
#[derive(Debug, Default)]
pub struct CleanupRegistry {
    paths: Vec<PathBuf>,
}

/// Outcome of `CleanupRegistry::purge_all`.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<PathBuf>) {
        self.paths.push(path.into());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Remove every registered file and forget it. Files that are already
    /// gone count as removed.
    pub fn purge_all(&mut self) -> PurgeReport {
        let mut report = PurgeReport::default();
        for path in self.paths.drain(..) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(path = %path.display(), "removed");
                    report.removed.push(path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => report.removed.push(path),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove");
                    report.failed.push((path, e));
                }
            }
        }
        report
    }
}

/// A cloneable cancellation signal.
///
/// Raised from a signal handler; observed between entries by long-running
/// operations.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until `cancel` has been called.
    pub fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut cancelled = lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            cancelled = cvar.wait(cancelled).unwrap_or_else(PoisonError::into_inner);
        }
    }
}
