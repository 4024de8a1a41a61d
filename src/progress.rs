//! Byte-count progress reporting

use indicatif::{ProgressBar, ProgressStyle};

/// Receives the number of bytes processed after each chunk.
pub trait Progress {
    /// Announce the expected total before any work starts.
    fn set_total(&self, _total: u64) {}

    fn advance(&self, n: u64);
}

/// Discards all progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {
    fn advance(&self, _n: u64) {}
}

impl Progress for ProgressBar {
    fn set_total(&self, total: u64) {
        self.set_length(total);
    }

    fn advance(&self, n: u64) {
        self.inc(n);
    }
}

/// A byte-style bar drawn on stderr, hidden when stderr is not a terminal.
pub fn bytes_bar(total: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{msg} {bar:40} {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message(message);
    bar
}

/// A bar counting items rather than bytes.
pub fn count_bar(total: u64, message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template("{msg} {bar:40} {pos}/{len}") {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar.set_message(message);
    bar
}
