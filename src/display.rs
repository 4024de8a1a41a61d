//! Helpers for presenting listings and reading a user's choice of files

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result};
use std::collections::BTreeSet;

/// Human-readable size in binary units: "512 B", "1.5 KB", "3.0 MB".
pub fn format_size(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = b"KMGTPE"[exp] as char;
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Parse a selection typed against a numbered list of `count` items.
///
/// Accepts `all`, or 1-based indices and inclusive ranges separated by
/// commas and/or whitespace, e.g. `1,3 5-7`. Returns sorted 0-based
/// indices without duplicates.
pub fn parse_selection(input: &str, count: usize) -> Result<Vec<usize>> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok((0..count).collect());
    }

    let mut chosen = BTreeSet::new();
    for token in input.split(|c: char| c == ',' || c.is_whitespace()) {
        if token.is_empty() {
            continue;
        }
        let (start, end) = match token.split_once('-') {
            Some((a, b)) => (parse_index(a, count)?, parse_index(b, count)?),
            None => {
                let i = parse_index(token, count)?;
                (i, i)
            }
        };
        if start > end {
            return Err(invalid(format!("range {} runs backwards", token)));
        }
        chosen.extend(start..=end);
    }
    Ok(chosen.into_iter().collect())
}

fn parse_index(text: &str, count: usize) -> Result<usize> {
    let n: usize = text
        .trim()
        .parse()
        .map_err(|_| invalid(format!("{:?} is not a number", text)))?;
    if n == 0 || n > count {
        return Err(invalid(format!("{} is out of range 1-{}", n, count)));
    }
    Ok(n - 1)
}

fn invalid(msg: String) -> ArchiveError {
    ArchiveError::with_kind(ErrorCategory::User, ErrorKind::InvalidSelection, msg)
}
