//! The plaintext manifest stored as `index.json`
//!
//! The index is written as the first container entry, uncompressed, so a
//! reader can list an archive without touching any payload. Field names on
//! disk are fixed:
//!
//! ```json
//! {
//!   "files": [
//!     { "relative_path": "sub/b.txt", "original_size": 5,
//!       "mod_time": "2024-01-01T00:00:00Z", "zip_name": "sub/b.txt.enc" }
//!   ],
//!   "created_at": "2024-01-01T00:00:00Z",
//!   "version": "1.0"
//! }
//! ```

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::{Read, Write};

/// Name of the index entry inside the container
pub const INDEX_ENTRY_NAME: &str = "index.json";

/// Format version written by this crate
pub const FORMAT_VERSION: &str = "1.0";

/// Suffix appended to a relative path to form its container entry name
pub const ENCRYPTED_SUFFIX: &str = ".enc";

/// Container entry name for a packaged file.
pub fn container_name(relative_path: &str) -> String {
    format!("{}{}", relative_path, ENCRYPTED_SUFFIX)
}

/// One packaged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Slash-separated path relative to the packaged tree.
    pub relative_path: String,
    /// Plaintext length in bytes. Approximate for fallback listings.
    pub original_size: u64,
    /// Source modification time. Unknown for fallback listings.
    #[serde(rename = "mod_time", default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(rename = "zip_name")]
    pub container_name: String,
}

impl IndexEntry {
    pub fn new(relative_path: impl Into<String>, original_size: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        let relative_path = relative_path.into();
        let container_name = container_name(&relative_path);
        Self {
            relative_path,
            original_size,
            modified_at,
            container_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveIndex {
    /// Older writers store an empty tree as `null`.
    #[serde(rename = "files", deserialize_with = "null_as_empty")]
    pub entries: Vec<IndexEntry>,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "version")]
    pub format_version: String,
}

impl ArchiveIndex {
    /// A current-format index stamped with the present time.
    pub fn new(entries: Vec<IndexEntry>) -> Self {
        Self {
            entries,
            created_at: Utc::now(),
            format_version: FORMAT_VERSION.to_string(),
        }
    }

    /// Sum of plaintext sizes.
    pub fn total_size(&self) -> u64 {
        total_size(&self.entries)
    }

    /// Serialize as indented JSON followed by a newline.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer_pretty(&mut writer, self).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write index",
                e,
            )
        })?;
        writer.write_all(b"\n").map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to write index",
                e,
            )
        })?;
        Ok(())
    }

    /// Decode an index. Any failure, I/O included, is reported as
    /// `NoIndex` so callers can fall back to an entry-name listing.
    pub fn read_from<R: Read>(reader: R) -> Result<Self> {
        let index: ArchiveIndex = serde_json::from_reader(reader).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::NoIndex,
                format!("{} could not be decoded", INDEX_ENTRY_NAME),
                e,
            )
        })?;
        if index.format_version != FORMAT_VERSION {
            tracing::warn!(
                version = %index.format_version,
                "index has unexpected format version; reading anyway"
            );
        }
        Ok(index)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<IndexEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<IndexEntry>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Sum of plaintext sizes over `entries`.
pub fn total_size(entries: &[IndexEntry]) -> u64 {
    entries.iter().map(|e| e.original_size).sum()
}
