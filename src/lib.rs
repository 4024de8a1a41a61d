//! encpack - directory trees packed into a zip container of individually
//! encrypted files
//!
//! A container holds a plaintext `index.json` followed by one
//! `<relative_path>.enc` entry per file (16-byte IV + AES-256-CFB
//! ciphertext). The index makes listing instant and lets any subset of
//! files be decrypted without reading the others.

#![forbid(unsafe_code)]

pub mod cleanup;
pub mod decrypt;
pub mod display;
pub mod error;
pub mod index;
pub mod key;
pub mod passphrase;
pub mod progress;
pub mod reader;
pub mod stream;
pub mod sync;
pub mod writer;

pub use cleanup::{CancelFlag, CleanupRegistry, PurgeReport};
pub use decrypt::{DecryptReport, EntryFailure, SelectiveDecryptor, decrypt_selected};
pub use error::{ArchiveError, ErrorCategory, ErrorKind, Result};
pub use index::{ArchiveIndex, IndexEntry};
pub use key::{ArchiveKey, derive_key};
pub use progress::{NoProgress, Progress};
pub use reader::{ArchiveReader, IndexSource, Listing, list_fallback, list_fast};
pub use writer::{ArchiveWriter, BuildSummary};
