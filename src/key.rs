//! Password to key derivation
//!
//! The archive key is the SHA-256 digest of the password bytes: no salt, no
//! iteration count. This keeps containers readable by every earlier writer
//! of the format, but it also means an attacker holding a container can
//! test password guesses at hash speed. Stretching (and a per-archive salt
//! stored next to the index) would need a format version bump.

use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Length of the derived key in bytes (AES-256)
pub const KEY_LEN: usize = 32;

/// Symmetric key for one encryption or decryption session.
///
/// Wiped from memory on drop and never written anywhere.
#[derive(Clone)]
pub struct ArchiveKey(Zeroizing<[u8; KEY_LEN]>);

impl ArchiveKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for ArchiveKey {
    /// Wrap raw key material that did not come from a password.
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }
}

impl fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ArchiveKey(..)")
    }
}

/// Derive the archive key from a password.
pub fn derive_key(password: &[u8]) -> ArchiveKey {
    let digest = Sha256::digest(password);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&digest);
    ArchiveKey(key)
}
