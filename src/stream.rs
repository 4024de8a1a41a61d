//! Per-entry AES-256-CFB streaming
//!
//! Every `.enc` payload is laid out as:
//! - iv: 16 bytes, fresh from the OS RNG
//! - ciphertext: same length as the plaintext (full-block CFB, no padding)
//!
//! There is no authentication tag. Decrypting with the wrong key produces
//! garbage of the right length rather than an error.

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result};
use crate::key::ArchiveKey;
use crate::progress::Progress;
use aes::Aes256;
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{BufDecryptor, BufEncryptor};
use rand::RngCore;
use rand::rngs::OsRng;
use std::io::{self, Read, Write};
use zeroize::Zeroizing;

/// Length of the IV prefixed to each payload (the AES block size)
pub const IV_LEN: usize = 16;

/// Bytes moved through the cipher per read.
const CHUNK_SIZE: usize = 64 * 1024;

/// Generate a random IV for one entry.
pub fn generate_iv() -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    OsRng.try_fill_bytes(&mut iv).map_err(|e| {
        ArchiveError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::CipherInit,
            "failed to generate IV",
            e,
        )
    })?;
    Ok(iv)
}

/// Read the IV at the start of a payload.
pub fn read_iv<R: Read + ?Sized>(reader: &mut R) -> Result<[u8; IV_LEN]> {
    let mut iv = [0u8; IV_LEN];
    reader.read_exact(&mut iv).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ArchiveError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::TruncatedInput,
                "failed to read IV: likely corrupted file or wrong password",
                e,
            )
        } else {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to read IV",
                e,
            )
        }
    })?;
    Ok(iv)
}

enum Mode {
    Encrypt(BufEncryptor<Aes256>),
    Decrypt(BufDecryptor<Aes256>),
}

/// CFB keystream bound to one key and IV.
///
/// Chunk boundaries do not matter: feeding the same bytes in any split
/// yields the same output.
pub struct StreamCipher {
    mode: Mode,
}

impl StreamCipher {
    pub fn encryptor(key: &ArchiveKey, iv: &[u8; IV_LEN]) -> Result<Self> {
        let inner = BufEncryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
            .map_err(|_| cipher_init_error())?;
        Ok(Self {
            mode: Mode::Encrypt(inner),
        })
    }

    pub fn decryptor(key: &ArchiveKey, iv: &[u8; IV_LEN]) -> Result<Self> {
        let inner = BufDecryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
            .map_err(|_| cipher_init_error())?;
        Ok(Self {
            mode: Mode::Decrypt(inner),
        })
    }

    /// Transform `buf` in place.
    pub fn apply(&mut self, buf: &mut [u8]) {
        match &mut self.mode {
            Mode::Encrypt(c) => c.encrypt(buf),
            Mode::Decrypt(c) => c.decrypt(buf),
        }
    }

    /// Pump `reader` through the cipher into `writer`, reporting each chunk
    /// to `progress` once it has been written. Returns the byte count.
    pub fn copy<R, W>(&mut self, reader: &mut R, writer: &mut W, progress: &dyn Progress) -> io::Result<u64>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buf = Zeroizing::new(vec![0u8; CHUNK_SIZE]);
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            self.apply(&mut buf[..n]);
            writer.write_all(&buf[..n])?;
            total += n as u64;
            progress.advance(n as u64);
        }
        Ok(total)
    }
}

/// Encrypt everything `reader` yields into `writer`. The IV is not written.
pub fn encrypt_stream<R, W>(
    key: &ArchiveKey,
    iv: &[u8; IV_LEN],
    reader: &mut R,
    writer: &mut W,
    progress: &dyn Progress,
) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    StreamCipher::encryptor(key, iv)
        .map_err(io::Error::other)?
        .copy(reader, writer, progress)
}

/// Decrypt everything `reader` yields into `writer`, the IV having already
/// been consumed.
pub fn decrypt_stream<R, W>(
    key: &ArchiveKey,
    iv: &[u8; IV_LEN],
    reader: &mut R,
    writer: &mut W,
    progress: &dyn Progress,
) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    StreamCipher::decryptor(key, iv)
        .map_err(io::Error::other)?
        .copy(reader, writer, progress)
}

fn cipher_init_error() -> ArchiveError {
    ArchiveError::with_kind(
        ErrorCategory::Internal,
        ErrorKind::CipherInit,
        "failed to initialize AES-256-CFB",
    )
}
