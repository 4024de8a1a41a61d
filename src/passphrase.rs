//! Password prompting

use crate::error::{ArchiveError, ErrorCategory, ErrorKind, Result};
use std::io::{self, IsTerminal, Read};
use zeroize::Zeroizing;

/// Source of the archive password.
pub trait PassphraseReader {
    /// Obtain a password, showing `prompt` if the source is interactive.
    ///
    /// The bytes are wiped from memory when dropped.
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<Vec<u8>>>;
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<Vec<u8>>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self, _prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new((*self.passphrase).clone()))
    }
}

/// Reads the whole of an `io::Read` source as the passphrase.
///
/// One trailing line ending is dropped so `echo secret | encpack ...`
/// means the password "secret".
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self, _prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                "error reading passphrase",
                e,
            )
        })?;
        if data.ends_with(b"\n") {
            data.pop();
            if data.ends_with(b"\r") {
                data.pop();
            }
        }
        Ok(data)
    }
}

/// Prompts on the terminal with echo disabled.
#[derive(Debug, Default)]
pub struct TerminalPassphraseReader;

impl PassphraseReader for TerminalPassphraseReader {
    /// Terminal input is limited to UTF-8; use a reader source for
    /// arbitrary bytes.
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        if !io::stdin().is_terminal() {
            return Err(ArchiveError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }
        let passphrase = rpassword::prompt_password(prompt).map_err(|e| {
            ArchiveError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                "failure reading passphrase",
                e,
            )
        })?;
        Ok(Zeroizing::new(passphrase.into_bytes()))
    }
}

/// Asks the upstream reader twice and insists both answers match.
///
/// Used when creating an archive, where a typo would lock the data away.
pub struct ConfirmingPassphraseReader<R> {
    upstream: R,
}

impl<R: PassphraseReader> ConfirmingPassphraseReader<R> {
    pub fn new(upstream: R) -> Self {
        Self { upstream }
    }
}

impl<R: PassphraseReader> PassphraseReader for ConfirmingPassphraseReader<R> {
    fn read_passphrase(&mut self, prompt: &str) -> Result<Zeroizing<Vec<u8>>> {
        let first = self.upstream.read_passphrase(prompt)?;
        let second = self.upstream.read_passphrase("Confirm password: ")?;
        if *first != *second {
            return Err(ArchiveError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "passwords do not match",
            ));
        }
        Ok(first)
    }
}
