//! encpack CLI - encrypted, selectively extractable directory archives
//!
//! Packs a directory into a zip container of individually AES-256-CFB
//! encrypted files, lists containers without the password, and decrypts
//! any subset of files on demand.

use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use encpack::display::{format_size, parse_selection};
use encpack::passphrase::{
    ConfirmingPassphraseReader, PassphraseReader, ReaderPassphraseReader,
    TerminalPassphraseReader,
};
use encpack::progress::{bytes_bar, count_bar};
use encpack::sync::{count_files, sync_tree};
use encpack::{
    ArchiveError, ArchiveReader, ArchiveWriter, CancelFlag, CleanupRegistry, DecryptReport,
    ErrorCategory, ErrorKind, IndexEntry, IndexSource, Result, SelectiveDecryptor, derive_key,
};

/// Exit status after Ctrl+C interrupted a decryption.
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "encpack")]
#[command(version)]
#[command(about = "Encrypted, selectively extractable directory archives.", long_about = None)]
struct Cli {
    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    passphrase_stdin: bool,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt every file under a directory into a new archive
    #[command(alias = "e")]
    Encrypt {
        /// Directory to encrypt
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        /// Path of the archive to create
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Replace OUTPUT if it already exists
        #[arg(short, long)]
        force: bool,
    },

    /// List the files in an archive (no password needed)
    #[command(alias = "ls")]
    List {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    /// Decrypt selected files from an archive
    #[command(alias = "d")]
    Decrypt {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Directory the decrypted files are written under
        #[arg(short, long, value_name = "DIR", default_value = ".")]
        output_dir: PathBuf,

        /// Relative path of a file to decrypt (repeatable)
        #[arg(short, long = "select", value_name = "PATH")]
        select: Vec<String>,

        /// Decrypt every file in the archive
        #[arg(long, conflicts_with = "select")]
        all: bool,

        /// Leave decrypted files in place instead of removing them on exit
        #[arg(long)]
        keep: bool,
    },

    /// Mirror a directory into another, copying only changed files
    #[command(alias = "b")]
    Backup {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        destination: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Encrypt {
            source,
            output,
            force,
        } => encrypt(&source, &output, force, cli.passphrase_stdin),
        Commands::List { archive } => list(&archive),
        Commands::Decrypt {
            archive,
            output_dir,
            select,
            all,
            keep,
        } => decrypt(
            &archive,
            &output_dir,
            select,
            all,
            keep,
            cli.passphrase_stdin,
        ),
        Commands::Backup {
            source,
            destination,
        } => backup(&source, &destination),
    };

    match result {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", error_chain(&e));
            process::exit(1);
        }
    }
}

fn init_tracing(level: &str) {
    let default_level = level.parse().unwrap_or(tracing::Level::WARN);
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    let stderr_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .with_filter(env_filter);
    tracing_subscriber::registry().with(stderr_layer).init();
}

fn get_passphrase_reader(use_stdin: bool, confirm: bool) -> Box<dyn PassphraseReader> {
    if use_stdin {
        Box::new(ReaderPassphraseReader::new(Box::new(io::stdin())))
    } else if confirm {
        Box::new(ConfirmingPassphraseReader::new(TerminalPassphraseReader))
    } else {
        Box::new(TerminalPassphraseReader)
    }
}

fn encrypt(source: &Path, output: &Path, force: bool, passphrase_stdin: bool) -> Result<i32> {
    let mut reader = get_passphrase_reader(passphrase_stdin, true);
    let key = derive_key(&reader.read_passphrase("Enter encryption password: ")?);

    let bar = bytes_bar(0, "encrypting");
    let built = ArchiveWriter::new(key)
        .overwrite(force)
        .build(source, output, &bar);
    bar.finish_and_clear();
    let summary = built?;

    println!(
        "Encrypted {} files ({}) into {}",
        summary.files,
        format_size(summary.total_bytes),
        output.display()
    );
    Ok(0)
}

fn list(archive: &Path) -> Result<i32> {
    let mut reader = ArchiveReader::open(archive)?;
    let listing = reader.list()?;
    warn_if_fallback(listing.source);

    if listing.entries.is_empty() {
        println!("No encrypted files found in archive");
        return Ok(0);
    }
    for entry in &listing.entries {
        println!(
            "{} ({})",
            entry.relative_path,
            format_size(entry.original_size)
        );
    }
    Ok(0)
}

fn decrypt(
    archive: &Path,
    output_dir: &Path,
    select: Vec<String>,
    all: bool,
    keep: bool,
    passphrase_stdin: bool,
) -> Result<i32> {
    // Stdin is consumed by the password, so nothing is left to choose from.
    if passphrase_stdin && select.is_empty() && !all {
        return Err(ArchiveError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidSelection,
            "--passphrase-stdin requires --select or --all",
        ));
    }

    let mut reader = ArchiveReader::open(archive)?;
    let listing = reader.list()?;
    warn_if_fallback(listing.source);
    if listing.entries.is_empty() {
        println!("No encrypted files found in archive");
        return Ok(0);
    }

    let selected: HashSet<String> = if all {
        listing
            .entries
            .iter()
            .map(|e| e.relative_path.clone())
            .collect()
    } else if !select.is_empty() {
        for path in &select {
            if !listing.entries.iter().any(|e| &e.relative_path == path) {
                eprintln!("Warning: {} is not in the archive", path);
            }
        }
        select.into_iter().collect()
    } else {
        prompt_selection(&listing.entries)?
    };
    if selected.is_empty() {
        println!("No files selected");
        return Ok(0);
    }

    let mut passphrases = get_passphrase_reader(passphrase_stdin, false);
    let key = derive_key(&passphrases.read_passphrase("Enter decryption password: ")?);

    // Not installed until prompting is done, so Ctrl+C at a prompt still
    // terminates the process.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).map_err(|e| {
            ArchiveError::with_source(
                ErrorCategory::Internal,
                "failed to install Ctrl+C handler",
                e,
            )
        })?;
    }

    let mut registry = CleanupRegistry::new();
    let bar = bytes_bar(0, "decrypting");
    let report = SelectiveDecryptor::new(&key, output_dir)
        .progress(&bar)
        .cancel(&cancel)
        .decrypt(&mut reader, &listing.entries, &selected, &mut registry);
    bar.finish_and_clear();

    print_report(&report);
    let mut code = if report.cancelled {
        EXIT_CANCELLED
    } else if report.failures.is_empty() {
        0
    } else {
        1
    };

    if keep || registry.is_empty() {
        return Ok(code);
    }

    if !report.cancelled {
        println!("\nTracking decrypted files:");
        for path in registry.paths() {
            println!("  {}", path.display());
        }
        println!("\nPress Ctrl+C to remove them and exit");
        cancel.wait();
    }

    println!("\nCleaning up decrypted files...");
    let purge = registry.purge_all();
    for path in &purge.removed {
        println!("Removed: {}", path.display());
    }
    for (path, e) in &purge.failed {
        eprintln!("Failed to remove {}: {}", path.display(), e);
    }
    if !purge.failed.is_empty() && code == 0 {
        code = 1;
    }
    Ok(code)
}

fn prompt_selection(entries: &[IndexEntry]) -> Result<HashSet<String>> {
    println!("Files in archive:");
    for (i, entry) in entries.iter().enumerate() {
        println!(
            "{:>4}) {} ({})",
            i + 1,
            entry.relative_path,
            format_size(entry.original_size)
        );
    }
    print!("Select files to decrypt (e.g. 1,3,5-7 or all): ");
    io::stdout().flush().map_err(console_error)?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).map_err(console_error)?;
    let chosen = parse_selection(&line, entries.len())?;
    Ok(chosen
        .into_iter()
        .map(|i| entries[i].relative_path.clone())
        .collect())
}

fn print_report(report: &DecryptReport) {
    for path in &report.decrypted {
        println!("Decrypted: {}", path.display());
    }
    for failure in &report.failures {
        eprintln!(
            "Failed to decrypt {}: {}",
            failure.relative_path,
            error_chain(&failure.error)
        );
        if let Some(partial) = &failure.partial_output {
            eprintln!("  partial output left at {}", partial.display());
        }
    }
    if report.cancelled {
        eprintln!(
            "Cancelled; {} selected files were not decrypted",
            report.skipped.len()
        );
    }
}

fn backup(source: &Path, destination: &Path) -> Result<i32> {
    let bar = count_bar(count_files(source), "backing up");
    let synced = sync_tree(source, destination, &bar);
    bar.finish_and_clear();
    let summary = synced?;

    println!(
        "Backup complete: {} copied, {} unchanged, {} removed",
        summary.copied, summary.unchanged, summary.removed
    );
    Ok(0)
}

fn warn_if_fallback(source: IndexSource) {
    if source == IndexSource::Fallback {
        eprintln!("Warning: archive index unavailable; sizes shown are approximate");
    }
}

fn console_error(e: io::Error) -> ArchiveError {
    ArchiveError::with_kind_and_source(
        ErrorCategory::Internal,
        ErrorKind::Io,
        "failed to read selection",
        e,
    )
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
