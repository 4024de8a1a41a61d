//! Library-level archive properties: round-trips, index fidelity, fallback
//! listing and partial failures.

use encpack::error::ErrorKind;
use encpack::index::{ArchiveIndex, IndexEntry, container_name};
use encpack::{
    ArchiveReader, ArchiveWriter, CleanupRegistry, IndexSource, NoProgress, decrypt_selected,
    derive_key, list_fallback, list_fast,
};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const PASSWORD: &[u8] = b"correct horse battery staple";

fn write(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// Deterministic, non-repeating-looking test data.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 256) as u8).collect()
}

fn build(source: &Path, archive: &Path) {
    ArchiveWriter::new(derive_key(PASSWORD))
        .build(source, archive, &NoProgress)
        .unwrap();
}

fn all_paths(entries: &[IndexEntry]) -> HashSet<String> {
    entries.iter().map(|e| e.relative_path.clone()).collect()
}

/// Copy `archive` to `out`, leaving out entries for which `drop` is true.
fn rewrite_without(archive: &Path, out: &Path, drop: impl Fn(&str) -> bool) {
    let mut src = ZipArchive::new(File::open(archive).unwrap()).unwrap();
    let mut dst = ZipWriter::new(File::create(out).unwrap());
    for i in 0..src.len() {
        let entry = src.by_index_raw(i).unwrap();
        if drop(entry.name()) {
            continue;
        }
        dst.raw_copy_file(entry).unwrap();
    }
    dst.finish().unwrap();
}

fn decrypt_all(archive: &Path, entries: &[IndexEntry], out: &Path) -> encpack::DecryptReport {
    let mut registry = CleanupRegistry::new();
    decrypt_selected(
        archive,
        entries,
        &all_paths(entries),
        &derive_key(PASSWORD),
        &NoProgress,
        out,
        &mut registry,
    )
    .unwrap()
}

#[test]
fn test_roundtrip_across_sizes() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    let sizes = [0usize, 1, 15, 16, 17, 4096, 65_536, 200_001];
    for size in sizes {
        write(&source, &format!("sizes/{size}.bin"), &pattern(size));
    }
    let archive = dir.path().join("sizes.zip");
    build(&source, &archive);

    let entries = list_fast(&archive).unwrap();
    assert_eq!(entries.len(), sizes.len());
    let out = dir.path().join("out");
    let report = decrypt_all(&archive, &entries, &out);
    assert!(report.is_success(), "{:?}", report.failures);

    for size in sizes {
        let relative = format!("sizes/{size}.bin");
        assert_eq!(fs::read(out.join(&relative)).unwrap(), pattern(size), "{relative}");
    }
}

#[test]
fn test_index_matches_source_tree() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "b/two.txt", b"22");
    write(&source, "a.txt", b"1");
    write(&source, "b/c/three.txt", b"333");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);

    let entries = list_fast(&archive).unwrap();
    let paths: Vec<&str> = entries.iter().map(|e| e.relative_path.as_str()).collect();
    assert_eq!(paths, ["a.txt", "b/c/three.txt", "b/two.txt"]);
    for entry in &entries {
        let meta = fs::metadata(source.join(&entry.relative_path)).unwrap();
        assert_eq!(entry.original_size, meta.len());
        assert_eq!(entry.container_name, container_name(&entry.relative_path));

        let modified = chrono::DateTime::<chrono::Utc>::from(meta.modified().unwrap());
        let recorded = entry.modified_at.unwrap();
        assert!((recorded - modified).num_seconds().abs() <= 1);
    }
}

#[test]
fn test_fallback_listing_after_index_removed() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "a.txt", b"hi");
    write(&source, "sub/b.txt", b"world");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);
    let stripped = dir.path().join("stripped.zip");
    rewrite_without(&archive, &stripped, |name| name == "index.json");

    let err = list_fast(&stripped).unwrap_err();
    assert!(err.is(ErrorKind::NoIndex));

    let mut reader = ArchiveReader::open(&stripped).unwrap();
    let listing = reader.list().unwrap();
    assert_eq!(listing.source, IndexSource::Fallback);
    assert_eq!(all_paths(&listing.entries), all_paths(&list_fast(&archive).unwrap()));
    for entry in &listing.entries {
        assert!(entry.modified_at.is_none());
    }
    // Stored payload size, IV included.
    let a = listing.entries.iter().find(|e| e.relative_path == "a.txt").unwrap();
    assert_eq!(a.original_size, 2 + 16);

    // The reconstructed listing is enough to decrypt.
    let out = dir.path().join("out");
    let report = decrypt_all(&stripped, &listing.entries, &out);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(fs::read(out.join("sub/b.txt")).unwrap(), b"world");
}

#[test]
fn test_fallback_ignores_non_enc_entries() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("foreign.zip");
    let mut zip = ZipWriter::new(File::create(&archive).unwrap());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("readme.md", options).unwrap();
    zip.write_all(b"not encrypted").unwrap();
    zip.start_file(".enc", options).unwrap();
    zip.write_all(b"no name").unwrap();
    zip.finish().unwrap();

    assert!(list_fallback(&archive).unwrap().is_empty());
}

#[test]
fn test_selection_isolation() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "keep/one.txt", b"one");
    write(&source, "keep/two.txt", b"two");
    write(&source, "skip/three.txt", b"three");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);

    let entries = list_fast(&archive).unwrap();
    let selected: HashSet<String> = ["keep/two.txt".to_string()].into();
    let out = dir.path().join("out");
    let mut registry = CleanupRegistry::new();
    let report = decrypt_selected(
        &archive,
        &entries,
        &selected,
        &derive_key(PASSWORD),
        &NoProgress,
        &out,
        &mut registry,
    )
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.decrypted.len(), 1);
    assert_eq!(registry.len(), 1);
    assert_eq!(fs::read(out.join("keep/two.txt")).unwrap(), b"two");
    assert!(!out.join("keep/one.txt").exists());
    assert!(!out.join("skip").exists());
}

#[test]
fn test_missing_entry_fails_alone() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "a.txt", b"hi");
    write(&source, "sub/b.txt", b"world");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);
    let damaged = dir.path().join("damaged.zip");
    rewrite_without(&archive, &damaged, |name| name == "a.txt.enc");

    let entries = list_fast(&damaged).unwrap();
    assert_eq!(entries.len(), 2);
    let out = dir.path().join("out");
    let report = decrypt_all(&damaged, &entries, &out);

    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.relative_path, "a.txt");
    assert!(failure.error.is(ErrorKind::EntryNotFound));
    assert!(failure.partial_output.is_none());
    assert!(!out.join("a.txt").exists());
    assert_eq!(fs::read(out.join("sub/b.txt")).unwrap(), b"world");
}

#[test]
fn test_truncated_payload_creates_no_output() {
    let dir = TempDir::new().unwrap();
    let archive = dir.path().join("short.zip");
    let entry = IndexEntry::new("x.txt", 5, None);
    let mut zip = ZipWriter::new(File::create(&archive).unwrap());
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("index.json", options).unwrap();
    ArchiveIndex::new(vec![entry.clone()]).write_to(&mut zip).unwrap();
    zip.start_file(entry.container_name.as_str(), options).unwrap();
    zip.write_all(b"short").unwrap();
    zip.finish().unwrap();

    let out = dir.path().join("out");
    let report = decrypt_all(&archive, &[entry], &out);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].error.is(ErrorKind::TruncatedInput));
    assert!(!out.join("x.txt").exists());
}

#[test]
fn test_wrong_password_produces_same_length_garbage() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "secret.txt", b"attack at dawn");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);

    let entries = list_fast(&archive).unwrap();
    let out = dir.path().join("out");
    let mut registry = CleanupRegistry::new();
    let report = decrypt_selected(
        &archive,
        &entries,
        &all_paths(&entries),
        &derive_key(b"wrong"),
        &NoProgress,
        &out,
        &mut registry,
    )
    .unwrap();

    assert!(report.is_success());
    let garbage = fs::read(out.join("secret.txt")).unwrap();
    assert_eq!(garbage.len(), 14);
    assert_ne!(garbage, b"attack at dawn");
}

#[test]
fn test_cleanup_purges_decrypted_outputs() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "a.txt", b"hi");
    write(&source, "sub/b.txt", b"world");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);

    let entries = list_fast(&archive).unwrap();
    let out = dir.path().join("out");
    let mut registry = CleanupRegistry::new();
    decrypt_selected(
        &archive,
        &entries,
        &all_paths(&entries),
        &derive_key(PASSWORD),
        &NoProgress,
        &out,
        &mut registry,
    )
    .unwrap();
    let tracked: Vec<PathBuf> = registry.paths().to_vec();
    assert_eq!(tracked.len(), 2);
    assert!(tracked.iter().all(|p| p.is_absolute() && p.exists()));

    let purge = registry.purge_all();
    assert_eq!(purge.removed.len(), 2);
    assert!(purge.failed.is_empty());
    assert!(tracked.iter().all(|p| !p.exists()));
    assert!(registry.is_empty());
}

/// Two files, one nested, listed and decrypted end to end.
#[test]
fn test_two_file_example() {
    let dir = TempDir::new().unwrap();
    let source = dir.path().join("src");
    write(&source, "a.txt", b"hi");
    write(&source, "sub/b.txt", b"world");
    let archive = dir.path().join("out.zip");
    build(&source, &archive);

    let mut zip = ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let names: Vec<String> = (0..zip.len())
        .map(|i| zip.by_index_raw(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["index.json", "a.txt.enc", "sub/b.txt.enc"]);
    assert_eq!(zip.by_name("a.txt.enc").unwrap().size(), 18);
    assert_eq!(zip.by_name("sub/b.txt.enc").unwrap().size(), 21);

    let index = ArchiveIndex::read_from(zip.by_name("index.json").unwrap()).unwrap();
    assert_eq!(index.format_version, "1.0");
    assert_eq!(index.total_size(), 7);

    let out = dir.path().join("out");
    let report = decrypt_all(&archive, &index.entries, &out);
    assert!(report.is_success());
    assert_eq!(fs::read(out.join("a.txt")).unwrap(), b"hi");
    assert_eq!(fs::read(out.join("sub/b.txt")).unwrap(), b"world");
}
