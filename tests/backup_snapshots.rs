// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn vault_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("linkvault"))
}

fn write_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent");
    }
    fs::write(path, content).expect("write file");
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Where a source file lands inside a snapshot: its absolute path
/// re-rooted under the snapshot directory.
fn dest_in(snapshot: &Path, source_file: &Path) -> PathBuf {
    let canonical = fs::canonicalize(source_file).expect("canonicalize");
    snapshot.join(canonical.strip_prefix("/").expect("absolute source"))
}

fn same_inode(a: &Path, b: &Path) -> bool {
    let meta_a = fs::metadata(a).expect("stat a");
    let meta_b = fs::metadata(b).expect("stat b");
    meta_a.dev() == meta_b.dev() && meta_a.ino() == meta_b.ino()
}

fn sidecar_entries(snapshot: &Path) -> BTreeMap<String, String> {
    let content = fs::read_to_string(snapshot.join("linkvault-hashtable.json"))
        .expect("read sidecar");
    serde_json::from_str(&content).expect("parse sidecar")
}

fn payload_1mb() -> Vec<u8> {
    (0..1_048_576usize).map(|i| (i % 251) as u8).collect()
}

#[test]
fn cold_backup_copies_everything_and_writes_the_sidecar() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("A.txt"), b"hello");
    write_file(&src.path().join("B.bin"), &payload_1mb());

    vault_cmd()
        .args([
            "backup",
            &src.path().display().to_string(),
            "--backup-root",
            &root.path().display().to_string(),
            "--not-shadowed",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("backup completed with no failures"));

    let snapshot = root.path().join(today());
    let a = dest_in(&snapshot, &src.path().join("A.txt"));
    let b = dest_in(&snapshot, &src.path().join("B.bin"));
    assert_eq!(fs::read(&a).expect("read A"), b"hello");
    assert_eq!(fs::read(&b).expect("read B"), payload_1mb());

    let entries = sidecar_entries(&snapshot);
    assert_eq!(entries.len(), 2);
    for (key, value) in &entries {
        assert_eq!(key.len(), 47, "fingerprint key shape: {key}");
        assert!(value.starts_with('/'), "relative value shape: {value}");
        assert!(
            snapshot.join(value.trim_start_matches('/')).is_file(),
            "value resolves inside the snapshot: {value}"
        );
    }
}

#[test]
fn warm_backup_links_unchanged_files_against_the_prior_snapshot() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("A.txt"), b"hello");
    write_file(&src.path().join("B.bin"), &payload_1mb());

    let backup = |expect: &str| {
        vault_cmd()
            .args([
                "backup",
                &src.path().display().to_string(),
                "--backup-root",
                &root.path().display().to_string(),
                "--not-shadowed",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(expect));
    };

    backup("backup completed with no failures");

    // Age the first snapshot to an earlier date so the second run gets a
    // fresh directory. Relative sidecar values survive the move.
    let day_one = root.path().join("2000-01-01");
    fs::rename(root.path().join(today()), &day_one).expect("age snapshot");

    backup("backup completed with no failures");

    let day_two = root.path().join(today());
    for name in ["A.txt", "B.bin"] {
        let old = dest_in(&day_one, &src.path().join(name));
        let new = dest_in(&day_two, &src.path().join(name));
        assert!(same_inode(&old, &new), "{name} should be hard linked");
    }

    let entries = sidecar_entries(&day_two);
    assert_eq!(entries.len(), 2);
    for value in entries.values() {
        assert!(
            day_two.join(value.trim_start_matches('/')).is_file(),
            "sidecar points into the new day's tree: {value}"
        );
    }
}

#[test]
fn changed_file_is_copied_while_unchanged_file_links() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("A.txt"), b"hello");
    write_file(&src.path().join("B.bin"), &payload_1mb());

    let run = || {
        vault_cmd()
            .args([
                "backup",
                &src.path().display().to_string(),
                "--backup-root",
                &root.path().display().to_string(),
                "--not-shadowed",
            ])
            .assert()
            .success();
    };

    run();
    let day_one = root.path().join("2000-01-01");
    fs::rename(root.path().join(today()), &day_one).expect("age snapshot");

    write_file(&src.path().join("A.txt"), b"hello!");
    run();

    let day_two = root.path().join(today());
    let a_old = dest_in(&day_one, &src.path().join("A.txt"));
    let a_new = dest_in(&day_two, &src.path().join("A.txt"));
    let b_old = dest_in(&day_one, &src.path().join("B.bin"));
    let b_new = dest_in(&day_two, &src.path().join("B.bin"));

    assert!(!same_inode(&a_old, &a_new), "changed file is a fresh copy");
    assert_eq!(fs::read(&a_new).expect("read A"), b"hello!");
    assert_eq!(fs::read(&a_old).expect("read old A"), b"hello");
    assert!(same_inode(&b_old, &b_new), "unchanged file is linked");
}

#[test]
fn existing_snapshot_fails_with_exit_code_one_unless_deletion_is_requested() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("A.txt"), b"hello");

    let args = |extra: &[&str]| {
        let mut all = vec![
            "backup".to_string(),
            src.path().display().to_string(),
            "--backup-root".to_string(),
            root.path().display().to_string(),
            "--not-shadowed".to_string(),
        ];
        all.extend(extra.iter().map(|s| s.to_string()));
        all
    };

    vault_cmd().args(args(&[])).assert().success();

    vault_cmd()
        .args(args(&[]))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("already exists"));

    let first = sidecar_entries(&root.path().join(today()));
    vault_cmd().args(args(&["--delete-existing"])).assert().success();
    let second = sidecar_entries(&root.path().join(today()));

    assert_eq!(first, second, "rerun with deletion reproduces the snapshot");
}

#[test]
fn pattern_files_drive_inclusion_and_exclusion() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("docs/keep.txt"), b"keep");
    write_file(&src.path().join("docs/tmp/drop.txt"), b"drop");
    write_file(&src.path().join("music/skip.mp3"), b"skip");

    let canonical = fs::canonicalize(src.path()).expect("canonicalize");
    let include_file = src.path().join("include.lst");
    write_file(
        &include_file,
        format!("{}/docs/*  # documents only\n", canonical.display()).as_bytes(),
    );
    let exclude_file = src.path().join("exclude.lst");
    write_file(
        &exclude_file,
        format!("{}/docs/tmp/* :: scratch space\n", canonical.display()).as_bytes(),
    );

    vault_cmd()
        .args([
            "backup",
            &include_file.display().to_string(),
            "--backup-root",
            &root.path().display().to_string(),
            "--exclusion-file",
            &exclude_file.display().to_string(),
            "--not-shadowed",
        ])
        .assert()
        .success();

    let snapshot = root.path().join(today());
    assert!(dest_in(&snapshot, &src.path().join("docs/keep.txt")).is_file());
    assert!(!dest_in(&snapshot, &src.path().join("docs/tmp/drop.txt")).exists());
    assert!(!dest_in(&snapshot, &src.path().join("music/skip.mp3")).exists());
}

#[test]
fn link_to_directory_provides_candidates_outside_the_repository() {
    let src = TempDir::new().expect("tempdir");
    let mirror = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");

    write_file(&src.path().join("data.bin"), b"mirrored content");
    write_file(&mirror.path().join("existing.bin"), b"mirrored content");
    // Linkability requires identical metadata, not just identical bytes.
    let mtime = filetime::FileTime::from_unix_time(1_600_000_000, 0);
    filetime::set_file_mtime(src.path().join("data.bin"), mtime).expect("set mtime");
    filetime::set_file_mtime(mirror.path().join("existing.bin"), mtime).expect("set mtime");

    vault_cmd()
        .args([
            "backup",
            &src.path().display().to_string(),
            "--backup-root",
            &root.path().display().to_string(),
            "--link-to-directory",
            &mirror.path().display().to_string(),
            "--not-shadowed",
        ])
        .assert()
        .success();

    let snapshot = root.path().join(today());
    let dest = dest_in(&snapshot, &src.path().join("data.bin"));
    let mirror_file = fs::canonicalize(mirror.path().join("existing.bin")).expect("mirror");
    assert!(same_inode(&dest, &mirror_file), "linked into the mirror directory");
}
