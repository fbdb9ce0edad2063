// SPDX-License-Identifier: MIT OR Apache-2.0

#![cfg(unix)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::os::unix::fs::PermissionsExt;
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

fn set_readonly(path: &Path, readonly: bool) {
    let mut perms = fs::metadata(path).expect("stat").permissions();
    let mode = perms.mode();
    perms.set_mode(if readonly { mode & !0o222 } else { mode | 0o200 });
    fs::set_permissions(path, perms).expect("chmod");
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn dest_in(snapshot: &Path, source_file: &Path) -> PathBuf {
    let canonical = fs::canonicalize(source_file).expect("canonicalize");
    snapshot.join(canonical.strip_prefix("/").expect("absolute source"))
}

fn sidecar_entries(dir: &Path) -> BTreeMap<String, String> {
    let content =
        fs::read_to_string(dir.join("linkvault-hashtable.json")).expect("read sidecar");
    serde_json::from_str(&content).expect("parse sidecar")
}

#[test]
fn make_index_writes_a_hashtable_at_the_directory_root() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join("one.txt"), b"one");
    write_file(&dir.path().join("nested/two.txt"), b"two");

    vault_cmd()
        .args([
            "make-index",
            &dir.path().display().to_string(),
            "--not-shadowed",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("make-index completed with no failures"));

    let entries = sidecar_entries(dir.path());
    assert_eq!(entries.len(), 2);
    let values: Vec<_> = entries.values().cloned().collect();
    assert!(values.contains(&"/one.txt".to_string()));
    assert!(values.contains(&"/nested/two.txt".to_string()));
}

#[test]
fn make_index_skips_readonly_files_and_its_own_sidecar() {
    let dir = TempDir::new().expect("tempdir");
    write_file(&dir.path().join("normal.txt"), b"normal");
    write_file(&dir.path().join("locked.txt"), b"locked");
    set_readonly(&dir.path().join("locked.txt"), true);

    let run = || {
        vault_cmd()
            .args([
                "make-index",
                &dir.path().display().to_string(),
                "--not-shadowed",
            ])
            .assert()
            .success();
    };

    run();
    let entries = sidecar_entries(dir.path());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries.values().next().unwrap(), "/normal.txt");

    // A second run must not index the sidecar the first run wrote.
    run();
    let entries = sidecar_entries(dir.path());
    assert_eq!(entries.len(), 1);

    set_readonly(&dir.path().join("locked.txt"), false);
}

#[test]
fn readonly_files_stay_independent_copies_across_snapshots() {
    let src = TempDir::new().expect("tempdir");
    let root = TempDir::new().expect("tempdir");
    write_file(&src.path().join("C.ro"), b"x");
    set_readonly(&src.path().join("C.ro"), true);

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
            .success()
            .stdout(predicate::str::contains("read-only copies: 1"));
    };

    run();
    let day_one = root.path().join("2000-01-01");
    fs::rename(root.path().join(today()), &day_one).expect("age snapshot");
    run();

    let old = dest_in(&day_one, &src.path().join("C.ro"));
    let new = dest_in(&root.path().join(today()), &src.path().join("C.ro"));

    let meta_old = fs::metadata(&old).expect("stat old");
    let meta_new = fs::metadata(&new).expect("stat new");
    assert!(
        meta_old.dev() != meta_new.dev() || meta_old.ino() != meta_new.ino(),
        "read-only files must not share an inode"
    );
    assert!(meta_old.permissions().readonly());
    assert!(meta_new.permissions().readonly());

    // No sidecar entry for the read-only file in either snapshot.
    assert!(sidecar_entries(&day_one).is_empty());
    assert!(sidecar_entries(&root.path().join(today())).is_empty());

    set_readonly(&src.path().join("C.ro"), false);
    set_readonly(&old, false);
    set_readonly(&new, false);
}
