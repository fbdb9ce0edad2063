// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fingerprint index: an in-memory fingerprint-to-path map merged from
//! hashtable sidecars across a repository, updated during a run, and
//! exported as the run's own sidecar.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use globset::GlobBuilder;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::fingerprint::Fingerprint;
use crate::fsutil::atomic_write_bytes;

/// Well-known file name of the hashtable sidecar written next to each
/// snapshot or indexed directory.
pub const SIDECAR_FILE_NAME: &str = "linkvault-hashtable.json";

/// In-memory fingerprint index.
///
/// `entries` holds everything known to the run: merged sidecar imports plus
/// files placed during the run itself. `current` holds only this-run
/// insertions and is what `export` writes out.
#[derive(Debug, Default)]
pub struct HashIndex {
    entries: HashMap<Fingerprint, PathBuf>,
    current: BTreeMap<Fingerprint, PathBuf>,
}

/// Counters accumulated while merging sidecars.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Sidecar files successfully read.
    pub sidecars: usize,
    /// Entries inserted into the index.
    pub imported: usize,
    /// Entries skipped because an earlier sidecar already supplied the key.
    pub duplicate_keys: usize,
    /// Entries dropped in rigorous mode because the referenced file is gone.
    pub missing_refs: usize,
}

impl HashIndex {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn lookup(&self, fp: &Fingerprint) -> Option<&Path> {
        self.entries.get(fp).map(PathBuf::as_path)
    }

    /// Record a file placed during this run.
    ///
    /// The full map always takes the new path, so later files in the same
    /// run link against the fresh copy even when an imported entry for the
    /// key had gone stale. The this-run map keeps its first value.
    pub fn insert_current(&mut self, fp: Fingerprint, absolute: PathBuf) {
        self.entries.insert(fp, absolute.clone());
        self.current.entry(fp).or_insert(absolute);
    }

    /// Locate every sidecar named `sidecar_name` under `root` (lexicographic
    /// depth-first) and import their entries. First write wins: a key already
    /// present in the index is never overwritten.
    ///
    /// In rigorous mode every resolved reference is stat-checked and missing
    /// ones are dropped with a warning; otherwise entries import unchecked.
    pub fn merge_from(
        &mut self,
        root: &Path,
        sidecar_name: &str,
        rigorous: bool,
    ) -> Result<MergeReport> {
        let mut report = MergeReport::default();
        for sidecar in find_sidecars(root, sidecar_name)? {
            self.merge_sidecar(&sidecar, rigorous, &mut report)?;
        }
        debug!(
            root = %root.display(),
            sidecars = report.sidecars,
            imported = report.imported,
            "merged hashtables"
        );
        Ok(report)
    }

    /// Import a single sidecar file. See [`HashIndex::merge_from`].
    pub fn merge_sidecar(
        &mut self,
        sidecar: &Path,
        rigorous: bool,
        report: &mut MergeReport,
    ) -> Result<()> {
        let entries = match load_sidecar(sidecar) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(sidecar = %sidecar.display(), error = %err, "unreadable hashtable, skipping");
                return Ok(());
            }
        };

        let mut dropped = 0usize;
        for (fp, resolved) in entries {
            if self.entries.contains_key(&fp) {
                report.duplicate_keys += 1;
                continue;
            }
            if rigorous && !resolved.is_file() {
                warn!(
                    fingerprint = %fp,
                    path = %resolved.display(),
                    "hash refers to nonexisting file"
                );
                dropped += 1;
                continue;
            }
            self.entries.insert(fp, resolved);
            report.imported += 1;
        }

        if dropped > 0 {
            warn!(
                sidecar = %sidecar.display(),
                dropped,
                "dropped hashtable entries whose files are missing"
            );
            report.missing_refs += dropped;
        }
        report.sidecars += 1;
        Ok(())
    }

    /// Write the this-run entries to `{sidecar_dir}/{sidecar_name}`, with
    /// every path made relative to `sidecar_dir`. An entry outside the
    /// sidecar directory (a link into an imported foreign hashtable) is not
    /// exportable and is dropped with a warning.
    pub fn export(&self, sidecar_dir: &Path, sidecar_name: &str) -> Result<PathBuf> {
        let mut table = BTreeMap::new();
        for (fp, absolute) in &self.current {
            match to_stored_value(sidecar_dir, absolute) {
                Ok(value) => {
                    table.insert(fp.to_string(), value);
                }
                Err(_) => warn!(
                    fingerprint = %fp,
                    path = %absolute.display(),
                    "entry outside the hashtable directory, not exported"
                ),
            }
        }
        let path = sidecar_dir.join(sidecar_name);
        let content =
            serde_json::to_string_pretty(&table).context("serialize hashtable")?;
        atomic_write_bytes(&path, content.as_bytes())
            .with_context(|| format!("write hashtable {}", path.display()))?;
        debug!(path = %path.display(), entries = table.len(), "exported hashtable");
        Ok(path)
    }
}

/// Load a sidecar and resolve its values against the sidecar's directory.
/// Entries come back in fingerprint order.
pub fn load_sidecar(sidecar: &Path) -> Result<Vec<(Fingerprint, PathBuf)>> {
    let parent = sidecar
        .parent()
        .ok_or_else(|| anyhow!("hashtable {} has no parent directory", sidecar.display()))?;
    let content = fs::read_to_string(sidecar)
        .with_context(|| format!("read hashtable {}", sidecar.display()))?;
    let table: BTreeMap<Fingerprint, String> = serde_json::from_str(&content)
        .with_context(|| format!("parse hashtable {}", sidecar.display()))?;
    Ok(table
        .into_iter()
        .map(|(fp, value)| (fp, resolve_stored_value(parent, &value)))
        .collect())
}

/// Locate sidecar files under `root` in lexicographic depth-first order.
/// `sidecar_name` is matched exactly, or as a glob when it contains
/// wildcards.
pub fn find_sidecars(root: &Path, sidecar_name: &str) -> Result<Vec<PathBuf>> {
    let matcher = if sidecar_name.contains(['*', '?']) {
        Some(
            GlobBuilder::new(sidecar_name)
                .literal_separator(false)
                .backslash_escape(false)
                .build()
                .with_context(|| format!("invalid sidecar pattern '{sidecar_name}'"))?
                .compile_matcher(),
        )
    } else {
        None
    };

    let mut sidecars = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "unreadable entry while locating hashtables");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = match &matcher {
            Some(glob) => glob.is_match(entry.file_name()),
            None => entry.file_name() == sidecar_name,
        };
        if matched {
            sidecars.push(entry.into_path());
        }
    }
    Ok(sidecars)
}

/// Stored values carry the host separator and a leading separator, and are
/// interpreted relative to the directory containing the sidecar. That keeps
/// a repository subtree movable without rewriting its hashtable.
fn to_stored_value(sidecar_dir: &Path, absolute: &Path) -> Result<String> {
    let rel = absolute.strip_prefix(sidecar_dir).with_context(|| {
        format!(
            "entry {} lies outside hashtable directory {}",
            absolute.display(),
            sidecar_dir.display()
        )
    })?;
    Ok(format!("{}{}", std::path::MAIN_SEPARATOR, rel.display()))
}

fn resolve_stored_value(sidecar_dir: &Path, value: &str) -> PathBuf {
    let trimmed = value.trim_start_matches(['/', '\\']);
    sidecar_dir.join(trimmed)
}
