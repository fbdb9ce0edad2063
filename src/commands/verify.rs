// SPDX-License-Identifier: MIT OR Apache-2.0

//! Verify mode: recompute the fingerprint behind every hashtable entry
//! under a directory and report divergence.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use tracing::warn;

use crate::fingerprint::fingerprint_reader;
use crate::fsutil::FileAttrs;
use crate::index::{find_sidecars, load_sidecar, SIDECAR_FILE_NAME};

pub struct VerifyRequest {
    pub directory: PathBuf,
}

/// Totals across every hashtable checked.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VerifyStats {
    pub sidecars: u64,
    pub correct: u64,
    pub divergent: u64,
    pub missing: u64,
}

impl VerifyStats {
    pub fn is_clean(&self) -> bool {
        self.divergent == 0 && self.missing == 0
    }
}

pub fn run(request: VerifyRequest) -> Result<VerifyStats> {
    let directory = std::fs::canonicalize(&request.directory)
        .with_context(|| format!("resolve {}", request.directory.display()))?;
    if !directory.is_dir() {
        bail!("verify requires a directory, got {}", directory.display());
    }

    let sidecars = find_sidecars(&directory, SIDECAR_FILE_NAME)?;
    if sidecars.is_empty() {
        println!("no hashtables found under {}", directory.display());
        return Ok(VerifyStats::default());
    }

    let mut totals = VerifyStats::default();
    for sidecar in sidecars {
        let mut correct = 0u64;
        let mut divergent = 0u64;
        let mut missing = 0u64;

        for (expected, path) in load_sidecar(&sidecar)? {
            if !path.is_file() {
                warn!(
                    fingerprint = %expected,
                    path = %path.display(),
                    "hashtable entry refers to a missing file"
                );
                missing += 1;
                continue;
            }
            match recompute(&path) {
                Ok(actual) if actual == expected => correct += 1,
                Ok(actual) => {
                    warn!(
                        path = %path.display(),
                        expected = %expected,
                        actual = %actual,
                        "fingerprint diverged"
                    );
                    divergent += 1;
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %format!("{err:#}"), "unreadable entry");
                    missing += 1;
                }
            }
        }

        let line = format!(
            "{}: {correct} correct, {divergent} divergent, {missing} missing",
            sidecar.display()
        );
        if divergent == 0 && missing == 0 {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }

        totals.sidecars += 1;
        totals.correct += correct;
        totals.divergent += divergent;
        totals.missing += missing;
    }

    if totals.is_clean() {
        println!(
            "{}",
            format!(
                "verification passed: {} entries across {} hashtables",
                totals.correct, totals.sidecars
            )
            .green()
            .bold()
        );
    } else {
        println!(
            "{}",
            format!(
                "verification failed: {} divergent, {} missing of {} entries",
                totals.divergent,
                totals.missing,
                totals.correct + totals.divergent + totals.missing
            )
            .red()
            .bold()
        );
    }

    Ok(totals)
}

fn recompute(path: &std::path::Path) -> Result<crate::fingerprint::Fingerprint> {
    let mut reader = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let attrs = FileAttrs::from_metadata(path, &reader.metadata()?)?;
    fingerprint_reader(&mut reader, &attrs)
}
