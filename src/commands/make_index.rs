// SPDX-License-Identifier: MIT OR Apache-2.0

//! MakeIndex mode: fingerprint every file under a directory and write the
//! directory's hashtable at its root.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tracing::{error, info, trace};

use crate::commands::interrupt_flag;
use crate::engine::DecisionEngine;
use crate::fsutil;
use crate::index::{HashIndex, SIDECAR_FILE_NAME};
use crate::report::RunStats;
use crate::source::{self, IdentityResolver, PathResolver};

pub struct MakeIndexRequest {
    pub directory: PathBuf,
    pub not_shadowed: bool,
}

pub fn run(request: MakeIndexRequest) -> Result<RunStats> {
    let directory = fs::canonicalize(&request.directory)
        .with_context(|| format!("resolve {}", request.directory.display()))?;
    if !directory.is_dir() {
        bail!("make-index requires a directory, got {}", directory.display());
    }

    let files = indexable_files(&directory)?;
    info!(directory = %directory.display(), files = files.len(), "indexing");

    let cancelled = interrupt_flag();
    let mut provider = source::provider(request.not_shadowed);
    let mut resolver = IdentityResolver;
    let mut index = HashIndex::default();
    let mut stats = RunStats::default();
    let mut interrupted = false;

    let progress = ProgressBar::new(files.len() as u64);
    {
        let mut engine = DecisionEngine::new(&mut index, &*provider, &mut resolver);
        for file in &files {
            if cancelled.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            match engine.index_file(file) {
                Ok(outcome) => {
                    trace!(file = %file.display(), %outcome, "processed");
                    stats.record(&outcome);
                }
                Err(err) => {
                    error!(file = %file.display(), error = %format!("{err:#}"), "indexing failed");
                    stats.record_failure();
                }
            }
            progress.inc(1);
        }
    }
    progress.finish_and_clear();

    if !interrupted {
        index
            .export(&directory, SIDECAR_FILE_NAME)
            .context("export hashtable")?;
    }
    resolver.release_all()?;
    provider.release()?;

    stats.print_summary("make-index");
    if interrupted {
        bail!("make-index interrupted before completion");
    }
    Ok(stats)
}

/// Every regular file under the directory except hashtable sidecars;
/// a sidecar describes a previous run and is never itself indexed.
pub(crate) fn indexable_files(directory: &std::path::Path) -> Result<Vec<PathBuf>> {
    Ok(fsutil::list_recursive(directory)?
        .into_iter()
        .filter(|path| {
            path.file_name()
                .map(|name| name != SIDECAR_FILE_NAME)
                .unwrap_or(true)
        })
        .collect())
}
