// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rehardlink mode: walk a directory in place and replace byte-identical
//! files with hard links to one canonical instance.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tracing::{error, info, trace};

use crate::commands::{interrupt_flag, make_index::indexable_files};
use crate::engine::{DecisionEngine, RetryPolicy};
use crate::index::{HashIndex, MergeReport, SIDECAR_FILE_NAME};
use crate::report::RunStats;
use crate::source::{self, IdentityResolver, PathResolver};

pub struct RehardlinkRequest {
    pub directory: PathBuf,
    pub link_to_hashtables: Vec<PathBuf>,
    pub retry: RetryPolicy,
}

pub fn run(request: RehardlinkRequest) -> Result<RunStats> {
    let directory = fs::canonicalize(&request.directory)
        .with_context(|| format!("resolve {}", request.directory.display()))?;
    if !directory.is_dir() {
        bail!("rehardlink requires a directory, got {}", directory.display());
    }

    // The tree is mutated in place, so every import is rigorous: an entry
    // whose file is gone must not become a link target.
    let mut index = HashIndex::default();
    let mut merge_report = MergeReport::default();
    index.merge_from(&directory, SIDECAR_FILE_NAME, true)?;
    for sidecar in &request.link_to_hashtables {
        index.merge_sidecar(sidecar, true, &mut merge_report)?;
    }

    let files = indexable_files(&directory)?;
    info!(
        directory = %directory.display(),
        files = files.len(),
        index = index.len(),
        "relinking in place"
    );

    let cancelled = interrupt_flag();
    let mut provider = source::provider(true);
    let mut resolver = IdentityResolver;
    let mut stats = RunStats::default();
    let mut interrupted = false;
    let mut fatal = None;

    let progress = ProgressBar::new(files.len() as u64);
    {
        let mut engine = DecisionEngine::new(&mut index, &*provider, &mut resolver);
        for file in &files {
            if cancelled.load(Ordering::SeqCst) {
                interrupted = true;
                break;
            }
            match engine.relink_in_place(file, &request.retry) {
                Ok(outcome) => {
                    trace!(file = %file.display(), %outcome, "processed");
                    stats.record(&outcome);
                }
                Err(err) => {
                    // Retry exhaustion aborts the run; everything else is
                    // one failed file.
                    if err.downcast_ref::<crate::errors::VaultError>().is_some() {
                        fatal = Some(err);
                        break;
                    }
                    error!(file = %file.display(), error = %format!("{err:#}"), "relink failed");
                    stats.record_failure();
                }
            }
            progress.inc(1);
        }
    }
    progress.finish_and_clear();

    if !interrupted && fatal.is_none() {
        index
            .export(&directory, SIDECAR_FILE_NAME)
            .context("export hashtable")?;
    }
    resolver.release_all()?;
    provider.release()?;

    if let Some(err) = fatal {
        return Err(err);
    }
    stats.print_summary("rehardlink");
    if interrupted {
        bail!("rehardlink interrupted before completion");
    }
    Ok(stats)
}
