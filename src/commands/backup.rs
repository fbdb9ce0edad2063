// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backup mode: compose the source stream, run the decision engine per
//! file into today's snapshot directory, export the run's hashtable.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use indicatif::ProgressBar;
use tracing::{error, info, trace};

use crate::commands::{interrupt_flag, make_index};
use crate::engine::DecisionEngine;
use crate::errors::VaultError;
use crate::index::{HashIndex, MergeReport, SIDECAR_FILE_NAME};
use crate::patterns::{parse_pattern_file, PatternSet};
use crate::report::RunStats;
use crate::source::{self, IdentityResolver, PathResolver};

pub struct BackupRequest {
    pub source: PathBuf,
    pub backup_root: PathBuf,
    pub exclusion_file: Option<PathBuf>,
    pub delete_existing: bool,
    pub not_shadowed: bool,
    pub link_to_directory: Option<PathBuf>,
    pub link_to_hashtables: Vec<PathBuf>,
}

pub fn run(request: BackupRequest) -> Result<RunStats> {
    fs::create_dir_all(&request.backup_root).with_context(|| {
        format!("create backup root {}", request.backup_root.display())
    })?;
    let backup_root = fs::canonicalize(&request.backup_root)?;

    let snapshot_dir = backup_root.join(today());
    if snapshot_dir.exists() {
        if request.delete_existing {
            info!(snapshot = %snapshot_dir.display(), "removing existing snapshot");
            fs::remove_dir_all(&snapshot_dir).with_context(|| {
                format!("remove existing snapshot {}", snapshot_dir.display())
            })?;
        } else {
            return Err(VaultError::SnapshotExists(snapshot_dir).into());
        }
    }

    let includes = inclusion_patterns(&request.source)?;
    let excludes = match &request.exclusion_file {
        Some(file) => PatternSet::compile(&parse_pattern_file(file)?)?,
        None => PatternSet::empty(),
    };

    let mut index = HashIndex::default();
    let mut merge_report = MergeReport::default();
    if let Some(link_dir) = &request.link_to_directory {
        make_index::run(make_index::MakeIndexRequest {
            directory: link_dir.clone(),
            not_shadowed: request.not_shadowed,
        })?;
        index.merge_from(link_dir, SIDECAR_FILE_NAME, false)?;
    }
    index.merge_from(&backup_root, SIDECAR_FILE_NAME, false)?;
    for sidecar in &request.link_to_hashtables {
        index.merge_sidecar(sidecar, true, &mut merge_report)?;
    }

    let files = source::compose_stream(&includes, &excludes)?;
    info!(files = files.len(), index = index.len(), "starting backup");

    fs::create_dir_all(&snapshot_dir)
        .with_context(|| format!("create snapshot {}", snapshot_dir.display()))?;

    let cancelled = interrupt_flag();
    let mut provider = source::provider(request.not_shadowed);
    let mut resolver = IdentityResolver;
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
            match snapshot_path_for(&snapshot_dir, file)
                .and_then(|dest| engine.back_up(file, &dest))
            {
                Ok(outcome) => {
                    trace!(file = %file.display(), %outcome, "processed");
                    stats.record(&outcome);
                }
                Err(err) => {
                    error!(file = %file.display(), error = %format!("{err:#}"), "backup failed");
                    stats.record_failure();
                }
            }
            progress.inc(1);
        }
    }
    progress.finish_and_clear();

    if !interrupted {
        index
            .export(&snapshot_dir, SIDECAR_FILE_NAME)
            .context("export hashtable")?;
    }
    resolver.release_all()?;
    provider.release()?;

    stats.print_summary("backup");
    if interrupted {
        bail!("backup interrupted before completion");
    }
    Ok(stats)
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Backup sources: a directory means everything beneath it, a file is a
/// line-oriented inclusion-pattern list.
fn inclusion_patterns(source: &Path) -> Result<Vec<String>> {
    if source.is_dir() {
        let canonical = fs::canonicalize(source)?;
        Ok(vec![format!(
            "{}{}*",
            canonical.display(),
            std::path::MAIN_SEPARATOR
        )])
    } else if source.is_file() {
        parse_pattern_file(source)
    } else {
        bail!(
            "source {} is neither a pattern file nor a directory",
            source.display()
        );
    }
}

/// Re-root a source path under the snapshot directory. Root components
/// drop away; a drive prefix contributes its letter as one component so
/// sources from different drives cannot collide.
pub(crate) fn snapshot_path_for(snapshot_dir: &Path, source: &Path) -> Result<PathBuf> {
    let mut dest = snapshot_dir.to_path_buf();
    for component in source.components() {
        match component {
            Component::RootDir | Component::CurDir => {}
            Component::Prefix(prefix) => dest.push(prefix_token(prefix)),
            Component::ParentDir => {
                bail!("source path {} escapes its root", source.display())
            }
            Component::Normal(part) => dest.push(part),
        }
    }
    Ok(dest)
}

fn prefix_token(prefix: std::path::PrefixComponent<'_>) -> PathBuf {
    use std::path::Prefix;
    match prefix.kind() {
        Prefix::Disk(letter) | Prefix::VerbatimDisk(letter) => {
            PathBuf::from((letter as char).to_string())
        }
        Prefix::UNC(server, share) | Prefix::VerbatimUNC(server, share) => {
            let mut token = PathBuf::from(server);
            token.push(share);
            token
        }
        Prefix::DeviceNS(device) => PathBuf::from(device),
        Prefix::Verbatim(part) => PathBuf::from(part),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_paths_reroot_under_the_snapshot_directory() {
        let dest =
            snapshot_path_for(Path::new("/repo/2026-08-01"), Path::new("/home/u/f.txt"))
                .unwrap();
        assert_eq!(dest, PathBuf::from("/repo/2026-08-01/home/u/f.txt"));
    }

    #[test]
    fn relative_sources_reroot_without_escaping() {
        let dest = snapshot_path_for(Path::new("/repo/day"), Path::new("sub/f.txt")).unwrap();
        assert_eq!(dest, PathBuf::from("/repo/day/sub/f.txt"));
        assert!(snapshot_path_for(Path::new("/repo/day"), Path::new("../f.txt")).is_err());
    }
}
