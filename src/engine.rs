// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-file decision procedure: fingerprint, consult the index, verify
//! the candidate, then link or copy.
//!
//! A fingerprint hit is never trusted on its own. Before any hard link is
//! created the candidate must exist, carry the same linkable attributes,
//! and compare byte-for-byte equal to the source. The byte comparison is
//! the authority; everything before it is a fast path.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::errors::VaultError;
use crate::fingerprint::{fingerprint_reader, Fingerprint};
use crate::fsutil::{self, FileAttrs};
use crate::index::HashIndex;
use crate::source::{PathResolver, SnapshotSource};

/// Why a file was copied instead of linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyReason {
    Directory,
    ReadOnly,
    NewHash,
    AttributeMismatch,
    BinaryMismatch,
}

impl CopyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::ReadOnly => "readonly",
            Self::NewHash => "new-hash",
            Self::AttributeMismatch => "hash-equal-attribute-mismatch",
            Self::BinaryMismatch => "hash-equal-binary-mismatch",
        }
    }
}

/// Why a file produced no action at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The path could not be brought under the platform length limit.
    PathLength,
    /// Read-only files are never indexed or linked.
    ReadOnly,
    /// The file already shares its inode with the canonical instance.
    AlreadyLinked,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PathLength => "path-length",
            Self::ReadOnly => "readonly",
            Self::AlreadyLinked => "already-linked",
        }
    }
}

/// The single outcome the engine produces per source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Linked { candidate: PathBuf, bytes: u64 },
    Copied { reason: CopyReason, bytes: u64 },
    Skipped { reason: SkipReason },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linked { candidate, .. } => write!(f, "linked -> {}", candidate.display()),
            Self::Copied { reason, .. } => write!(f, "copied ({})", reason.as_str()),
            Self::Skipped { reason } => write!(f, "skipped ({})", reason.as_str()),
        }
    }
}

/// Retry budget for the delete-and-relink pair in in-place mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 10,
            delay: Duration::from_millis(200),
        }
    }
}

/// The decision engine. Borrows the run's index and collaborators; the
/// orchestrator applies no filesystem policy of its own beyond calling in
/// here once per source file.
pub struct DecisionEngine<'a> {
    index: &'a mut HashIndex,
    provider: &'a dyn SnapshotSource,
    resolver: &'a mut dyn PathResolver,
}

impl<'a> DecisionEngine<'a> {
    pub fn new(
        index: &'a mut HashIndex,
        provider: &'a dyn SnapshotSource,
        resolver: &'a mut dyn PathResolver,
    ) -> Self {
        Self {
            index,
            provider,
            resolver,
        }
    }

    /// Back up one source file to `dest` inside the snapshot tree.
    pub fn back_up(&mut self, source: &Path, dest: &Path) -> Result<Outcome> {
        let source = match self.resolver.shorten(source) {
            Ok(path) => path,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "path too long, skipping");
                return Ok(Outcome::Skipped {
                    reason: SkipReason::PathLength,
                });
            }
        };

        // Directories are reproduced, never fingerprinted or indexed.
        if source.is_dir() {
            fs::create_dir_all(dest)?;
            return Ok(Outcome::Copied {
                reason: CopyReason::Directory,
                bytes: 0,
            });
        }

        let (fp, attrs, physical) = match self.open_eligible(&source)? {
            Opened::Eligible { fp, attrs, physical } => (fp, attrs, physical),
            Opened::ReadOnly { attrs, physical } => {
                // Read-only files get a fresh copy per snapshot, never a
                // shared inode.
                let bytes = fsutil::copy_file_preserving(&physical, dest, &attrs)?;
                return Ok(Outcome::Copied {
                    reason: CopyReason::ReadOnly,
                    bytes,
                });
            }
        };

        match self.verified_candidate(fp, &attrs, &physical)? {
            Candidate::None => {
                let bytes = fsutil::copy_file_preserving(&physical, dest, &attrs)?;
                self.index.insert_current(fp, dest.to_path_buf());
                Ok(Outcome::Copied {
                    reason: CopyReason::NewHash,
                    bytes,
                })
            }
            Candidate::Mismatch(reason) => {
                let bytes = fsutil::copy_file_preserving(&physical, dest, &attrs)?;
                Ok(Outcome::Copied { reason, bytes })
            }
            Candidate::Verified(candidate) => {
                fsutil::make_hardlink(&candidate, dest)?;
                debug!(
                    source = %self.provider.translate(&physical).display(),
                    candidate = %candidate.display(),
                    "hard linked"
                );
                // The link is a file of this run too: record it so the
                // exported hashtable describes the new snapshot completely.
                self.index.insert_current(fp, dest.to_path_buf());
                Ok(Outcome::Linked {
                    candidate,
                    bytes: attrs.len,
                })
            }
        }
    }

    /// Fingerprint one file and record it as its own canonical instance.
    /// Used by index-building runs; no bytes move.
    pub fn index_file(&mut self, source: &Path) -> Result<Outcome> {
        let source = match self.resolver.shorten(source) {
            Ok(path) => path,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "path too long, skipping");
                return Ok(Outcome::Skipped {
                    reason: SkipReason::PathLength,
                });
            }
        };

        match self.open_eligible(&source)? {
            Opened::ReadOnly { .. } => Ok(Outcome::Skipped {
                reason: SkipReason::ReadOnly,
            }),
            Opened::Eligible { fp, physical, .. } => {
                let display = self.provider.translate(&physical);
                self.index.insert_current(fp, display);
                Ok(Outcome::Copied {
                    reason: CopyReason::NewHash,
                    bytes: 0,
                })
            }
        }
    }

    /// In-place deduplication: replace `source` with a hard link to the
    /// canonical instance of its content, when one exists and proves
    /// byte-identical.
    pub fn relink_in_place(&mut self, source: &Path, retry: &RetryPolicy) -> Result<Outcome> {
        let source = match self.resolver.shorten(source) {
            Ok(path) => path,
            Err(err) => {
                warn!(path = %source.display(), error = %err, "path too long, skipping");
                return Ok(Outcome::Skipped {
                    reason: SkipReason::PathLength,
                });
            }
        };

        let (fp, attrs, physical) = match self.open_eligible(&source)? {
            Opened::ReadOnly { .. } => {
                return Ok(Outcome::Skipped {
                    reason: SkipReason::ReadOnly,
                })
            }
            Opened::Eligible { fp, attrs, physical } => (fp, attrs, physical),
        };

        match self.verified_candidate(fp, &attrs, &physical)? {
            Candidate::None => {
                self.index.insert_current(fp, physical);
                Ok(Outcome::Copied {
                    reason: CopyReason::NewHash,
                    bytes: 0,
                })
            }
            Candidate::Mismatch(reason) => Ok(Outcome::Copied { reason, bytes: 0 }),
            Candidate::Verified(candidate) => {
                if fsutil::same_inode(&candidate, &physical)? {
                    self.index.insert_current(fp, candidate);
                    return Ok(Outcome::Skipped {
                        reason: SkipReason::AlreadyLinked,
                    });
                }
                replace_with_link(&physical, &candidate, retry)?;
                self.index.insert_current(fp, candidate.clone());
                Ok(Outcome::Linked {
                    candidate,
                    bytes: attrs.len,
                })
            }
        }
    }

    /// Open a source through the provider, apply the eligibility predicate,
    /// and fingerprint it. The content handle is closed before returning.
    fn open_eligible(&mut self, source: &Path) -> Result<Opened> {
        let mut handle = self.provider.open(source)?;
        if handle.attrs.readonly {
            return Ok(Opened::ReadOnly {
                attrs: handle.attrs,
                physical: handle.physical_path,
            });
        }
        let fp = fingerprint_reader(&mut handle.reader, &handle.attrs)?;
        Ok(Opened::Eligible {
            fp,
            attrs: handle.attrs,
            physical: handle.physical_path,
        })
    }

    /// Steps 4-7 of the decision procedure: index lookup, existence check,
    /// attribute re-check, byte-for-byte re-check.
    fn verified_candidate(
        &mut self,
        fp: Fingerprint,
        attrs: &FileAttrs,
        physical: &Path,
    ) -> Result<Candidate> {
        let candidate = match self.index.lookup(&fp) {
            None => return Ok(Candidate::None),
            Some(path) => path.to_path_buf(),
        };

        if !candidate.is_file() {
            warn!(
                fingerprint = %fp,
                candidate = %candidate.display(),
                "hash refers to nonexisting file"
            );
            return Ok(Candidate::None);
        }

        let candidate_attrs = FileAttrs::probe(&candidate)?;
        if !candidate_attrs.matches_linkable(attrs) {
            warn!(
                source = %self.provider.translate(physical).display(),
                candidate = %candidate.display(),
                "fingerprint match with diverging attributes"
            );
            return Ok(Candidate::Mismatch(CopyReason::AttributeMismatch));
        }

        if !fsutil::byte_equal(physical, &candidate)? {
            warn!(
                source = %self.provider.translate(physical).display(),
                candidate = %candidate.display(),
                "fingerprint match with diverging content"
            );
            return Ok(Candidate::Mismatch(CopyReason::BinaryMismatch));
        }

        Ok(Candidate::Verified(candidate))
    }
}

enum Opened {
    Eligible {
        fp: Fingerprint,
        attrs: FileAttrs,
        physical: PathBuf,
    },
    ReadOnly {
        attrs: FileAttrs,
        physical: PathBuf,
    },
}

enum Candidate {
    None,
    Mismatch(CopyReason),
    Verified(PathBuf),
}

/// Delete `source` and hard-link the candidate into its place. Filesystem
/// handle races are common here, so both halves run under the retry budget;
/// exhausting it is fatal for the run.
fn replace_with_link(source: &Path, candidate: &Path, retry: &RetryPolicy) -> Result<()> {
    retry_io(retry, &format!("remove {}", source.display()), || {
        fs::remove_file(source)
    })?;
    retry_io(
        retry,
        &format!(
            "hard link {} -> {}",
            source.display(),
            candidate.display()
        ),
        || fs::hard_link(candidate, source),
    )?;
    Ok(())
}

fn retry_io<T>(
    policy: &RetryPolicy,
    operation: &str,
    mut op: impl FnMut() -> std::io::Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.retries => {
                attempt += 1;
                warn!(operation, attempt, error = %err, "transient filesystem failure, retrying");
                thread::sleep(policy.delay);
            }
            Err(err) => {
                return Err(VaultError::RetryExhausted {
                    operation: operation.to_string(),
                    attempts: attempt + 1,
                    source: err,
                }
                .into())
            }
        }
    }
}
