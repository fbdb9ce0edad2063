// SPDX-License-Identifier: MIT OR Apache-2.0

//! Source-side collaborators and stream composition.
//!
//! The engine reads sources through two narrow interfaces: a
//! [`SnapshotSource`] that hands out readable versions of files (a
//! point-in-time snapshot view or the live filesystem) and a
//! [`PathResolver`] that works around platform path-length limits. The
//! direct implementations here are identities; platform-specific providers
//! plug in behind the same traits.

use std::collections::BTreeSet;
use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::fsutil::FileAttrs;
use crate::patterns::{compile_glob, PatternSet};

/// An opened source file: a reader over its content, its attributes, and
/// the user-facing path to show in logs and to compose destinations from.
pub struct SourceHandle {
    pub reader: File,
    pub attrs: FileAttrs,
    /// The path as the user knows it (snapshot-view paths translate back).
    pub display_path: PathBuf,
    /// The path to read bytes from.
    pub physical_path: PathBuf,
}

/// Yields read-only versions of source files.
pub trait SnapshotSource {
    fn open(&self, source: &Path) -> Result<SourceHandle>;

    /// Map a physical (possibly snapshot-view) path back to the
    /// user-facing original.
    fn translate(&self, physical: &Path) -> PathBuf;

    /// Release any point-in-time views held by the provider. Called exactly
    /// once at orchestrator shutdown.
    fn release(&mut self) -> Result<()>;
}

/// Live-filesystem provider: physical and display paths coincide.
pub struct DirectSource;

impl SnapshotSource for DirectSource {
    fn open(&self, source: &Path) -> Result<SourceHandle> {
        let reader =
            File::open(source).with_context(|| format!("open {}", source.display()))?;
        let attrs = FileAttrs::from_metadata(source, &reader.metadata()?)?;
        Ok(SourceHandle {
            reader,
            attrs,
            display_path: source.to_path_buf(),
            physical_path: source.to_path_buf(),
        })
    }

    fn translate(&self, physical: &Path) -> PathBuf {
        physical.to_path_buf()
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Pick the snapshot provider for a run.
pub fn provider(not_shadowed: bool) -> Box<dyn SnapshotSource> {
    if !not_shadowed {
        debug!("no point-in-time snapshot facility on this platform, reading the live filesystem");
    }
    Box::new(DirectSource)
}

/// Shortens paths whose textual length exceeds a platform API limit.
pub trait PathResolver {
    /// Return a path below the platform limit that resolves to the same
    /// filesystem object. Idempotent on already-short paths.
    fn shorten(&mut self, path: &Path) -> Result<PathBuf>;

    /// Release indirections created by `shorten`. Called exactly once at
    /// orchestrator shutdown.
    fn release_all(&mut self) -> Result<()>;
}

/// Resolver for platforms without a path-length limit.
pub struct IdentityResolver;

impl PathResolver for IdentityResolver {
    fn shorten(&mut self, path: &Path) -> Result<PathBuf> {
        Ok(path.to_path_buf())
    }

    fn release_all(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Compose the source stream: every regular file matched by an inclusion
/// pattern and not matched by an exclusion, as a sorted, deduplicated list
/// of paths. Symbolic links are not followed.
pub fn compose_stream(includes: &[String], excludes: &PatternSet) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in includes {
        enumerate_pattern(pattern, excludes, &mut files)?;
    }
    Ok(files.into_iter().collect())
}

fn enumerate_pattern(
    pattern: &str,
    excludes: &PatternSet,
    out: &mut BTreeSet<PathBuf>,
) -> Result<()> {
    if !has_wildcard(pattern) {
        let path = PathBuf::from(pattern);
        if path.is_file() {
            if !excludes.is_match(&path) {
                out.insert(path);
            }
        } else if path.is_dir() {
            collect_files(&path, None, excludes, out);
        } else {
            warn!(pattern, "inclusion pattern matched nothing");
        }
        return Ok(());
    }

    let root = fixed_root(pattern);
    if !root.is_dir() {
        warn!(pattern, "inclusion pattern root does not exist");
        return Ok(());
    }
    let matcher = compile_glob(pattern)?.compile_matcher();
    collect_files(&root, Some(&matcher), excludes, out);
    Ok(())
}

fn collect_files(
    root: &Path,
    matcher: Option<&globset::GlobMatcher>,
    excludes: &PatternSet,
    out: &mut BTreeSet<PathBuf>,
) {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "unreadable entry while enumerating sources");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(matcher) = matcher {
            if !matcher.is_match(entry.path()) {
                continue;
            }
        }
        if excludes.is_match(entry.path()) {
            continue;
        }
        out.insert(entry.into_path());
    }
}

fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?'])
}

/// The longest leading part of a pattern with no wildcard component; this
/// is the directory the enumeration walks.
fn fixed_root(pattern: &str) -> PathBuf {
    let mut root = PathBuf::new();
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?']) {
            break;
        }
        root.push(component.as_os_str());
    }
    if root.as_os_str().is_empty() {
        root.push(".");
    }
    root
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn stream_is_sorted_and_unique() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("b.txt"));
        touch(&dir.path().join("a.txt"));
        touch(&dir.path().join("sub/c.txt"));

        let pattern = format!("{}/*", dir.path().display());
        let stream =
            compose_stream(&[pattern.clone(), pattern], &PatternSet::empty()).unwrap();

        assert_eq!(
            stream,
            vec![
                dir.path().join("a.txt"),
                dir.path().join("b.txt"),
                dir.path().join("sub/c.txt"),
            ]
        );
    }

    #[test]
    fn exclusions_prune_the_stream() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("keep.txt"));
        touch(&dir.path().join("cache/drop.tmp"));

        let includes = vec![format!("{}/*", dir.path().display())];
        let excludes =
            PatternSet::compile(&[format!("{}/cache/*", dir.path().display())]).unwrap();
        let stream = compose_stream(&includes, &excludes).unwrap();

        assert_eq!(stream, vec![dir.path().join("keep.txt")]);
    }

    #[test]
    fn literal_file_and_directory_patterns_enumerate() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("single.txt"));
        touch(&dir.path().join("tree/one.txt"));
        touch(&dir.path().join("tree/two.txt"));

        let includes = vec![
            dir.path().join("single.txt").display().to_string(),
            dir.path().join("tree").display().to_string(),
        ];
        let stream = compose_stream(&includes, &PatternSet::empty()).unwrap();

        assert_eq!(
            stream,
            vec![
                dir.path().join("single.txt"),
                dir.path().join("tree/one.txt"),
                dir.path().join("tree/two.txt"),
            ]
        );
    }

    #[test]
    fn missing_pattern_roots_are_not_fatal() {
        let stream = compose_stream(
            &["/nonexisting-root-for-tests/*".to_string()],
            &PatternSet::empty(),
        )
        .unwrap();
        assert!(stream.is_empty());
    }

    #[test]
    fn fixed_root_stops_at_the_first_wildcard() {
        assert_eq!(fixed_root("/data/docs/*"), PathBuf::from("/data/docs"));
        assert_eq!(fixed_root("/data/d?cs/*"), PathBuf::from("/data"));
        assert_eq!(fixed_root("?rel"), PathBuf::from("."));
    }
}
