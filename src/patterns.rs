// SPDX-License-Identifier: MIT OR Apache-2.0

//! Line-oriented inclusion/exclusion pattern files and wildcard matching.
//!
//! Patterns use `*` and `?` wildcards; `*` matches across path separators.
//! Lines may carry trailing comments introduced by `#`, `::`, or `//`.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

const COMMENT_MARKERS: [&str; 3] = ["#", "::", "//"];

/// A compiled set of wildcard patterns.
#[derive(Debug)]
pub struct PatternSet {
    set: GlobSet,
    patterns: Vec<String>,
}

impl PatternSet {
    /// A set that matches nothing.
    pub fn empty() -> Self {
        Self {
            set: GlobSet::empty(),
            patterns: Vec::new(),
        }
    }

    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            builder.add(compile_glob(pattern)?);
        }
        let set = builder.build().context("compile pattern set")?;
        Ok(Self {
            set,
            patterns: patterns.to_vec(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn is_match(&self, path: &Path) -> bool {
        !self.patterns.is_empty() && self.set.is_match(path)
    }
}

/// Compile one wildcard pattern. `*` crosses separators, matching the whole
/// remainder of a path; backslashes are literal so Windows paths survive.
pub fn compile_glob(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
        .with_context(|| format!("invalid pattern '{pattern}'"))
}

/// Read a line-oriented pattern file.
pub fn parse_pattern_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("read pattern file {}", path.display()))?;
    parse_pattern_lines(&content)
        .with_context(|| format!("in pattern file {}", path.display()))
}

/// Parse pattern lines: strip trailing comments, trim whitespace, skip
/// empties. A line starting with `*` would match everything everywhere and
/// is rejected as ambiguous.
pub fn parse_pattern_lines(content: &str) -> Result<Vec<String>> {
    let mut patterns = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let stripped = strip_comment(line).trim();
        if stripped.is_empty() {
            continue;
        }
        if stripped.starts_with('*') {
            bail!(
                "line {}: pattern '{}' starting with '*' is ambiguous",
                number + 1,
                stripped
            );
        }
        patterns.push(stripped.to_string());
    }
    Ok(patterns)
}

fn strip_comment(line: &str) -> &str {
    let cut = COMMENT_MARKERS
        .iter()
        .filter_map(|marker| line.find(marker))
        .min();
    match cut {
        Some(index) => &line[..index],
        None => line,
    }
}
