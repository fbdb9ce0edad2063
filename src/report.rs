// SPDX-License-Identifier: MIT OR Apache-2.0

//! Run counters and the end-of-run summary.

use colored::Colorize;
use indicatif::HumanBytes;

use crate::engine::{CopyReason, Outcome};

/// Counters threaded through a run. The engine returns outcomes; the
/// orchestrator records them here and prints the summary at the end.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunStats {
    pub files_linked: u64,
    pub files_copied: u64,
    pub files_failed: u64,
    pub files_skipped: u64,
    pub readonly_copies: u64,
    pub bytes_linked: u64,
    pub bytes_copied: u64,
}

impl RunStats {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Linked { bytes, .. } => {
                self.files_linked += 1;
                self.bytes_linked += bytes;
            }
            Outcome::Copied { reason, bytes } => {
                self.files_copied += 1;
                self.bytes_copied += bytes;
                if *reason == CopyReason::ReadOnly {
                    self.readonly_copies += 1;
                }
            }
            Outcome::Skipped { .. } => {
                self.files_skipped += 1;
            }
        }
    }

    pub fn record_failure(&mut self) {
        self.files_failed += 1;
    }

    /// Print the summary to stdout. The headline is green only when every
    /// file went through.
    pub fn print_summary(&self, label: &str) {
        println!();
        println!(
            "  files linked:  {} ({})",
            self.files_linked,
            HumanBytes(self.bytes_linked)
        );
        println!(
            "  files copied:  {} ({})",
            self.files_copied,
            HumanBytes(self.bytes_copied)
        );
        if self.readonly_copies > 0 {
            println!("  read-only copies: {}", self.readonly_copies);
        }
        if self.files_skipped > 0 {
            println!("  files skipped: {}", self.files_skipped);
        }
        println!("  files failed:  {}", self.files_failed);

        if self.files_failed == 0 {
            println!("{}", format!("{label} completed with no failures").green().bold());
        } else {
            println!(
                "{}",
                format!("{label} completed with {} failures", self.files_failed)
                    .red()
                    .bold()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SkipReason;
    use std::path::PathBuf;

    #[test]
    fn outcomes_land_in_the_right_counters() {
        let mut stats = RunStats::default();
        stats.record(&Outcome::Linked {
            candidate: PathBuf::from("/x"),
            bytes: 100,
        });
        stats.record(&Outcome::Copied {
            reason: CopyReason::NewHash,
            bytes: 10,
        });
        stats.record(&Outcome::Copied {
            reason: CopyReason::ReadOnly,
            bytes: 1,
        });
        stats.record(&Outcome::Skipped {
            reason: SkipReason::PathLength,
        });
        stats.record_failure();

        assert_eq!(stats.files_linked, 1);
        assert_eq!(stats.bytes_linked, 100);
        assert_eq!(stats.files_copied, 2);
        assert_eq!(stats.bytes_copied, 11);
        assert_eq!(stats.readonly_copies, 1);
        assert_eq!(stats.files_skipped, 1);
        assert_eq!(stats.files_failed, 1);
    }
}
