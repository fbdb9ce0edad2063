// SPDX-License-Identifier: MIT OR Apache-2.0

//! Structured error kinds that the binary maps to exit codes.

use std::path::PathBuf;

use thiserror::Error;

/// Failures with meaning beyond their message.
///
/// Everything else in the crate travels as `anyhow::Error`; these kinds are
/// surfaced separately because `main` assigns them specific exit codes or
/// because they terminate a run that is otherwise failure-tolerant.
#[derive(Debug, Error)]
pub enum VaultError {
    /// A snapshot directory for today already exists and
    /// `--delete-existing` was not passed.
    #[error("snapshot directory {} already exists (pass --delete-existing to replace it)", .0.display())]
    SnapshotExists(PathBuf),

    /// The delete-and-relink pair kept failing past the retry budget.
    #[error("{operation} still failing after {attempts} attempts")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },
}
