// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// linkvault - deduplicating versioned backups
///
/// Each backup run produces a dated snapshot directory; content already
/// present anywhere in the repository is hard-linked instead of copied,
/// guided by per-snapshot fingerprint hashtables.
#[derive(Parser, Debug)]
#[command(name = "linkvault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Produce today's snapshot of the sources under the backup root
    Backup {
        /// Inclusion pattern file, or a directory (interpreted as dir/*)
        source: PathBuf,

        /// Repository root that receives the dated snapshot directory
        #[arg(long)]
        backup_root: PathBuf,

        /// Line-oriented exclusion pattern file
        #[arg(long)]
        exclusion_file: Option<PathBuf>,

        /// Replace a snapshot directory already present for today
        #[arg(long)]
        delete_existing: bool,

        /// Read sources from the live filesystem instead of a snapshot view
        #[arg(long)]
        not_shadowed: bool,

        /// Index this directory first and allow linking into it
        #[arg(long)]
        link_to_directory: Option<PathBuf>,

        /// Additional hashtable sidecar to import (repeatable)
        #[arg(long = "link-to-hashtable")]
        link_to_hashtables: Vec<PathBuf>,
    },

    /// Fingerprint every file under a directory and write its hashtable
    MakeIndex {
        directory: PathBuf,

        /// Read files from the live filesystem instead of a snapshot view
        #[arg(long)]
        not_shadowed: bool,
    },

    /// Replace byte-identical files under a directory with hard links
    Rehardlink {
        directory: PathBuf,

        /// Additional hashtable sidecar to import (repeatable)
        #[arg(long = "link-to-hashtable")]
        link_to_hashtables: Vec<PathBuf>,

        /// Retry budget for the delete-and-link pair
        #[arg(long, default_value_t = 10)]
        retries: u32,

        /// Delay between retries in milliseconds
        #[arg(long, default_value_t = 200)]
        retry_delay_ms: u64,
    },

    /// Recompute fingerprints for every hashtable entry under a directory
    Verify { directory: PathBuf },
}
