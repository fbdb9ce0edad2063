// SPDX-License-Identifier: MIT OR Apache-2.0

use clap::Parser;
use colored::Colorize;

use linkvault::cli::{Cli, Commands};
use linkvault::commands::{backup, make_index, rehardlink, verify};
use linkvault::engine::RetryPolicy;
use linkvault::errors::VaultError;

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = dispatch(cli.command) {
        eprintln!("{} {err:#}", "error:".red().bold());
        let code = match err.downcast_ref::<VaultError>() {
            Some(VaultError::SnapshotExists(_)) => 1,
            _ => 2,
        };
        std::process::exit(code);
    }
}

fn dispatch(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Backup {
            source,
            backup_root,
            exclusion_file,
            delete_existing,
            not_shadowed,
            link_to_directory,
            link_to_hashtables,
        } => {
            backup::run(backup::BackupRequest {
                source,
                backup_root,
                exclusion_file,
                delete_existing,
                not_shadowed,
                link_to_directory,
                link_to_hashtables,
            })?;
        }
        Commands::MakeIndex {
            directory,
            not_shadowed,
        } => {
            make_index::run(make_index::MakeIndexRequest {
                directory,
                not_shadowed,
            })?;
        }
        Commands::Rehardlink {
            directory,
            link_to_hashtables,
            retries,
            retry_delay_ms,
        } => {
            rehardlink::run(rehardlink::RehardlinkRequest {
                directory,
                link_to_hashtables,
                retry: RetryPolicy {
                    retries,
                    delay: std::time::Duration::from_millis(retry_delay_ms),
                },
            })?;
        }
        Commands::Verify { directory } => {
            verify::run(verify::VerifyRequest { directory })?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
