//! Clap config
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use credkeep_core::StorageBackend;

/// credkeep - manage the dashboard session credential.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Storage backend override: file, keyring or memory
    #[arg(long, global = true)]
    pub storage: Option<StorageBackend>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show whether a credential is held
    Status,
    /// Replace the credential
    Set {
        token: String,
        /// Keep the credential in memory for this run only
        #[arg(long)]
        no_persist: bool,
    },
    /// Drop the credential and its stored entry
    Clear,
    /// Pick up a credential from a JSON response (file, or stdin)
    Apply { file: Option<PathBuf> },
    /// Apply several JSON responses in order, printing each change
    Watch {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// GET an API path with the current credential and absorb the response
    Fetch {
        path: String,
        /// API base URL, overriding the configured one
        #[arg(long)]
        base_url: Option<String>,
    },
}
