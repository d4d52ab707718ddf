//! credkeep - inspect and drive the session credential from the terminal.
//!
//! Uses the same configuration and storage backend as the dashboard, so a
//! token set here is the token the next dashboard session starts with.

mod cli;

use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Args, Command};
use credkeep_core::api::ApiClient;
use credkeep_core::{facade, listener, Config, CredentialAuthority};

/// Log file prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "credkeep.log";

/// Initialize the tracing subscriber for logging.
/// The returned guard must be held until exit so buffered file output is
/// flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match config.log_dir {
        Some(ref dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(storage) = args.storage {
        config.storage = storage;
    }
    let _guard = init_tracing(&config);
    debug!(storage = ?config.storage, "credkeep starting");

    let authority = facade::install(config.build_authority()?)
        .context("Failed to install credential authority")?;

    // Print every accepted change as it happens
    authority.add_listener(listener(|value: Option<&str>| match value {
        Some(token) => println!("credential changed: {}", mask(token)),
        None => println!("credential cleared"),
    }));

    match args.command {
        Command::Status => print_status(&authority),
        Command::Set { token, no_persist } => {
            authority.set_with(Some(token.as_str()), !no_persist);
            print_status(&authority);
        }
        Command::Clear => {
            facade::clear_credential();
            print_status(&authority);
        }
        Command::Apply { file } => {
            let payload = read_payload(file.as_deref())?;
            let current = facade::apply_from_response(&payload);
            info!(authenticated = current.is_some(), "Applied response payload");
            print_status(&authority);
        }
        Command::Watch { files } => {
            for file in &files {
                let payload = read_payload(Some(file.as_path()))?;
                println!("{}:", file.display());
                facade::apply_from_response(&payload);
            }
            print_status(&authority);
        }
        Command::Fetch { path, base_url } => {
            let base_url = base_url
                .or_else(|| config.api_base_url.clone())
                .ok_or_else(|| anyhow::anyhow!("No API base URL (use --base-url or CREDKEEP_API_BASE_URL)"))?;
            let client = ApiClient::new(base_url, Arc::clone(&authority))?;
            let body = client.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            print_status(&authority);
        }
    }

    Ok(())
}

fn print_status(authority: &CredentialAuthority) {
    match authority.get() {
        Some(token) => println!(
            "authenticated ({} storage): {}",
            authority.storage_backend(),
            mask(&token)
        ),
        None => println!("not authenticated ({} storage)", authority.storage_backend()),
    }
}

/// Read a JSON payload from `file`, or stdin when absent or `-`
fn read_payload(file: Option<&Path>) -> Result<Value> {
    let contents = match file {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read payload from stdin")?;
            buf
        }
    };
    serde_json::from_str(&contents).context("Payload is not valid JSON")
}

/// Show only the ends of a credential
fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{} ({} chars)", head, tail, chars.len())
}
