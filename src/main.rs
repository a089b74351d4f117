//! Kumo-Relay main entry point
//!
//! Command-line interface for the crawl orchestration server. The `serve`
//! command speaks newline-delimited JSON on stdin/stdout; logging therefore
//! always goes to stderr so the transport stays clean.

use clap::{Parser, Subcommand};
use kumo_relay::engine::HttpEngine;
use kumo_relay::profiles::ProfileStore;
use kumo_relay::tools::AppContext;
use kumo_relay::server;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Kumo-Relay: an agent-facing crawl orchestration server
#[derive(Parser, Debug)]
#[command(name = "kumo-relay")]
#[command(version)]
#[command(about = "Agent-facing crawl orchestration server", long_about = None)]
struct Cli {
    /// Directory of TOML crawl profiles
    #[arg(long, value_name = "DIR", default_value = "profiles")]
    profiles_dir: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the tool protocol on stdin/stdout
    Serve,
    /// Print the loaded profiles and exit
    ListProfiles,
    /// Check the registry for a newer release and exit
    CheckUpdate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let profiles = ProfileStore::load(&cli.profiles_dir);
    tracing::info!(
        "Loaded {} profile(s): {:?}",
        profiles.names().len(),
        profiles.names()
    );

    let engine = Arc::new(HttpEngine::new()?);
    let ctx = Arc::new(AppContext::new(engine, profiles)?);

    match cli.command {
        Command::Serve => {
            server::serve(ctx).await?;
        }
        Command::ListProfiles => {
            println!("{}", kumo_relay::tools::list_profiles(&ctx).await);
        }
        Command::CheckUpdate => {
            println!("{}", kumo_relay::tools::check_update(&ctx).await);
        }
    }

    Ok(())
}

/// Sets up the tracing subscriber based on verbosity level.
///
/// The writer is stderr unconditionally: stdout belongs to the protocol.
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kumo_relay=info,warn"),
            1 => EnvFilter::new("kumo_relay=debug,info"),
            2 => EnvFilter::new("kumo_relay=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
