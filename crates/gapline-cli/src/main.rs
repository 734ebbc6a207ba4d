//! gapline operator CLI.
//!
//! Inspects the configuration and the durable state of a client session
//! without connecting to the server.
//!
//! # Quick Start
//!
//! ```bash
//! # Where would the client keep its files?
//! TG_PHONE=+15550100 gapline paths
//!
//! # Stored sequence counters per stream
//! gapline state
//!
//! # Cached peers
//! gapline peers list
//! gapline peers find rustlang
//! ```

mod commands;
mod table;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gapline_types::PeerKind;

/// gapline - gap-aware update sync for chat protocol clients.
#[derive(Parser)]
#[command(name = "gapline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project directory holding gapline.toml.
    #[arg(short, long, global = true, default_value = ".")]
    project: PathBuf,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version information.
    Version,

    /// Show configuration and session file locations.
    Paths,

    /// Show the effective configuration.
    Config {
        /// Output format.
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List stored sequence counters per stream.
    State,

    /// Peer cache commands.
    #[command(subcommand)]
    Peers(PeerCommands),
}

#[derive(Subcommand)]
enum PeerCommands {
    /// List every cached peer.
    List,

    /// Show one cached peer.
    Get {
        /// Peer kind (user, chat, channel).
        kind: PeerKind,

        /// Numeric peer id.
        id: i64,
    },

    /// Look a cached peer up by username.
    Find {
        /// Username, with or without a leading @.
        username: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
    Toml,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    // Logs go to stderr so command output stays pipeable.
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
        Commands::Paths => commands::paths::run(&cli.project),
        Commands::Config { format } => commands::config::show(&cli.project, format),
        Commands::State => commands::state::list(&cli.project),
        Commands::Peers(PeerCommands::List) => commands::peers::list(&cli.project),
        Commands::Peers(PeerCommands::Get { kind, id }) => {
            commands::peers::get(&cli.project, kind, id)
        }
        Commands::Peers(PeerCommands::Find { username }) => {
            commands::peers::find(&cli.project, &username)
        }
    }
}
