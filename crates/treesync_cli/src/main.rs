//! TreeSync CLI
//!
//! Runs the mutations sync server and offers small inspection tools.
//!
//! # Commands
//!
//! - `serve` - Serve `GET /sync/mutations/{dbname}` as standalone, master or worker
//! - `cursor` - Decode a cursor token
//! - `check-rules` - Evaluate a grant file for an identity and path

mod commands;
mod error;
mod http;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// TreeSync mutations feed server and tools.
#[derive(Parser)]
#[command(name = "treesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve(commands::serve::ServeArgs),

    /// Decode a cursor token
    Cursor {
        /// The cursor token as returned in the context header
        token: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Evaluate a grant file
    CheckRules {
        /// Path to the JSON grant file
        rules: PathBuf,

        /// Tree path to check
        #[arg(short, long, default_value = "/")]
        path: String,

        /// Identity: anonymous, admin or a user id
        #[arg(short, long, default_value = "anonymous")]
        identity: String,

        /// Check write access instead of read access
        #[arg(short, long)]
        write: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::serve::run(args))?;
        }
        Commands::Cursor { token, format } => {
            commands::cursor::run(&token, &format)?;
        }
        Commands::CheckRules {
            rules,
            path,
            identity,
            write,
            format,
        } => {
            commands::check_rules::run(&rules, &path, &identity, write, &format)?;
        }
        Commands::Version => {
            println!("TreeSync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Cursor format v{}, IPC protocol v{}",
                treesync_protocol::CURSOR_VERSION,
                treesync_protocol::IPC_PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
