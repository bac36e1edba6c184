//! Ema CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Start the HTTP server with the scheduler
//! - `repl`     — Chat with one actor from the terminal
//! - `snapshot` — Dump every collection to a JSON file
//! - `restore`  — Replace every collection from a JSON file

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "ema", about = "Ema — personal companion agent server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = "ema.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server and the job scheduler
    Serve {
        /// Listen port
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },

    /// Chat with one actor from the terminal
    Repl {
        #[arg(long, default_value_t = 1)]
        user: i64,
        #[arg(long, default_value_t = 1)]
        actor: i64,
        #[arg(long, default_value_t = 1)]
        conversation: i64,
    },

    /// Dump every collection to a JSON file
    Snapshot { path: PathBuf },

    /// Replace every collection from a JSON file
    Restore { path: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let result = match cli.command {
        Commands::Serve { port } => commands::serve::run(&cli.config, port).await,
        Commands::Repl {
            user,
            actor,
            conversation,
        } => commands::repl::run(&cli.config, user, actor, conversation).await,
        Commands::Snapshot { path } => commands::snapshot::create(&cli.config, &path).await,
        Commands::Restore { path } => commands::snapshot::restore(&cli.config, &path).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
