//! Berth CLI - declarative stack orchestrator with ephemeral environment slots

use clap::{Parser, Subcommand};
use miette::Result;
use std::path::PathBuf;

mod commands;
mod github;
mod hooks;
mod tools;

use commands::GlobalOpts;

#[derive(Parser)]
#[command(name = "berth")]
#[command(version)]
#[command(about = "Declarative stack orchestrator with ephemeral environment slots", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the manifest stream without touching the cluster
    Render {
        /// Write the stream to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Bring an environment up: find or allocate a slot, render, apply, run hooks
    Up {
        /// Build and push service images before applying
        #[arg(long)]
        build: bool,
    },

    /// Tear an environment down and release its slot
    Down,

    /// Inspect and manage slot records
    Slots {
        #[command(subcommand)]
        command: SlotsCommands,
    },
}

#[derive(Subcommand)]
enum SlotsCommands {
    /// List slot records
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Allocate a slot without deploying anything
    Allocate,

    /// Release a slot record without touching cluster resources
    Release,

    /// Delete slot records older than the TTL
    Gc {
        /// TTL in hours (default 24)
        #[arg(long)]
        ttl_hours: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_panic_hook();

    let cli = Cli::parse();

    let filter = if cli.global.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Render { output } => commands::render::run(&cli.global, output.as_deref()).await,

        Commands::Up { build } => commands::up::run(&cli.global, build).await,

        Commands::Down => commands::down::run(&cli.global).await,

        Commands::Slots { command } => match command {
            SlotsCommands::List { json } => commands::slots::list(&cli.global, json).await,
            SlotsCommands::Allocate => commands::slots::allocate(&cli.global).await,
            SlotsCommands::Release => commands::slots::release(&cli.global).await,
            SlotsCommands::Gc { ttl_hours } => commands::slots::gc(&cli.global, ttl_hours).await,
        },
    }
}
