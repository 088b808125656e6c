//! Rollcall CLI - offline tooling for the attendance engine.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{GalleryCommand, ReplayCommand};

/// Rollcall CLI - replay recorded camera streams and manage galleries.
///
/// A replay feeds a recorded event stream (session opens, observations,
/// session closes) through the engine exactly as live cameras would, and
/// prints the resulting attendance records and session summaries.
#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face-embedding attendance engine tooling")]
#[command(version)]
pub struct Cli {
    /// Engine config file (YAML or JSON); defaults derive from the gallery
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Output file (default: stdout)
    #[arg(short = 'o', long, global = true)]
    pub output: Option<String>,

    /// Output as JSON instead of YAML
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a recorded event stream through the engine
    Replay(ReplayCommand),
    /// Inspect and edit gallery snapshots
    Gallery(GalleryCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Replay(cmd) => cmd.run(&cli).await,
        Commands::Gallery(cmd) => cmd.run(&cli),
    }
}
