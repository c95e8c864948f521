#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;

use clap::{Parser, Subcommand};

/// ringmaster -- orchestrate coding-agent workers against a bead queue.
#[derive(Parser)]
#[command(name = "ringmaster", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the scheduler and the HTTP/WebSocket bridge.
    Serve,
    /// Start the scheduler only, with no HTTP surface.
    Scheduler,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => commands::serve::run().await,
        Commands::Scheduler => commands::scheduler::run().await,
    }
}
