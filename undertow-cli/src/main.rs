//! Undertow CLI - Command-line interface
//!
//! Runs the streaming cache server and inspects content identifiers.

mod commands;

use clap::Parser;

#[derive(Parser)]
#[command(name = "undertow")]
#[command(about = "Torrent-backed HTTP streaming cache")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::handle_command(cli.command).await
}
