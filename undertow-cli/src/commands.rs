//! CLI command implementations

use std::path::PathBuf;

use anyhow::Context;
use clap::Subcommand;
use undertow_core::tracing_setup::{CliLogLevel, init_tracing};
use undertow_core::{MagnetLink, RuntimeMode, SimulatedSwarm, UndertowConfig};

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming cache server
    Server {
        /// Host to bind to (overrides UNDERTOW_HOST)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides UNDERTOW_PORT)
        #[arg(short, long)]
        port: Option<u16>,
        /// Runtime mode: development serves a simulated demo catalog
        #[arg(short, long, default_value = "development")]
        mode: RuntimeMode,
        /// Console log level
        #[arg(long, value_enum, default_value_t = CliLogLevel::Info)]
        log_level: CliLogLevel,
        /// Directory for the per-run trace log
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// Print the canonical content id of a magnet link or info-hash
    ContentId {
        /// Magnet URI, hex or base32 info-hash, or opaque id
        input: String,
    },
    /// List the content ids of the development demo catalog
    Catalog,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Server {
            host,
            port,
            mode,
            log_level,
            logs_dir,
        } => start_server(host, port, mode, log_level, logs_dir).await,
        Commands::ContentId { input } => print_content_id(&input),
        Commands::Catalog => {
            list_catalog();
            Ok(())
        }
    }
}

/// Start the HTTP server until Ctrl-C
///
/// # Errors
/// - Tracing could not be initialized
/// - The listener could not be bound or serving failed
pub async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    mode: RuntimeMode,
    log_level: CliLogLevel,
    logs_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let log_file = init_tracing(log_level.into(), logs_dir.as_deref())
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
    tracing::debug!("Writing trace log to {}", log_file.display());

    let mut config = UndertowConfig::from_env();
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    undertow_web::run_server(config, mode)
        .await
        .context("server failed")
}

/// Print the canonical form of a content identifier
///
/// # Errors
/// - The input is neither a magnet link, an info-hash nor a valid opaque id
pub fn print_content_id(input: &str) -> anyhow::Result<()> {
    let magnet = MagnetLink::resolve(input).context("could not parse content id")?;

    println!("Content id: {}", magnet.content_id());
    if let Some(name) = magnet.display_name() {
        println!("  Name: {name}");
    }
    for tracker in magnet.trackers() {
        println!("  Tracker: {tracker}");
    }
    if magnet.content_id().is_info_hash() {
        println!("  Magnet: {}", magnet.to_uri());
    }
    Ok(())
}

/// Print the simulated demo catalog
pub fn list_catalog() {
    let swarm = SimulatedSwarm::with_demo_catalog(UndertowConfig::default().simulation);

    println!("Demo catalog (development mode)");
    println!("{:-<60}", "");
    for (content_id, name) in swarm.catalog() {
        println!("{content_id}  {name}");
    }
    println!("\nStream with: curl -r 0-1023 http://127.0.0.1:3000/stream/<content-id>");
}
