//! Nadim - conversational marketing-assistant backend
//!
//! Runs the WebSocket/HTTP server, or one-shot maintenance commands.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use nadim::Config;
use std::path::PathBuf;

#[cfg(feature = "server")]
use nadim::server::run_server;

/// Nadim - real-time marketing-assistant chat backend
#[derive(Parser)]
#[command(
    name = "nadim",
    version,
    about = "Real-time conversational marketing-assistant backend",
    long_about = r#"
Nadim routes user chat messages to specialized analysis agents, keeps
per-user dialogue state, attaches renderable UI components to replies,
and pushes smart alerts to connected clients.

Examples:
  nadim                          Start the server on 0.0.0.0:8000
  nadim serve --port 9000        Start the server on a custom port
  nadim check-alerts org1        Run a one-shot alert check for org1
  nadim info                     Display version and build information
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data directory for persistence
    #[arg(short, long, global = true, default_value = "./data")]
    data_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP/WebSocket server (default)
    #[command(alias = "server")]
    Serve(ServeArgs),

    /// Run a one-shot alert check for an organization
    CheckAlerts(CheckAlertsArgs),

    /// Display version and build information
    Info,
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, default_value = "8000")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,
}

#[derive(Args)]
struct CheckAlertsArgs {
    /// Organization identifier
    org_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config {
        data_dir: cli.data_dir.clone(),
        ..Default::default()
    };

    match cli.command {
        None => serve(config, "0.0.0.0", 8000).await,
        Some(Commands::Serve(args)) => serve(config, &args.host, args.port).await,
        Some(Commands::CheckAlerts(args)) => check_alerts(config, &args.org_id),
        Some(Commands::Info) => {
            println!("nadim {}", env!("CARGO_PKG_VERSION"));
            println!("server feature: {}", cfg!(feature = "server"));
            Ok(())
        }
    }
}

#[cfg(feature = "server")]
async fn serve(config: Config, host: &str, port: u16) -> Result<()> {
    run_server(host, port, config).await
}

#[cfg(not(feature = "server"))]
async fn serve(_config: Config, _host: &str, _port: u16) -> Result<()> {
    anyhow::bail!("built without the `server` feature")
}

fn check_alerts(config: Config, org_id: &str) -> Result<()> {
    use nadim::{AlertEngine, ConnectionRegistry, ContextCache, KvStore};
    use std::sync::Arc;

    let kv = KvStore::open(&config.data_dir)?;
    let registry = Arc::new(ConnectionRegistry::new());
    let context = Arc::new(ContextCache::with_backing(
        config.context_size_bound,
        kv.partition("context")?,
    ));
    let engine = AlertEngine::new(registry, context, config.crisis_sentiment_threshold)
        .with_pending_store(kv.partition("pending_alerts")?);

    let alerts = engine.check(org_id)?;
    println!("{} alert(s) for {org_id}", alerts.len());
    for alert in &alerts {
        println!("  [{}] {}", alert.priority.as_str(), alert.title);
    }
    Ok(())
}
