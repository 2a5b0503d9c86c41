//! regcast server entry point.
//!
//! ```text
//! regcast-server                  Run in the foreground
//! regcast-server --config <path>  Load a custom config TOML
//! regcast-server --port <port>    Override the listen port
//! regcast-server --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use regcast_core::SyncService;
use regcast_server::config::{ConfigSource, ServerConfig};
use regcast_server::server::Server;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "regcast-server", about = "Simulated register devices streamed as binary deltas")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "regcast.toml")]
    config: PathBuf,

    /// Listen port, overriding the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ServerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config. Its outcome is logged once tracing is up.
    let (mut config, source) = ServerConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.network.port = port;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("regcast-server v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File => info!("loaded config from {}", cli.config.display()),
        ConfigSource::Missing => info!("no config at {}; using defaults", cli.config.display()),
        ConfigSource::Invalid(e) => {
            warn!("invalid config {}: {e}; using defaults", cli.config.display())
        }
    }
    info!(
        "devices: {} x {} registers",
        config.simulation.device_count, config.simulation.registers_per_device
    );
    info!(
        "simulation tick: {}ms, broadcast tick: {}ms",
        config.simulation.tick_ms, config.broadcast.tick_ms
    );

    let service = Arc::new(SyncService::new(config.to_service_config())?);
    let cancel = CancellationToken::new();
    let tasks = Arc::clone(&service).spawn(cancel.clone());

    // Ctrl-C / SIGTERM handler.
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("shutdown signal received; stopping");
            cancel.cancel();
        }
    });

    let listener = TcpListener::bind(config.listen_addr()).await?;
    let server = Server::new(service, config.network.max_connections);
    server.run(listener, cancel.clone()).await?;

    cancel.cancel();
    tasks.join().await;
    info!("regcast-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
