use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;

use btbb_core::{ConfigStorage, FileConfigStorage};
use btbb_providers::{LineSource, SystemClock};
use btbb_server::{pump, ServerConfig, TrackerServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Settings file location: `$BTBB_CONFIG`, else `~/.btbb/settings.json`.
fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BTBB_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".btbb").join("settings.json")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,btbb_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("BTBB tracker starting...");

    // Configuration
    let storage = FileConfigStorage::new(config_path());
    let settings = storage.load_or_default()?;
    tracing::info!("Settings loaded from {}", storage.path().display());
    let config = ServerConfig::from_settings(&settings)?;
    let bind_addr = config.bind_addr;

    // Packets come from a replay file if given, else from stdin
    let input: Box<dyn BufRead + Send> = match std::env::args().nth(1) {
        Some(path) => {
            tracing::info!("Replaying packets from {}", path);
            Box::new(BufReader::new(File::open(&path)?))
        }
        None => {
            tracing::info!("Reading packets from stdin");
            Box::new(BufReader::new(io::stdin()))
        }
    };

    let server = TrackerServer::new(config);
    let mut tracker = server.handle();
    let control = server.handle();

    // Spawn WebSocket server
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("WebSocket server error: {}", e);
        }
    });

    // Feed the tracker from a blocking reader
    tokio::task::spawn_blocking(move || {
        let mut source = LineSource::new(input, SystemClock);
        let count = pump(&mut source, &mut tracker);
        tracing::info!(
            "Packet source finished: {} packets, {} rejected lines",
            count,
            source.rejected()
        );
    });

    tracing::info!("BTBB tracker ready on ws://{}", bind_addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = ws_handle => {
            tracing::warn!("WebSocket server stopped");
        }
    }

    // Stop the tracker task before leaving; a stopped service is fine.
    if control.shutdown().await.is_ok() {
        if tokio::time::timeout(Duration::from_secs(5), control.stopped())
            .await
            .is_err()
        {
            tracing::warn!("Tracker service did not stop in time");
        }
    }

    tracing::info!("Shutdown complete");
    // The stdin reader may still be blocked in a read; don't wait for it.
    std::process::exit(0)
}
