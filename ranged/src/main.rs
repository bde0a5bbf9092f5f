//! ranged server binary.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use ranged::api::server::{self, AppState};
use ranged::config;
use ranged::metrics::MetricsHub;
use ranged::reload::{ReloadRequest, Reloader, ReloaderOptions};
use ranged::snapshot::SnapshotCell;
use ranged::sources::registry::{HttpRegistry, Registry};

#[derive(Parser, Debug)]
#[command(
    name = "ranged",
    version,
    about = "Cluster range query server",
    after_help = "example: ranged --port 8888 ranged.toml"
)]
struct Args {
    /// HTTP server port.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Do not start the server; load all sources once and exit with a
    /// non-zero code when any warning was produced.
    #[arg(long)]
    parse: bool,

    /// Path to the TOML configuration file.
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_handle = ranged::logging::init()?;

    info!("server starting with pid {}", std::process::id());
    let config = config::load(args.config.as_deref())?;

    let registry: Option<Arc<dyn Registry>> = if config.registry.enabled {
        match HttpRegistry::new(
            &config.registry.address,
            Duration::from_secs(config.registry.wait_secs),
        ) {
            Ok(registry) => Some(Arc::new(registry)),
            Err(err) => {
                warn!(error = %err, "registry client unavailable, dynamic source disabled");
                None
            }
        }
    } else {
        None
    };

    let snapshot = Arc::new(SnapshotCell::new());
    let metrics = Arc::new(MetricsHub::new());

    let (reloader, reload_tx, first_cycle) = Reloader::new(ReloaderOptions {
        config_path: args.config.clone(),
        config,
        registry,
        snapshot: snapshot.clone(),
        metrics: metrics.clone(),
        log_handle: Some(log_handle),
    });
    tokio::spawn(reloader.run());

    // The first load must complete before any traffic is served.
    let source = args
        .config
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "defaults".to_string());
    reload_tx
        .send(ReloadRequest::new(source.clone()))
        .await
        .context("reload pipeline unavailable at startup")?;
    let warnings = first_cycle
        .await
        .context("initial load did not complete")?;

    if args.parse {
        info!(warnings, "not starting server because of --parse");
        if warnings > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    spawn_hup_listener(reload_tx, source);

    let state = AppState {
        snapshot,
        metrics: metrics.clone(),
        start_time: Instant::now(),
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    server::serve(addr, state).await?;

    metrics.close();
    Ok(())
}

/// Re-submit the last-used configuration path whenever a HUP arrives.
#[cfg(unix)]
fn spawn_hup_listener(reload_tx: mpsc::Sender<ReloadRequest>, source: String) {
    use tokio::signal::unix::{SignalKind, signal};

    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(hup) => hup,
            Err(err) => {
                warn!(error = %err, "SIGHUP handler unavailable");
                return;
            }
        };
        while hup.recv().await.is_some() {
            info!("reloading config in response to HUP");
            if reload_tx.send(ReloadRequest::new(source.clone())).await.is_err() {
                return;
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_hup_listener(_reload_tx: mpsc::Sender<ReloadRequest>, _source: String) {}
