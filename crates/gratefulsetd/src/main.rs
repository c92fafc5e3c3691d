//! gratefulsetd — the GratefulSet daemon.
//!
//! Single binary that assembles:
//! - State store (redb) behind the local substrate
//! - Controller (work queue, reconcilers, hooks)
//! - Local pod-group driver
//! - REST API
//!
//! # Usage
//!
//! ```text
//! gratefulsetd standalone --port 8443 --data-dir /var/lib/gratefulset
//! ```

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use gratefulset_controller::{Controller, Reconciler};
use gratefulset_hooks::DefaultHookFactory;
use gratefulset_podgroup::{PodExitHook, PodGroupDriver};
use gratefulset_state::{LocalSubstrate, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::DaemonConfig;

#[derive(Parser)]
#[command(name = "gratefulsetd", about = "GratefulSet daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run controller, pod-group driver and API in one process.
    Standalone {
        /// Port to listen on. Overrides `[api] port`.
        #[arg(long)]
        port: Option<u16>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/gratefulset")]
        data_dir: PathBuf,

        /// Path to gratefulsetd.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Standalone {
            port,
            data_dir,
            config,
        } => {
            let mut daemon_config = match config {
                Some(path) => DaemonConfig::from_file(&path)?,
                None => DaemonConfig::default(),
            };
            if let Some(port) = port {
                daemon_config.api.port = port;
            }
            run_standalone(daemon_config, data_dir).await
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,gratefulsetd=debug,gratefulset=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_standalone(config: DaemonConfig, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("GratefulSet daemon starting in standalone mode");

    std::fs::create_dir_all(&data_dir)?;
    let db_path = data_dir.join("gratefulset.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    let substrate = LocalSubstrate::new(store);
    info!(path = ?db_path, "state store opened");

    let hooks = DefaultHookFactory::new(config.hook_timeout())
        .with_pod_exit(Arc::new(PodExitHook::new(substrate.clone())));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(substrate.clone()),
        Arc::new(hooks),
        config.controller_config(),
    ));
    let controller = Controller::new(reconciler);
    info!(workers = config.controller.workers, "controller initialized");

    let driver = PodGroupDriver::new(substrate.clone(), config.driver_config());
    info!(tick_ms = config.podgroup.tick_interval_ms, "pod-group driver initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let controller_shutdown = shutdown_rx.clone();
    let driver_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let controller_handle = tokio::spawn(async move {
        controller.run(controller_shutdown).await;
    });
    let driver_handle = tokio::spawn(async move {
        driver.run(driver_shutdown).await;
    });

    // ── Start API server ───────────────────────────────────────

    let router = gratefulset_api::build_router(substrate);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c, shutting down");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    let _ = controller_handle.await;
    let _ = driver_handle.await;

    info!("GratefulSet daemon stopped");
    Ok(())
}
