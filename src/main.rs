//! Updraft daemon entry point.

use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;

mod allowlist;
mod api;
mod config;
mod coordinator;
mod error;
mod gate;
mod runtime;
mod types;
mod update;
mod validation;

#[cfg(test)]
mod testing;

use api::{create_router, serve, AppState, UPDATE_PATH};
use config::Config;
use coordinator::Coordinator;
use gate::AdmissionGate;
use runtime::DockerRuntime;
use update::RuntimeUpdater;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting Updraft daemon on {} (scope: {:?}, label_enable: {}, allowed repos: {:?})",
        cfg.http_bind, cfg.scope, cfg.label_enable, cfg.allowed_image_repos
    );
    if cfg.api_token.is_none() {
        warn!("No API token configured, {} is open to anyone who can reach it", UPDATE_PATH);
    }

    // Raised by the updater when a request asks the daemon to stop.
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    // Container Runtime (Docker)
    let docker = DockerRuntime::connect()?;
    let runtime = Arc::new(DockerRuntime::new(
        docker,
        cfg.include_stopped,
        cfg.stop_timeout_secs,
    ));
    let updater = RuntimeUpdater::new(runtime, cfg.update_policy(), shutdown_tx);

    // One gate per process; every trigger goes through it.
    let gate = AdmissionGate::new();
    let coordinator = Arc::new(Coordinator::new(Arc::new(updater), gate.clone()));

    let app = create_router(AppState {
        coordinator,
        api_token: cfg.api_token.as_deref().map(Arc::<str>::from),
    });

    let listener = TcpListener::bind(cfg.http_bind).await?;
    info!("Listening for update triggers on {}{}", cfg.http_bind, UPDATE_PATH);

    // Closing the gate on shutdown fails requests still waiting for it.
    serve(listener, app, gate, async move {
        tokio::select! {
            res = signal::ctrl_c() => match res {
                Ok(()) => info!("Received Ctrl+C, shutting down..."),
                Err(err) => error!("Unable to listen for shutdown signal: {}", err),
            },
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                info!("Update requested shutdown, stopping...");
            }
        }
    })
    .await?;

    info!("Shutdown complete.");
    Ok(())
}
