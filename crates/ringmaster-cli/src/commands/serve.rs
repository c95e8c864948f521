//! `ringmaster serve` — starts the C1-C12 engine (scheduler included) and
//! the thin HTTP/WebSocket bridge over it (SPEC_FULL.md §6).
//!
//! Exit code is non-zero when the HTTP listener fails to bind.

use anyhow::{Context, Result};
use ringmaster_bridge::http_api::{api_router_with_auth, ApiState};
use ringmaster_core::lockfile::DaemonLockfile;
use tracing::info;

use super::load_config;

pub async fn run() -> Result<()> {
    ringmaster_telemetry::logging::init_logging("ringmaster", "info");
    info!(pid = std::process::id(), "serve starting (scheduler + HTTP bridge)");

    let config = load_config();

    if let Some(existing) = DaemonLockfile::read_valid() {
        eprintln!(
            "a ringmaster process is already running (pid={})",
            existing.pid
        );
        std::process::exit(1);
    }

    let daemon = ringmaster_daemon::daemon::Daemon::new(config.clone());

    let api_key = config
        .bridge
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok());
    let state = ApiState::new(
        daemon.store().clone(),
        daemon.event_bus().clone(),
        daemon.output_buffer().clone(),
    );
    let app = api_router_with_auth(state, api_key, config.bridge.allowed_origins.clone());

    let addr = format!("{}:{}", config.daemon.host, config.daemon.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {addr}"))?;
    let bound_port = listener.local_addr().map(|a| a.port()).unwrap_or(config.daemon.port);
    info!(addr = %addr, "HTTP bridge listening");

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        api_port: bound_port,
        frontend_port: 0,
        host: config.daemon.host.clone(),
        started_at: chrono::Utc::now().to_rfc3339(),
        project_path: std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned()),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    if let Err(msg) = lockfile.acquire_or_fail() {
        eprintln!("failed to acquire lockfile: {msg}");
        std::process::exit(1);
    }

    let shutdown = daemon.shutdown_handle();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating shutdown");
            DaemonLockfile::remove();
            ctrl_c_shutdown.trigger();
        }
    });

    let mut http_shutdown_rx = shutdown.subscribe();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_shutdown_rx.recv().await.ok();
            })
            .await
    });

    let scheduler_result = daemon.run().await;
    let http_result = http_task.await;

    DaemonLockfile::remove();
    if let Err(e) = &scheduler_result {
        tracing::error!(error = %e, "scheduler stopped with an error");
    }
    match http_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "HTTP server stopped with an error"),
        Err(e) => tracing::error!(error = %e, "HTTP server task panicked"),
    }
    info!("serve stopped");
    scheduler_result
}
