//! `ringmaster scheduler` — runs the C10 poll loop with no HTTP surface.
//!
//! Exit code is 0 on a clean SIGINT/SIGTERM stop (SPEC_FULL.md §6).

use anyhow::Result;
use ringmaster_core::lockfile::DaemonLockfile;
use tracing::info;

use super::load_config;

pub async fn run() -> Result<()> {
    ringmaster_telemetry::logging::init_logging("ringmaster", "info");
    info!(pid = std::process::id(), "scheduler starting (no HTTP surface)");

    let config = load_config();

    if let Some(existing) = DaemonLockfile::read_valid() {
        eprintln!(
            "a ringmaster process is already running (pid={})",
            existing.pid
        );
        std::process::exit(1);
    }

    let daemon = ringmaster_daemon::daemon::Daemon::new(config);

    let lockfile = DaemonLockfile {
        pid: std::process::id(),
        api_port: 0,
        frontend_port: 0,
        host: "127.0.0.1".into(),
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
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping scheduler");
            DaemonLockfile::remove();
            shutdown.trigger();
        }
    });

    let result = daemon.run().await;
    DaemonLockfile::remove();
    info!("scheduler stopped");
    result
}
