//! ringmaster-daemon — starts the store-backed engine and runs the
//! scheduler until shutdown. The HTTP/WS/CLI surfaces are separate,
//! out-of-scope consumers of the library crate.

use anyhow::{Context, Result};
use ringmaster_core::config::Config;
use ringmaster_core::lockfile::DaemonLockfile;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    ringmaster_telemetry::logging::init_logging("ringmaster-daemon", "info");
    info!(pid = std::process::id(), "ringmaster daemon starting");

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let data_dir = std::path::Path::new(&home).join(".ringmaster");
    std::fs::create_dir_all(&data_dir).ok();

    let config = load_config(&home).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        Config::default()
    });

    let replace_mode = std::env::args().any(|a| a == "--replace" || a == "-r");
    if let Some(existing) = DaemonLockfile::read_valid() {
        if replace_mode {
            info!(pid = existing.pid, "replacing existing daemon (--replace)");
            #[cfg(unix)]
            unsafe {
                libc::kill(existing.pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            DaemonLockfile::remove();
        } else {
            eprintln!(
                "ringmaster daemon already running (pid={})\n  Hint: use --replace to restart it.",
                existing.pid,
            );
            std::process::exit(1);
        }
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
    info!("lockfile written to {}", DaemonLockfile::path().display());

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            return;
        }
        info!("ctrl-c received, initiating shutdown");
        DaemonLockfile::remove();
        shutdown.trigger();
    });

    let result = daemon.run().await;
    DaemonLockfile::remove();
    if let Err(e) = &result {
        tracing::error!(error = %e, "daemon execution failed");
    }
    info!("daemon stopped");
    result
}

fn load_config(home: &str) -> Result<Config> {
    let path = std::path::Path::new(home)
        .join(".ringmaster")
        .join("config.toml");
    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content).context("failed to parse config.toml")?;
        Ok(config)
    } else {
        info!("no config file found at {}, using defaults", path.display());
        Ok(Config::default())
    }
}
