use std::sync::Arc;

use anyhow::Result;
use ringmaster_core::config::Config;
use ringmaster_core::event::EventBus;
use ringmaster_core::output_buffer::OutputBuffer;
use ringmaster_core::reasoning_bank::ReasoningBank;
use ringmaster_core::store::InMemoryStore;
use ringmaster_harness::shutdown::ShutdownSignal;
use ringmaster_session::pty_pool::PtyPool;
use tracing::info;

use crate::executor::WorkerExecutor;
use crate::scheduler::{Scheduler, SchedulerConfig};

/// The running engine: store, event bus, output buffer, reasoning bank, and
/// the scheduler/executor pair that drains the work queue. Bound to a
/// concrete `InMemoryStore` — grounded on the teacher's `Daemon` owning a
/// single cache handle, generalized from `CacheDb` to the new repository
/// layer (C1).
pub struct Daemon {
    config: Config,
    store: InMemoryStore,
    event_bus: EventBus,
    output_buffer: Arc<OutputBuffer>,
    reasoning_bank: Arc<ReasoningBank>,
    scheduler: Arc<Scheduler<InMemoryStore>>,
    shutdown: ShutdownSignal,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        let store = InMemoryStore::new();
        let event_bus = EventBus::new();
        let output_buffer = Arc::new(OutputBuffer::new());
        let reasoning_bank = Arc::new(ReasoningBank::new());
        let pty_pool = Arc::new(PtyPool::new(config.agents.max_concurrent as usize));

        let executor = Arc::new(
            WorkerExecutor::new(
                store.clone(),
                event_bus.clone(),
                Arc::clone(&output_buffer),
                pty_pool,
                Arc::clone(&reasoning_bank),
            )
            .with_worktrees(true)
            .with_enrichment_config(config.enrichment.clone()),
        );

        let scheduler_config = SchedulerConfig {
            max_concurrent_tasks: config.scheduler.max_concurrent_tasks,
            poll_interval: std::time::Duration::from_secs(config.scheduler.poll_interval_secs),
            health_check_grace: std::time::Duration::from_secs(config.scheduler.grace_period_secs),
        };
        let scheduler = Arc::new(Scheduler::new(
            store.clone(),
            executor,
            event_bus.clone(),
            Arc::clone(&reasoning_bank),
            scheduler_config,
        ));

        Self {
            config,
            store,
            event_bus,
            output_buffer,
            reasoning_bank,
            scheduler,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn store(&self) -> &InMemoryStore {
        &self.store
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn output_buffer(&self) -> &Arc<OutputBuffer> {
        &self.output_buffer
    }

    pub fn reasoning_bank(&self) -> &Arc<ReasoningBank> {
        &self.reasoning_bank
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Runs the scheduler poll loop until shutdown is triggered.
    pub async fn run(&self) -> Result<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let run_handle = tokio::spawn(async move {
            scheduler.run().await;
        });

        let hot_reload_handle = self.config.daemon.hot_reload.then(|| {
            let root = self
                .config
                .general
                .workspace_root
                .clone()
                .unwrap_or_else(|| ".".to_string());
            let mut shutdown_rx = self.shutdown.subscribe();
            tokio::task::spawn_blocking(move || run_hot_reload_watch(root, &mut shutdown_rx))
        });

        let mut shutdown_rx = self.shutdown.subscribe();
        shutdown_rx.recv().await.ok();
        info!("shutdown signal received, stopping scheduler");
        self.scheduler.stop().await;
        run_handle.abort();
        if let Some(handle) = hot_reload_handle {
            handle.abort();
        }
        Ok(())
    }
}

/// Blocking loop for the optional hot-reload subsystem (SPEC_FULL.md
/// §4.13): watches `root` and, on a detected change, re-reads the config
/// file and logs a `ReloadRecord`. Runs on a dedicated blocking thread
/// since `notify`'s watcher callback and `FileWatcher::recv_events` are
/// synchronous; in-flight executors are never interrupted by a reload.
fn run_hot_reload_watch(
    root: String,
    shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>,
) {
    use ringmaster_core::file_watcher::{FileWatcher, FileWatcherConfig, ReloadRecord};

    let mut watcher = match FileWatcher::new(FileWatcherConfig {
        root_path: root.clone().into(),
        ..FileWatcherConfig::default()
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "hot-reload: failed to start file watcher");
            return;
        }
    };
    if let Err(e) = watcher.add_watch(&root) {
        tracing::warn!(error = %e, root = %root, "hot-reload: failed to watch root");
        return;
    }
    info!(root = %root, "hot-reload subsystem watching for config changes");

    loop {
        if shutdown_rx.try_recv().is_ok() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(500));
        let events = watcher.recv_events();
        if events.is_empty() {
            continue;
        }
        let files_changed: Vec<String> = events.iter().map(|e| e.path.clone()).collect();
        let record = match ringmaster_core::config::Config::load() {
            Ok(_) => ReloadRecord {
                trigger: "file_change".to_string(),
                files_changed,
                applied: true,
                error: None,
            },
            Err(e) => ReloadRecord {
                trigger: "file_change".to_string(),
                files_changed,
                applied: false,
                error: Some(e.to_string()),
            },
        };
        if record.applied {
            info!(files = ?record.files_changed, "hot-reload: config reloaded");
        } else {
            tracing::warn!(
                files = ?record.files_changed,
                error = ?record.error,
                "hot-reload: config reload failed"
            );
        }
    }
}
