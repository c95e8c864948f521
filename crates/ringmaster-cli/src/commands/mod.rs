pub mod scheduler;
pub mod serve;

/// Load the engine config, falling back to defaults with a warning on parse
/// failure, matching `ringmaster-daemon::main`'s own fallback policy.
pub fn load_config() -> ringmaster_core::config::Config {
    match ringmaster_core::config::Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load config, using defaults");
            ringmaster_core::config::Config::default()
        }
    }
}
