use ringmaster_core::config::Config;

#[test]
fn default_config() {
    let cfg = Config::default();
    assert_eq!(cfg.general.project_name, "ringmaster");
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.store.backend, "memory");
    assert_eq!(cfg.agents.max_concurrent, 8);
    assert_eq!(cfg.scheduler.max_concurrent_tasks, 4);
    assert_eq!(cfg.scheduler.poll_interval_secs, 2);
    assert_eq!(cfg.enrichment.max_context_tokens, 100_000);
    assert_eq!(cfg.daemon.port, 9876);
    assert_eq!(cfg.daemon.host, "127.0.0.1");
    assert!(cfg.security.sandbox);
    assert!(!cfg.security.allow_shell_exec);
}

#[test]
fn config_roundtrip() {
    let cfg = Config::default();
    let toml_str = cfg.to_toml().expect("serialize to toml");
    assert!(toml_str.contains("ringmaster"));

    let parsed: Config = toml::from_str(&toml_str).expect("parse toml back");
    assert_eq!(parsed.general.project_name, cfg.general.project_name);
    assert_eq!(parsed.daemon.port, cfg.daemon.port);
    assert_eq!(parsed.enrichment.max_context_tokens, cfg.enrichment.max_context_tokens);
    assert_eq!(parsed.bridge.output_stream_buffer, cfg.bridge.output_stream_buffer);
    parsed.validate().expect("config validates");
}

#[test]
fn config_partial_toml() {
    let partial = r#"
[general]
project_name = "my-project"

[daemon]
port = 1234
"#;
    let cfg: Config = toml::from_str(partial).expect("parse partial");
    assert_eq!(cfg.general.project_name, "my-project");
    assert_eq!(cfg.daemon.port, 1234);
    // defaults should fill in the rest
    assert_eq!(cfg.general.log_level, "info");
    assert_eq!(cfg.scheduler.max_concurrent_tasks, 4);
    cfg.validate().expect("config validates");
}

#[test]
fn invalid_max_concurrent_tasks_fails_validation() {
    let mut cfg = Config::default();
    cfg.scheduler.max_concurrent_tasks = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("max_concurrent_tasks"));
}

#[test]
fn invalid_max_context_tokens_fails_validation() {
    let mut cfg = Config::default();
    cfg.enrichment.max_context_tokens = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("max_context_tokens"));
}

#[test]
fn invalid_max_concurrent_agents_fails_validation() {
    let mut cfg = Config::default();
    cfg.agents.max_concurrent = 0;
    let err = cfg.validate().expect_err("validation should fail");
    assert!(err.to_string().contains("max_concurrent"));
}
