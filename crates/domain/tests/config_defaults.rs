use hub_domain::config::{AgentKind, Config, ConfigSeverity};

#[test]
fn default_host_is_localhost() {
    let config = Config::default();
    assert_eq!(config.server.host, "127.0.0.1");
    assert!(!config.server.public_bind);
}

#[test]
fn default_turn_tuning() {
    let config = Config::default();
    assert_eq!(config.turn.permission_timeout_ms, 15_000);
    assert_eq!(config.turn.context_recent_turns, 10);
    assert_eq!(config.turn.start_timeout_ms, 8_000);
    assert_eq!(config.cache.idle_ttl_secs, 300);
}

#[test]
fn partial_toml_fills_defaults() {
    let toml_str = r#"
[server]
port = 9999

[[agents]]
id = "codex"
command = "codex-acp"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.server.port, 9999);
    assert_eq!(config.server.host, "127.0.0.1");
    assert_eq!(config.agents.len(), 1);
    assert_eq!(config.agents[0].kind, AgentKind::Acp);
    assert_eq!(config.agents[0].display_name(), "codex");
}

#[test]
fn db_path_defaults_under_home() {
    let config = Config::default();
    let path = config.storage.resolved_db_path();
    assert!(path.ends_with("agent-hub.db"));
}

#[test]
fn acp_agent_without_command_is_an_error() {
    let toml_str = r#"
[[agents]]
id = "broken"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("broken")));
}

#[test]
fn duplicate_agent_ids_rejected() {
    let toml_str = r#"
[[agents]]
id = "codex"
kind = "fake"

[[agents]]
id = "codex"
kind = "fake"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert!(config
        .validate()
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("duplicate")));
}

#[test]
fn bind_addr_honors_public_flag() {
    let mut config = Config::default();
    config.server.port = 4242;
    assert_eq!(config.server.bind_addr(), "127.0.0.1:4242");
    config.server.public_bind = true;
    assert_eq!(config.server.bind_addr(), "0.0.0.0:4242");
}
