//! Unit tests for runtime configuration parsing.

use acp_conduit::framing::envelope::IdPolicy;
use acp_conduit::RuntimeConfig;

#[test]
fn empty_config_yields_all_defaults() {
    let config = RuntimeConfig::from_toml_str("").expect("empty config must parse");
    assert_eq!(config.id_policy, IdPolicy::Lenient);
    assert_eq!(config.terminal.default_byte_limit, 1_000_000);
    assert_eq!(config.terminal.released_capacity, 50);
    assert!(config.noise_prefix_limit.is_none());
    assert!(config.supervisor.registry_path.is_none());
}

#[test]
fn strict_id_policy_is_parsed() {
    let config = RuntimeConfig::from_toml_str("id_policy = \"strict\"\n")
        .expect("config must parse");
    assert_eq!(config.id_policy, IdPolicy::Strict);
}

#[test]
fn terminal_section_overrides_defaults() {
    let toml = r#"
[terminal]
default_byte_limit = 4096
released_capacity = 5
"#;
    let config = RuntimeConfig::from_toml_str(toml).expect("config must parse");
    assert_eq!(config.terminal.default_byte_limit, 4096);
    assert_eq!(config.terminal.released_capacity, 5);
}

#[test]
fn supervisor_section_is_parsed() {
    let toml = r#"
[supervisor]
kill_grace_ms = 500
registry_path = "/tmp/test-registry.json"
"#;
    let config = RuntimeConfig::from_toml_str(toml).expect("config must parse");
    assert_eq!(config.supervisor.kill_grace_ms, Some(500));
    assert_eq!(
        config.supervisor.registry_path.as_deref(),
        Some(std::path::Path::new("/tmp/test-registry.json"))
    );
}

#[test]
fn zero_byte_limit_is_rejected() {
    let toml = "[terminal]\ndefault_byte_limit = 0\n";
    assert!(RuntimeConfig::from_toml_str(toml).is_err());
}

#[test]
fn unknown_id_policy_is_rejected() {
    assert!(RuntimeConfig::from_toml_str("id_policy = \"permissive\"\n").is_err());
}
