use pretty_assertions::assert_eq;
use secrelo_session::{SessionConfig, SessionError};
use std::time::Duration;

#[test]
fn default_timeouts() {
    let config = SessionConfig::default();
    assert_eq!(config.vault_idle_timeout(), Duration::from_secs(30 * 60));
    assert_eq!(config.idle_check_interval(), Duration::from_secs(60));
    assert_eq!(config.auth_idle_timeout(), Duration::from_secs(5 * 60));
    assert_eq!(config.worker_queue_depth, 4);
    assert!(config.validate().is_ok());
}

#[test]
fn zero_values_are_rejected() {
    let zero_vault = SessionConfig {
        vault_idle_timeout_secs: 0,
        ..SessionConfig::default()
    };
    let zero_interval = SessionConfig {
        idle_check_interval_secs: 0,
        ..SessionConfig::default()
    };
    let zero_queue = SessionConfig {
        worker_queue_depth: 0,
        ..SessionConfig::default()
    };

    for config in [zero_vault, zero_interval, zero_queue] {
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }
}

#[test]
fn check_interval_must_not_exceed_shortest_timeout() {
    let config = SessionConfig {
        auth_idle_timeout_secs: 30,
        idle_check_interval_secs: 60,
        ..SessionConfig::default()
    };
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("30s"), "got: {err}");

    let ok = SessionConfig {
        auth_idle_timeout_secs: 60,
        idle_check_interval_secs: 60,
        ..SessionConfig::default()
    };
    assert!(ok.validate().is_ok());
}

#[test]
fn config_roundtrips_through_json() {
    let json = r#"{
        "vault_idle_timeout_secs": 900,
        "idle_check_interval_secs": 30,
        "auth_idle_timeout_secs": 600,
        "worker_queue_depth": 2
    }"#;
    let config: SessionConfig = serde_json::from_str(json).unwrap();
    assert_eq!(config.vault_idle_timeout(), Duration::from_secs(900));
    assert_eq!(config.worker_queue_depth, 2);

    let back: SessionConfig = serde_json::from_str(&serde_json::to_string(&config).unwrap()).unwrap();
    assert_eq!(back, config);
}
