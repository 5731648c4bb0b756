use std::time::Duration;

use relayq::{ConfigError, QueueConfig};

#[test]
fn defaults_pass_validation() {
    let config = QueueConfig::new("orders");
    assert!(config.validate().is_ok());
    assert_eq!(config.name, "orders");
    assert_eq!(config.pop_timeout, Duration::from_secs(5));
    assert_eq!(config.reap_interval, Duration::from_secs(5));
}

#[test]
fn empty_name_is_rejected() {
    let config = QueueConfig::new("");
    assert!(matches!(config.validate(), Err(ConfigError::EmptyName)));
}

#[test]
fn state_ttl_must_clear_the_lock_by_more_than_a_minute() {
    // 60s TTL against a 10s lock leaves only 50s of margin.
    let mut config = QueueConfig::new("orders");
    config.state_ttl = Duration::from_secs(60);
    config.lock_ttl = Duration::from_secs(10);
    assert!(matches!(
        config.validate(),
        Err(ConfigError::TtlMargin { .. })
    ));
}

#[test]
fn ttl_margin_boundary_is_strict() {
    let mut config = QueueConfig::new("orders");
    config.lock_ttl = Duration::from_secs(10);

    // Exactly sixty seconds of margin is still too little.
    config.state_ttl = Duration::from_secs(70);
    assert!(config.validate().is_err());

    config.state_ttl = Duration::from_secs(71);
    assert!(config.validate().is_ok());
}

#[test]
fn from_env_requires_a_name_and_applies_overrides() {
    // Single test for all env interaction so parallel tests never race on
    // the process environment.
    unsafe {
        std::env::remove_var("RELAYQ_NAME");
    }
    assert!(QueueConfig::from_env().is_err());

    unsafe {
        std::env::set_var("RELAYQ_NAME", "env-orders");
        std::env::set_var("RELAYQ_LOCK_SECONDS", "120");
        std::env::set_var("RELAYQ_HANDLER_CAPACITY", "8");
    }
    let config = QueueConfig::from_env().expect("name is set");
    assert_eq!(config.name, "env-orders");
    assert_eq!(config.lock_ttl, Duration::from_secs(120));
    assert_eq!(config.handler_capacity, 8);
    // Untouched variables keep their defaults.
    assert_eq!(config.pop_timeout, Duration::from_secs(5));

    unsafe {
        std::env::set_var("RELAYQ_LOCK_SECONDS", "not-a-number");
    }
    assert!(QueueConfig::from_env().is_err());

    unsafe {
        std::env::remove_var("RELAYQ_NAME");
        std::env::remove_var("RELAYQ_LOCK_SECONDS");
        std::env::remove_var("RELAYQ_HANDLER_CAPACITY");
    }
}
