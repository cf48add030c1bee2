//! Integration tests for configuration validation

#![allow(clippy::expect_used)]

use realm_protocol::config::{
    AdmissionConfig, LoggingConfig, LoginConfig, RealmConfig, ServerConfig, UpdateConfig,
};
use std::time::Duration;
use tracing::Level;

#[test]
fn test_default_config_validates() {
    let config = RealmConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_server_address() {
    let mut config = RealmConfig::default();
    config.server.address = "invalid_address".to_string();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Invalid server address")));
}

#[test]
fn test_empty_server_address() {
    let mut config = RealmConfig::default();
    config.server.address = String::new();

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("cannot be empty")));
}

#[test]
fn test_zero_backpressure_limit() {
    let mut config = RealmConfig::default();
    config.server.backpressure_limit = 0;

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Backpressure limit must be greater than 0")));
}

#[test]
fn test_short_connection_timeout() {
    let mut config = RealmConfig::default();
    config.server.connection_timeout = Duration::from_millis(50);

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Connection timeout too short")));
}

#[test]
fn test_short_shutdown_timeout() {
    let mut config = RealmConfig::default();
    config.server.shutdown_timeout = Duration::from_millis(500);

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("Shutdown timeout too short")));
}

#[test]
fn test_population_ceiling() {
    let mut config = RealmConfig::default();
    config.server.max_players = 0;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max players must be greater than 0")));

    // Slot 2047 is the end marker of the player update frame.
    config.server.max_players = 2048;
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max players too large")));

    config.server.max_players = 2047;
    assert!(config.validate().is_empty());
}

#[test]
fn test_zero_admission_limits() {
    let config = AdmissionConfig {
        max_per_host: 0,
        per_interval_cap: 0,
        ..AdmissionConfig::default()
    };

    let errors = config.validate();
    assert_eq!(errors.len(), 2);
}

#[test]
fn test_rsa_enabled_without_key() {
    let config = LoginConfig {
        rsa_enabled: true,
        ..LoginConfig::default()
    };

    let errors = config.validate();
    assert!(errors.iter().any(|e| e.contains("RSA key unusable")));
    assert!(config.policy().is_err());
}

#[test]
fn test_rsa_key_from_decimal() {
    let config = LoginConfig {
        rsa_enabled: true,
        rsa_modulus: "3233".into(),
        rsa_exponent: "2753".into(),
        ..LoginConfig::default()
    };

    assert!(config.validate().is_empty());
    let policy = config.policy().expect("key parses");
    assert!(policy.rsa.is_some());
}

#[test]
fn test_invalid_banned_host() {
    let config = LoginConfig {
        banned_hosts: vec!["10.0.0.1".into(), "not-an-ip".into()],
        ..LoginConfig::default()
    };

    let errors = config.validate();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("not-an-ip"));
    assert_eq!(config.banned_addresses().len(), 1);
}

#[test]
fn test_view_distance_bounds() {
    for distance in [0, 16, -1] {
        let config = UpdateConfig {
            view_distance: distance,
            ..UpdateConfig::default()
        };
        assert!(config
            .validate()
            .iter()
            .any(|e| e.contains("View distance out of range")));
    }
}

#[test]
fn test_max_visible_bounds() {
    let config = UpdateConfig {
        max_visible: 256,
        ..UpdateConfig::default()
    };
    assert!(config
        .validate()
        .iter()
        .any(|e| e.contains("Max visible entities out of range")));
}

#[test]
fn test_empty_app_name() {
    let config = LoggingConfig {
        app_name: String::new(),
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("Application name cannot be empty")));
}

#[test]
fn test_log_to_file_without_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("log_file_path must be specified")));
}

#[test]
fn test_no_logging_outputs() {
    let config = LoggingConfig {
        log_to_console: false,
        log_to_file: false,
        ..LoggingConfig::default()
    };

    let errors = config.validate();
    assert!(errors
        .iter()
        .any(|e| e.contains("At least one logging output")));
}

#[test]
fn test_validate_strict_with_valid_config() {
    let config = RealmConfig::default();
    assert!(config.validate_strict().is_ok());
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = RealmConfig::default();
    config.server.address = "invalid".to_string();

    let result = config.validate_strict();
    assert!(result.is_err());
    let error_msg = result.expect_err("should fail").to_string();
    assert!(error_msg.contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = RealmConfig::default();
    config.server.address = String::new();
    config.server.backpressure_limit = 0;
    config.update.tick_workers = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 4,
        "Should have at least 4 errors, got {}",
        errors.len()
    );
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let config = RealmConfig::from_toml(
        r#"
        [server]
        address = "127.0.0.1:43595"
        connection_timeout = 30000

        [update]
        view_distance = 12

        [logging]
        log_level = "debug"
        "#,
    )
    .expect("partial config parses");

    assert_eq!(config.server.address, "127.0.0.1:43595");
    assert_eq!(config.server.connection_timeout, Duration::from_secs(30));
    assert_eq!(config.server.backpressure_limit, ServerConfig::default().backpressure_limit);
    assert_eq!(config.update.view_distance, 12);
    assert_eq!(config.update.additions_per_tick, 15);
    assert_eq!(config.logging.log_level, Level::DEBUG);
    assert!(config.validate().is_empty());
}

#[test]
fn test_example_config_round_trips() {
    let text = RealmConfig::example_config();
    let parsed = RealmConfig::from_toml(&text).expect("example config parses");
    assert_eq!(parsed.server.address, RealmConfig::default().server.address);
    assert!(parsed.validate().is_empty());
}

#[test]
fn test_valid_production_config() {
    let config = RealmConfig::default_with_overrides(|c| {
        c.server.address = "0.0.0.0:43594".into();
        c.server.max_players = 2000;
        c.admission.max_per_host = 3;
        c.login.auto_register = false;
        c.logging.log_level = Level::WARN;
        c.logging.json_format = true;
    });

    let errors = config.validate();
    assert!(errors.is_empty(), "Production config should be valid: {errors:?}");
}
