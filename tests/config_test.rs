//! Configuration defaults and validation

use history_merge::config::{AppConfig, DatabaseConfig, LoggingConfig, MergeConfig, ScanConfig};

#[test]
fn test_default_database_config() {
    let config = AppConfig::default();

    assert_eq!(config.database.pool_size, 4);
    assert_eq!(config.database.busy_timeout_ms, 5000);
}

#[test]
fn test_default_logging_config() {
    let config = AppConfig::default();

    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.file_path, None);
    assert_eq!(config.logging.format, "text");
}

#[test]
fn test_default_scan_and_merge_config() {
    let config = AppConfig::default();

    assert_eq!(config.scan.message_page_size, 5000);
    assert_eq!(config.scan.max_query_params, 999);
    assert!(config.merge.transaction_per_conversation);
}

#[test]
fn test_validate_rejects_zero_pool() {
    let mut config = AppConfig::default();
    config.database = DatabaseConfig {
        pool_size: 0,
        busy_timeout_ms: 100,
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_unknown_log_level() {
    let mut config = AppConfig::default();
    config.logging = LoggingConfig {
        level: "verbose".to_string(),
        file_path: None,
        format: "text".to_string(),
    };
    assert!(config.validate().is_err());

    config.logging.level = "debug".to_string();
    config.logging.format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_scan_limits() {
    let mut config = AppConfig::default();
    config.scan = ScanConfig {
        message_page_size: 0,
        max_query_params: 999,
    };
    assert!(config.validate().is_err());

    config.scan = ScanConfig {
        message_page_size: 100,
        max_query_params: 0,
    };
    assert!(config.validate().is_err());

    config.scan.max_query_params = 500;
    config.merge = MergeConfig {
        transaction_per_conversation: false,
    };
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_serialization_round_trip() {
    let config = AppConfig::default();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: AppConfig = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.scan.max_query_params, config.scan.max_query_params);
    assert_eq!(parsed.logging.level, config.logging.level);
}

#[test]
fn test_load_uses_defaults() {
    let config = AppConfig::load().expect("defaults should load");
    assert!(config.validate().is_ok());
}
