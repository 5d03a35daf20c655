// Config loading and validation tests

use mapstats::config::AppConfig;

const VALID_CONFIG: &str = r#"
[server]
port = 8081
host = "0.0.0.0"

[database]
path = "data/stats.db"
max_pool_size = 5
vacuum_interval_secs = 86400

[chart]
bucket_width_minutes = 120
cache_ttl_secs = 300
default_bias_exponent = 1.0
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.server.port, 8081);
    assert_eq!(config.server.host, "0.0.0.0");
    assert_eq!(config.database.path, "data/stats.db");
    assert_eq!(config.database.max_pool_size, 5);
    assert_eq!(config.chart.bucket_width_minutes, 120);
    assert_eq!(config.chart.cache_ttl_secs, 300);
    assert_eq!(config.chart.default_bias_exponent, 1.0);
}

#[test]
fn test_config_chart_section_is_optional() {
    let minimal = r#"
[server]
port = 8081
host = "127.0.0.1"

[database]
path = "data/stats.db"
max_pool_size = 5
"#;
    let config = AppConfig::load_from_str(minimal).expect("load_from_str");
    assert_eq!(config.chart.bucket_width_minutes, 120);
    assert_eq!(config.chart.cache_ttl_secs, 300);
    assert_eq!(config.chart.default_bias_exponent, 1.0);
    assert_eq!(config.database.vacuum_interval_secs, 86_400);
    assert!(config.database.vacuum_schedule.is_none());
}

#[test]
fn test_config_validation_rejects_invalid_port() {
    let bad = VALID_CONFIG.replace("port = 8081", "port = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("server.port"));
}

#[test]
fn test_config_validation_rejects_empty_db_path() {
    let bad = VALID_CONFIG.replace("path = \"data/stats.db\"", "path = \"\"");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("database.path"));
}

#[test]
fn test_config_validation_rejects_max_pool_size_zero() {
    let bad = VALID_CONFIG.replace("max_pool_size = 5", "max_pool_size = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("max_pool_size"));
}

#[test]
fn test_config_validation_rejects_zero_bucket_width() {
    let bad = VALID_CONFIG.replace("bucket_width_minutes = 120", "bucket_width_minutes = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("bucket_width_minutes"));
}

#[test]
fn test_config_validation_rejects_out_of_range_bias() {
    let bad = VALID_CONFIG.replace("default_bias_exponent = 1.0", "default_bias_exponent = 10.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("default_bias_exponent"));
}
