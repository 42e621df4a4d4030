//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and validates environment
//! overrides. Config::from_env() also loads a .env file via dotenvy, so the
//! tests set every variable they assert on and remove it afterwards.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use mcp_cascade_impact::config::{Config, LogFormat, StorageBackend};
use serial_test::serial;
use std::env;

fn clear(keys: &[&str]) {
    for key in keys {
        env::remove_var(key);
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    clear(&[
        "STORAGE_BACKEND",
        "FORECAST_BASE_URL",
        "EVIDENCE_ENDPOINTS",
        "CASCADE_PROBABILITY_CAP",
    ]);

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.backend, StorageBackend::Memory);
    assert!(config.forecasting.base_url.is_none());
    assert!(config.discovery.evidence_endpoints.is_empty());
    assert_eq!(config.cascade.probability_cap, 0.95);
    assert_eq!(config.blast_radius.tier1_secs, 120.0);
}

#[test]
#[serial]
fn test_config_from_env_sqlite_backend() {
    env::set_var("STORAGE_BACKEND", "SQLite");
    env::set_var("DATABASE_PATH", "/custom/graph.db");
    env::set_var("DATABASE_MAX_CONNECTIONS", "10");

    let config = Config::from_env().unwrap();
    assert_eq!(config.database.backend, StorageBackend::Sqlite);
    assert_eq!(config.database.path.to_str().unwrap(), "/custom/graph.db");
    assert_eq!(config.database.max_connections, 10);

    clear(&["STORAGE_BACKEND", "DATABASE_PATH", "DATABASE_MAX_CONNECTIONS"]);
}

#[test]
#[serial]
fn test_config_from_env_json_log_format() {
    env::set_var("LOG_FORMAT", "json");

    let config = Config::from_env().unwrap();
    assert_eq!(config.logging.format, LogFormat::Json);

    clear(&["LOG_FORMAT"]);
}

#[test]
#[serial]
fn test_config_from_env_forecasting() {
    env::set_var("FORECAST_BASE_URL", "http://forecast.local");
    env::set_var("FORECAST_API_KEY", "secret");
    env::set_var("FORECAST_HORIZON_MINUTES", "15");

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.forecasting.base_url.as_deref(),
        Some("http://forecast.local")
    );
    assert_eq!(config.forecasting.api_key.as_deref(), Some("secret"));
    assert_eq!(config.forecasting.horizon_minutes, 15);

    clear(&["FORECAST_BASE_URL", "FORECAST_API_KEY", "FORECAST_HORIZON_MINUTES"]);
}

#[test]
#[serial]
fn test_config_from_env_empty_forecast_url_is_unset() {
    env::set_var("FORECAST_BASE_URL", "");

    let config = Config::from_env().unwrap();
    assert!(config.forecasting.base_url.is_none());

    clear(&["FORECAST_BASE_URL"]);
}

#[test]
#[serial]
fn test_config_from_env_evidence_endpoints() {
    env::set_var(
        "EVIDENCE_ENDPOINTS",
        "traffic=http://mesh.local, logs=http://logs.local",
    );

    let config = Config::from_env().unwrap();
    assert_eq!(
        config.discovery.evidence_endpoints,
        vec![
            ("traffic".to_string(), "http://mesh.local".to_string()),
            ("logs".to_string(), "http://logs.local".to_string()),
        ]
    );

    clear(&["EVIDENCE_ENDPOINTS"]);
}

#[test]
#[serial]
fn test_config_from_env_malformed_endpoint_fails() {
    env::set_var("EVIDENCE_ENDPOINTS", "traffic");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("EVIDENCE_ENDPOINTS"));

    clear(&["EVIDENCE_ENDPOINTS"]);
}

#[test]
#[serial]
fn test_config_from_env_rejects_probability_cap() {
    env::set_var("CASCADE_PROBABILITY_CAP", "1.5");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("CASCADE_PROBABILITY_CAP"));

    clear(&["CASCADE_PROBABILITY_CAP"]);
}

#[test]
#[serial]
fn test_config_from_env_rejects_unordered_tiers() {
    env::set_var("BLAST_TIER2_SECS", "60");

    assert!(Config::from_env().is_err());

    clear(&["BLAST_TIER2_SECS"]);
}

#[test]
#[serial]
fn test_config_from_env_discovery_toggle() {
    env::set_var("DISCOVERY_ENABLED", "false");
    env::set_var("DISCOVERY_INTERVAL_SECS", "60");
    env::set_var("DEPENDENCY_MANIFEST_PATH", "./deps.json");

    let config = Config::from_env().unwrap();
    assert!(!config.discovery.enabled);
    assert_eq!(config.discovery.interval_secs, 60);
    assert_eq!(
        config.discovery.manifest_path.as_deref(),
        Some(std::path::Path::new("./deps.json"))
    );

    clear(&[
        "DISCOVERY_ENABLED",
        "DISCOVERY_INTERVAL_SECS",
        "DEPENDENCY_MANIFEST_PATH",
    ]);
}

#[test]
#[serial]
fn test_config_from_env_rejects_zero_discovery_interval() {
    env::set_var("DISCOVERY_ENABLED", "true");
    env::set_var("DISCOVERY_INTERVAL_SECS", "0");

    let err = Config::from_env().unwrap_err();
    assert!(err.to_string().contains("DISCOVERY_INTERVAL_SECS"));

    // A zero interval is harmless when the loop never runs.
    env::set_var("DISCOVERY_ENABLED", "false");
    let config = Config::from_env().unwrap();
    assert_eq!(config.discovery.interval_secs, 0);

    clear(&["DISCOVERY_ENABLED", "DISCOVERY_INTERVAL_SECS"]);
}

#[test]
#[serial]
fn test_config_from_env_invalid_number_falls_back() {
    env::set_var("CASCADE_MAX_PATHS", "many");

    let config = Config::from_env().unwrap();
    assert_eq!(config.cascade.max_paths, 10);

    clear(&["CASCADE_MAX_PATHS"]);
}
