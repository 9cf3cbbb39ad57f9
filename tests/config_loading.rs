use std::io::Write;
use std::path::Path;

use fibo_core::config::AppConfig;
use fibo_core::error::FiboError;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[api]
base_url = "https://bria.internal/v2"
api_token = "tok-123"
request_timeout_ms = 5000
mock_mode = true
mock_latency_ms = 0

[api.retry]
max_retries = 5
initial_backoff_ms = 200
max_backoff_ms = 1000

[api.polling]
interval_ms = 250
max_timeout_ms = 10000

[store]
path = "/var/lib/fibo/runs.db"

[log]
filter = "fibo=debug"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.api.base_url, "https://bria.internal/v2");
    assert_eq!(config.api.api_token.as_deref(), Some("tok-123"));
    assert_eq!(config.api.request_timeout_ms, 5000);
    assert!(config.api.mock_mode);
    assert_eq!(config.api.mock_latency_ms, 0);
    assert_eq!(config.api.retry.max_retries, 5);
    assert_eq!(config.api.retry.initial_backoff_ms, 200);
    assert_eq!(config.api.polling.interval_ms, 250);
    assert_eq!(config.api.polling.max_timeout_ms, 10_000);
    assert_eq!(config.store_path(), Path::new("/var/lib/fibo/runs.db"));
    assert_eq!(config.log.filter, "fibo=debug");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_config("[api]\napi_token = \"t\"\n");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.api.base_url, "https://api.bria.ai/v2");
    assert_eq!(config.api.request_timeout_ms, 30_000);
    assert!(!config.api.mock_mode);
    assert_eq!(config.api.retry.max_retries, 3);
    assert_eq!(config.api.polling.interval_ms, 2_000);
    assert_eq!(config.api.polling.max_timeout_ms, 300_000);
    assert_eq!(config.store.path, "~/.fibo/fibo.db");
    assert_eq!(config.log.filter, "fibo=info,warn");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("FIBO_TEST_API_TOKEN", "expanded-token");

    let tmp = write_config("[api]\napi_token = \"${FIBO_TEST_API_TOKEN}\"\n");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.api.api_token.as_deref(), Some("expanded-token"));

    std::env::remove_var("FIBO_TEST_API_TOKEN");
}

#[test]
fn test_missing_file_is_reported_and_defaulted() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");

    assert!(matches!(
        AppConfig::load(&path),
        Err(FiboError::ConfigNotFound(_))
    ));

    let config = AppConfig::load_or_default(&path).expect("defaults");
    assert_eq!(config.api.base_url, "https://api.bria.ai/v2");
}

#[test]
fn test_malformed_config_is_an_error() {
    let tmp = write_config("[api\nbase_url = 3");

    assert!(matches!(
        AppConfig::load(tmp.path()),
        Err(FiboError::Config(_))
    ));
    assert!(AppConfig::load_or_default(tmp.path()).is_err());
}

#[test]
fn test_store_path_expands_home() {
    let tmp = write_config("[store]\npath = \"~/data/fibo.db\"\n");
    let config = AppConfig::load(tmp.path()).expect("load config");

    if let Some(home) = std::env::var_os("HOME") {
        assert_eq!(config.store_path(), Path::new(&home).join("data/fibo.db"));
    }
}

#[test]
fn test_config_round_trips_through_toml() {
    let config = AppConfig::default();
    let rendered = toml::to_string_pretty(&config).expect("render");
    let tmp = write_config(&rendered);

    let reloaded = AppConfig::load(tmp.path()).expect("reload");
    assert_eq!(reloaded.api.base_url, config.api.base_url);
    assert_eq!(reloaded.store.path, config.store.path);
}
