//! Integration tests for the configuration system

use super::test_utils::ApiError;
use query_router::config::{ConfigLoader, EngineConfig, RouterConfig};
use query_router::{ConfigError, MemoryEngine, NamespaceAllocator, Query, QueryOptions, RouterDefinition};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_load_from_file_reads_engine_and_logging() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("router.toml");
    std::fs::write(
        &config_file,
        r#"
[engine]
retry = 2
stale_time_ms = 30000

[logging]
level = "debug"
format = "json"
output = "stderr"

[logging.modules]
query_router = "trace"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    assert_eq!(
        config.engine,
        EngineConfig {
            retry: 2,
            stale_time_ms: Some(30_000),
        }
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.output, "stderr");
    assert_eq!(
        config.logging.modules.get("query_router"),
        Some(&"trace".to_string())
    );
}

#[test]
fn test_invalid_logging_output_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("router.toml");
    std::fs::write(&config_file, "[logging]\noutput = \"syslog\"\n").unwrap();

    let result = ConfigLoader::load_from_file(&config_file);
    assert!(matches!(result, Err(ConfigError::Invalid(_))));
}

#[test]
fn test_project_files_without_env_use_development() {
    let temp_dir = TempDir::new().unwrap();
    let config_dir = temp_dir.path().join("config");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("development.toml"), "[engine]\nretry = 3\n").unwrap();

    let config = ConfigLoader::load_with_env(temp_dir.path(), HashMap::new()).unwrap();
    assert_eq!(config.engine.retry, 3);
    assert_eq!(config.logging, RouterConfig::default().logging);
}

#[tokio::test]
async fn test_engine_built_from_config_retries_failed_fetches() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("router.toml");
    std::fs::write(&config_file, "[engine]\nretry = 2\n").unwrap();
    let config = ConfigLoader::load_from_file(&config_file).unwrap();
    let engine = MemoryEngine::with_config(&config.engine);

    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let router = RouterDefinition::new()
        .query(
            "flaky",
            Query::new(move |_: ()| {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(ApiError("unavailable".to_string()))
                    } else {
                        Ok(attempt)
                    }
                }
            }),
        )
        .compose(&NamespaceAllocator::new())
        .unwrap();

    let state = router
        .query::<(), usize, ApiError>("flaky")
        .unwrap()
        .invoke(&engine, (), QueryOptions::new())
        .await
        .unwrap();

    assert!(state.is_success());
    assert_eq!(state.data, Some(2));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}
