use scheduler_core::config::*;
use std::env;
use std::fs;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    // 验证默认值
    assert_eq!(config.database.max_connections, 10);
    assert_eq!(config.event_source.r#type, EventSourceType::Rabbitmq);
    assert_eq!(config.event_source.exchange, "celeryev");
    assert_eq!(config.event_source.routing_key, "#");
    assert_eq!(config.beacon.poll_interval_seconds, 5);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[database]
url = "postgresql://test:5432/scheduler_test"
max_connections = 15
min_connections = 2
connection_timeout_seconds = 30
idle_timeout_seconds = 600

[event_source]
type = "channel"

[ingest]
partitions = 2
channel_capacity = 16
max_apply_attempts = 5
retry_backoff_ms = 1
shutdown_timeout_seconds = 3

[beacon]
poll_interval_seconds = 1

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.database.url, "postgresql://test:5432/scheduler_test");
    assert_eq!(config.database.max_connections, 15);
    assert_eq!(config.event_source.r#type, EventSourceType::Channel);
    // 未给出的字段取默认值
    assert_eq!(config.event_source.exchange, "celeryev");
    assert_eq!(config.ingest.partitions, 2);
    assert_eq!(config.ingest.max_apply_attempts, 5);
    assert_eq!(config.beacon.poll_interval_seconds, 1);
    assert_eq!(config.observability.log_format, "json");
}

#[test]
fn test_config_validation_database() {
    let mut config = AppConfig::default();

    // 测试空URL
    config.database.url = "".to_string();
    assert!(config.validate().is_err());

    // 测试无效URL格式
    config.database.url = "mysql://localhost/test".to_string();
    assert!(config.validate().is_err());

    // 测试有效URL
    config.database.url = "postgresql://localhost/test".to_string();
    assert!(config.validate().is_ok());
    config.database.url = "sqlite::memory:".to_string();
    assert!(config.validate().is_ok());

    // 测试连接数配置
    config.database.max_connections = 0;
    assert!(config.validate().is_err());

    config.database.max_connections = 10;
    config.database.min_connections = 15;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_event_source() {
    let mut config = AppConfig::default();

    config.event_source.url = "http://localhost".to_string();
    assert!(config.validate().is_err());

    config.event_source.url = "amqps://broker:5671/%2f".to_string();
    assert!(config.validate().is_ok());

    config.event_source.exchange = "".to_string();
    assert!(config.validate().is_err());

    // 进程内通道不需要连接参数
    config.event_source.r#type = EventSourceType::Channel;
    assert!(config.validate().is_ok());
}

#[test]
fn test_config_validation_ingest() {
    let mut config = AppConfig::default();

    config.ingest.partitions = 0;
    assert!(config.validate().is_err());

    config.ingest.partitions = 1;
    config.ingest.channel_capacity = 0;
    assert!(config.validate().is_err());

    config.ingest.channel_capacity = 8;
    config.ingest.max_apply_attempts = 0;
    assert!(config.validate().is_err());

    config.ingest.max_apply_attempts = 1;
    assert!(config.validate().is_ok());

    config.beacon.poll_interval_seconds = 0;
    assert!(config.validate().is_err());
}

#[test]
fn test_config_validation_observability() {
    let mut config = AppConfig::default();

    config.observability.log_level = "invalid".to_string();
    assert!(config.validate().is_err());

    config.observability.log_level = "debug".to_string();
    assert!(config.validate().is_ok());

    config.observability.log_format = "xml".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_config_load_from_file() {
    let toml_content = r#"
[database]
url = "postgresql://file-test:5432/scheduler"
max_connections = 25

[event_source]
queue = "beat.events"
"#;

    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), toml_content).unwrap();

    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap())).unwrap();

    assert_eq!(config.database.url, "postgresql://file-test:5432/scheduler");
    assert_eq!(config.database.max_connections, 25);
    assert_eq!(config.event_source.queue, "beat.events");
}

#[test]
fn test_config_load_nonexistent_file() {
    let result = AppConfig::load(Some("/nonexistent/config.toml"));
    assert!(result.is_err());
}

#[test]
fn test_config_environment_override() {
    let temp_file = NamedTempFile::new().unwrap();
    fs::write(temp_file.path(), "[beacon]\npoll_interval_seconds = 9\n").unwrap();

    env::set_var("SCHEDULER_BEACON__POLL_INTERVAL_SECONDS", "42");
    let config = AppConfig::load(Some(temp_file.path().to_str().unwrap()));
    env::remove_var("SCHEDULER_BEACON__POLL_INTERVAL_SECONDS");

    assert_eq!(config.unwrap().beacon.poll_interval_seconds, 42);
}

#[test]
fn test_config_to_toml() {
    let config = AppConfig::default();
    let toml_str = config.to_toml().unwrap();

    let parsed_config = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(config.database.url, parsed_config.database.url);
    assert_eq!(config.event_source.r#type, parsed_config.event_source.r#type);
    assert_eq!(config.ingest.partitions, parsed_config.ingest.partitions);
}

#[test]
fn test_invalid_toml_format() {
    let invalid_toml = r#"
[database
url = "invalid toml
"#;

    let result = AppConfig::from_toml(invalid_toml);
    assert!(result.is_err());
}

#[test]
fn test_log_levels() {
    let mut config = AppConfig::default();

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    for level in &valid_levels {
        config.observability.log_level = level.to_string();
        assert!(config.validate().is_ok(), "日志级别 {level} 应该有效");
    }
}
