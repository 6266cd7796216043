use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use taskrelay::cli::config::{Overrides, RelayConfig, Settings, StoreKind, default_workers};
use taskrelay::workers::DispatchMode;
use tempfile::NamedTempFile;

#[test]
fn load_valid_config_all_fields() {
    let yaml = r#"
host: "127.0.0.1"
port: 8080
dispatch_mode: poll
store: sqlite
store_dir: "custom/tasks"
database_url: "sqlite:custom.db"
event_bus_url: "http://broker:9000/events"
poll_interval_s: 0.5
dispatch_deadline_s: 60
max_retries: 5
backoff_s: 1.5
max_steps: 12
max_concurrent_polls: 4
http_timeout_s: 3
max_body: 2097152
workers:
  agent_a:
    base_url: "http://weather:7001"
    compute_path: "/forecast"
"#;

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let cfg = RelayConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.host.as_deref(), Some("127.0.0.1"));
    assert_eq!(cfg.port, Some(8080));
    assert_eq!(cfg.dispatch_mode, Some(DispatchMode::Poll));
    assert_eq!(cfg.store, Some(StoreKind::Sqlite));
    assert_eq!(cfg.store_dir.as_deref(), Some("custom/tasks"));
    assert_eq!(cfg.database_url.as_deref(), Some("sqlite:custom.db"));
    assert_eq!(cfg.event_bus_url.as_deref(), Some("http://broker:9000/events"));
    assert_eq!(cfg.poll_interval_s, Some(0.5));
    assert_eq!(cfg.dispatch_deadline_s, Some(60.0));
    assert_eq!(cfg.max_retries, Some(5));
    assert_eq!(cfg.max_steps, Some(12));
    assert_eq!(cfg.max_concurrent_polls, Some(4));
    assert_eq!(cfg.max_body, Some(2097152));

    let workers = cfg.workers.unwrap();
    let weather = &workers["agent_a"];
    assert_eq!(weather.base_url, "http://weather:7001");
    assert_eq!(weather.compute_path, "/forecast");
    assert_eq!(weather.rpc_path, "/jsonrpc");
}

#[test]
fn load_partial_config() {
    let yaml = r#"
port: 9090
"#;

    let mut f = NamedTempFile::new().unwrap();
    f.write_all(yaml.as_bytes()).unwrap();

    let cfg = RelayConfig::load(Some(f.path())).unwrap();

    assert_eq!(cfg.port, Some(9090));
    assert!(cfg.host.is_none());
    assert!(cfg.dispatch_mode.is_none());
    assert!(cfg.store.is_none());
    assert!(cfg.workers.is_none());
    assert!(cfg.max_body.is_none());
}

#[test]
fn empty_file_is_all_defaults() {
    let cfg = RelayConfig::from_yaml("   \n").unwrap();
    assert!(cfg.port.is_none());
    assert!(cfg.workers.is_none());
}

#[test]
fn missing_explicit_path_returns_error() {
    let result = RelayConfig::load(Some(std::path::Path::new("/nonexistent/taskrelay.yaml")));
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Config file not found")
    );
}

#[test]
fn invalid_yaml_returns_error() {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(b"dispatch_mode: carrier_pigeon\n").unwrap();

    let err = RelayConfig::load(Some(f.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"), "{err}");
}

#[test]
fn resolve_uses_defaults() {
    let settings = Settings::resolve(Overrides::default(), RelayConfig::default());

    assert_eq!(settings.host, "0.0.0.0");
    assert_eq!(settings.port, 50000);
    assert_eq!(settings.dispatch_mode, DispatchMode::Direct);
    assert_eq!(settings.store, StoreKind::Json);
    assert_eq!(settings.store_dir, PathBuf::from("data/tasks"));
    assert_eq!(settings.poll_interval, Duration::from_secs(2));
    assert_eq!(settings.dispatch_deadline, Duration::from_secs(300));
    assert_eq!(settings.retry.max_retries, 3);
    assert_eq!(settings.max_steps, 32);
    assert_eq!(settings.max_body, 1_048_576);
    assert!(settings.event_bus_url.is_none());
    assert_eq!(settings.workers.len(), default_workers().len());
}

#[test]
fn overrides_beat_the_file() {
    let file = RelayConfig::from_yaml(
        r#"
host: "10.0.0.1"
port: 8080
dispatch_mode: poll
store: sqlite
"#,
    )
    .unwrap();
    let overrides = Overrides {
        port: Some(9000),
        dispatch_mode: Some(DispatchMode::Event),
        ..Default::default()
    };

    let settings = Settings::resolve(overrides, file);

    assert_eq!(settings.host, "10.0.0.1");
    assert_eq!(settings.port, 9000);
    assert_eq!(settings.dispatch_mode, DispatchMode::Event);
    assert_eq!(settings.store, StoreKind::Sqlite);
}

#[test]
fn worker_endpoints_extend_defaults() {
    let file = RelayConfig::from_yaml(
        r#"
workers:
  agent_b:
    base_url: "http://transport:7002"
  translator:
    base_url: "http://translator:7009"
"#,
    )
    .unwrap();

    let settings = Settings::resolve(Overrides::default(), file);

    assert_eq!(settings.workers.len(), default_workers().len() + 1);
    assert_eq!(settings.workers["agent_b"].base_url, "http://transport:7002");
    assert_eq!(settings.workers["agent_b"].compute_path, "/compute");
    assert_eq!(settings.workers["agent_a"].compute_path, "/weather/report");
    assert!(settings.workers.contains_key("translator"));
}

#[test]
fn negative_durations_fall_back() {
    let file = RelayConfig::from_yaml("poll_interval_s: -1\n").unwrap();
    let settings = Settings::resolve(Overrides::default(), file);
    assert_eq!(settings.poll_interval, Duration::from_secs(2));
}

#[test]
fn parse_store_kind() {
    assert_eq!("memory".parse::<StoreKind>().unwrap(), StoreKind::Memory);
    assert_eq!(" JSON ".parse::<StoreKind>().unwrap(), StoreKind::Json);
    assert_eq!("sqlite".parse::<StoreKind>().unwrap(), StoreKind::Sqlite);

    let err = "postgres".parse::<StoreKind>().unwrap_err();
    assert!(err.contains("memory, json, sqlite"));
}
