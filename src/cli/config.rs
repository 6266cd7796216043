use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use serde::Deserialize;

use crate::workers::{DispatchMode, RetryPolicy, WorkerEndpoint};

pub const DEFAULT_CONFIG_FILE: &str = "taskrelay.yaml";

/// Which checkpoint store backs the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Json,
    Sqlite,
}

impl std::str::FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "json" => Ok(StoreKind::Json),
            "sqlite" => Ok(StoreKind::Sqlite),
            other => Err(format!(
                "Invalid store '{}'. Use: memory, json, sqlite",
                other
            )),
        }
    }
}

/// Configuration loaded from `taskrelay.yaml`.
/// Every field is optional; missing ones fall back to CLI, env, then defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dispatch_mode: Option<DispatchMode>,
    pub store: Option<StoreKind>,
    pub store_dir: Option<String>,
    pub database_url: Option<String>,
    /// Worker name → endpoint.
    /// e.g. `agent_a: { base_url: http://weather:50001, compute_path: /weather/report }`
    pub workers: Option<HashMap<String, WorkerEndpoint>>,
    /// Broker ingress for event mode. Without one, events go to an in-process channel.
    pub event_bus_url: Option<String>,
    pub poll_interval_s: Option<f64>,
    /// Age after which an outstanding dispatch is reported as overdue.
    pub dispatch_deadline_s: Option<f64>,
    pub max_retries: Option<u32>,
    pub backoff_s: Option<f64>,
    pub max_steps: Option<usize>,
    pub max_concurrent_polls: Option<usize>,
    pub http_timeout_s: Option<f64>,
    pub max_body: Option<usize>,
}

impl RelayConfig {
    /// Load configuration from a YAML file.
    ///
    /// - If `path` is `Some`, load that specific file (error if missing).
    /// - If `path` is `None`, auto-detect `taskrelay.yaml` in cwd; return defaults if absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_path = match path {
            Some(p) => {
                if !p.exists() {
                    anyhow::bail!("Config file not found: {}", p.display());
                }
                p.to_path_buf()
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path.to_path_buf()
            }
        };

        let contents = std::fs::read_to_string(&file_path)
            .with_context(|| format!("Failed to read config file: {}", file_path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", file_path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(contents)?)
    }
}

/// Built-in worker endpoints, matching the default agent ports.
pub fn default_workers() -> HashMap<String, WorkerEndpoint> {
    use crate::engine::router::worker;

    HashMap::from([
        (
            worker::WEATHER.to_string(),
            WorkerEndpoint::new("http://localhost:50001").with_compute_path("/weather/report"),
        ),
        (
            worker::TRANSPORT.to_string(),
            WorkerEndpoint::new("http://localhost:50002").with_compute_path("/transport/plans"),
        ),
        (
            worker::SUMMARY.to_string(),
            WorkerEndpoint::new("http://localhost:50003").with_compute_path("/summaries"),
        ),
    ])
}

/// Values given on the command line or through the environment. They win
/// over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dispatch_mode: Option<DispatchMode>,
    pub store: Option<StoreKind>,
    pub store_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub event_bus_url: Option<String>,
    pub max_body: Option<usize>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub dispatch_mode: DispatchMode,
    pub store: StoreKind,
    pub store_dir: PathBuf,
    pub database_url: String,
    pub workers: HashMap<String, WorkerEndpoint>,
    pub event_bus_url: Option<String>,
    pub poll_interval: Duration,
    pub dispatch_deadline: Duration,
    pub retry: RetryPolicy,
    pub max_steps: usize,
    pub max_concurrent_polls: usize,
    pub http_timeout: Duration,
    pub max_body: usize,
}

impl Settings {
    /// Overrides beat the file, the file beats built-in defaults.
    pub fn resolve(overrides: Overrides, file: RelayConfig) -> Self {
        let retry_defaults = RetryPolicy::default();
        let mut workers = default_workers();
        workers.extend(file.workers.unwrap_or_default());

        Self {
            host: overrides
                .host
                .or(file.host)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port: overrides.port.or(file.port).unwrap_or(50000),
            dispatch_mode: overrides
                .dispatch_mode
                .or(file.dispatch_mode)
                .unwrap_or(DispatchMode::Direct),
            store: overrides.store.or(file.store).unwrap_or(StoreKind::Json),
            store_dir: overrides
                .store_dir
                .or(file.store_dir.map(PathBuf::from))
                .unwrap_or_else(|| PathBuf::from("data/tasks")),
            database_url: overrides
                .database_url
                .or(file.database_url)
                .unwrap_or_else(|| "sqlite:data/taskrelay.db".to_string()),
            workers,
            event_bus_url: overrides.event_bus_url.or(file.event_bus_url),
            poll_interval: seconds(file.poll_interval_s, 2.0),
            dispatch_deadline: seconds(file.dispatch_deadline_s, 300.0),
            retry: RetryPolicy {
                max_retries: file.max_retries.unwrap_or(retry_defaults.max_retries),
                backoff_s: file.backoff_s.unwrap_or(retry_defaults.backoff_s),
            },
            max_steps: file.max_steps.unwrap_or(32),
            max_concurrent_polls: file.max_concurrent_polls.unwrap_or_else(num_cpus::get),
            http_timeout: seconds(file.http_timeout_s, 10.0),
            max_body: overrides.max_body.or(file.max_body).unwrap_or(1_048_576),
        }
    }
}

fn seconds(value: Option<f64>, default: f64) -> Duration {
    let secs = value.filter(|s| s.is_finite() && *s >= 0.0).unwrap_or(default);
    Duration::from_secs_f64(secs)
}
