//! Server configuration.
//!
//! Loaded from an optional YAML file, then overridden from the environment:
//!
//! ```yaml
//! server:
//!   listen: "127.0.0.1:8080"      # or "unix:/tmp/forkserve.sock"
//!   pid_file: "/tmp/forkserve.pid"
//! workers:
//!   count: 4
//!   timeout_ms: 30000
//!   heartbeat_interval_ms: 5000
//!   tick_interval_ms: 2000
//!   shutdown_grace_ms: 5000
//!   read_timeout_ms: 10000
//!   max_body_bytes: 8388608
//! static_files:
//!   root: "./public"
//!   index: "index.html"
//! ```

use crate::error::StartupError;
use crate::http::parser::MAX_BODY_BYTES;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var naming the config file when no path is given on the command line.
pub const CONFIG_ENV: &str = "FORKSERVE_CONFIG";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workers: WorkerConfig,
    pub static_files: Option<StaticFilesConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port` or `unix:/path/to/socket`
    pub listen: String,
    pub pid_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Desired pool size at startup
    pub count: usize,
    /// Heartbeat age after which a worker is presumed hung and killed
    pub timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Upper bound of one supervisor wait on the liveness channel
    pub tick_interval_ms: u64,
    /// How long shutdown waits for workers before killing them
    pub shutdown_grace_ms: u64,
    /// Limit for receiving one complete request
    pub read_timeout_ms: u64,
    /// Largest accepted `Content-Length`; longer bodies get 413
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaticFilesConfig {
    pub root: PathBuf,
    #[serde(default = "default_index")]
    pub index: String,
}

fn default_index() -> String {
    "index.html".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            pid_file: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            timeout_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            tick_interval_ms: 2_000,
            shutdown_grace_ms: 5_000,
            read_timeout_ms: 10_000,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }
}

impl WorkerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Config {
    /// Load from `path` (or `FORKSERVE_CONFIG`, or built-in defaults) and
    /// apply `LISTEN` / `WORKERS` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, StartupError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut cfg = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => {
                let raw = std::fs::read_to_string(&path).map_err(|e| {
                    StartupError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_yaml_str(&raw)?
            }
            None => Self::default(),
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.server.listen = listen;
        }
        if let Ok(workers) = std::env::var("WORKERS") {
            cfg.workers.count = workers
                .parse()
                .map_err(|_| StartupError::Config(format!("WORKERS is not a number: {workers}")))?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, StartupError> {
        let cfg: Config =
            serde_yaml::from_str(raw).map_err(|e| StartupError::Config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), StartupError> {
        if self.server.listen.trim().is_empty() {
            return Err(StartupError::Config("server.listen is empty".into()));
        }
        if self.workers.count == 0 {
            return Err(StartupError::Config("workers.count must be at least 1".into()));
        }
        if self.workers.heartbeat_interval_ms == 0
            || self.workers.tick_interval_ms == 0
            || self.workers.read_timeout_ms == 0
        {
            return Err(StartupError::Config(
                "heartbeat, tick and read timeouts must be non-zero".into(),
            ));
        }
        if self.workers.timeout_ms <= self.workers.heartbeat_interval_ms {
            return Err(StartupError::Config(format!(
                "workers.timeout_ms ({}) must exceed workers.heartbeat_interval_ms ({})",
                self.workers.timeout_ms, self.workers.heartbeat_interval_ms
            )));
        }
        Ok(())
    }
}
