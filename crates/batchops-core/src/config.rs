use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for batchops
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub kv: KvConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self, crate::Error> {
        use crate::Error;

        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, crate::Error> {
        // Try to load from BATCHOPS_CONFIG env var first
        if let Ok(config_path) = std::env::var("BATCHOPS_CONFIG") {
            return Self::load(&config_path);
        }

        // Try default locations
        let default_paths = [
            "./config/default.toml",
            "./config/production.toml",
            "/etc/batchops/config.toml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::load(path);
            }
        }

        // Return default config if no file found
        Ok(Self::default())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        use crate::Error;

        if self.database.pool_size == 0 {
            return Err(Error::Config("Database pool size must be > 0".to_string()));
        }

        if self.engine.worker_pool_size == 0 {
            return Err(Error::Config("Worker pool size must be > 0".to_string()));
        }

        if self.engine.tick_interval_secs == 0 {
            return Err(Error::Config("Scheduler tick interval must be > 0".to_string()));
        }

        if self.engine.lease_secs == 0 {
            return Err(Error::Config("Queue lease duration must be > 0".to_string()));
        }

        if self.storage.root.as_os_str().is_empty() {
            return Err(Error::Config("Storage root must be set".to_string()));
        }

        Ok(())
    }
}

/// Database connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            pool_size: default_pool_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Key/value store configuration (queue + schedule registry backing)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    #[serde(default = "default_kv_url")]
    pub url: String,

    /// Key namespace, prefixed to every key to avoid collisions
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_kv_retries")]
    pub max_retries: u32,

    #[serde(default = "default_kv_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            url: default_kv_url(),
            namespace: default_namespace(),
            max_retries: default_kv_retries(),
            retry_delay_ms: default_kv_retry_delay_ms(),
        }
    }
}

impl KvConfig {
    /// Delay between reconnect attempts
    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }
}

/// File storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory: per-upload subdirectories plus a shared exports/
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

/// Engine configuration: scheduler loop, worker pool, pipeline limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Scheduler tick interval
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,

    /// Number of parallel workers
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Queue lease duration; an orphaned claim is re-delivered after this
    #[serde(default = "default_lease_secs")]
    pub lease_secs: u64,

    /// Soft timeout for a single pipeline stage
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Bounded local retries for transient stage errors
    #[serde(default = "default_transient_attempts")]
    pub transient_retry_attempts: u32,

    /// Initial backoff for transient retries, doubled per attempt
    #[serde(default = "default_transient_backoff_ms")]
    pub transient_backoff_ms: u64,

    /// Idle sleep when the queue is empty
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,

    /// Grace window for in-flight stages on shutdown
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            worker_pool_size: default_worker_pool_size(),
            lease_secs: default_lease_secs(),
            stage_timeout_secs: default_stage_timeout(),
            transient_retry_attempts: default_transient_attempts(),
            transient_backoff_ms: default_transient_backoff_ms(),
            idle_wait_ms: default_idle_wait_ms(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

impl EngineConfig {
    /// Get tick interval as Duration
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.tick_interval_secs)
    }

    /// Get lease duration as chrono Duration
    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_secs as i64)
    }

    /// Get stage timeout as Duration
    pub fn stage_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.stage_timeout_secs)
    }

    /// Get idle wait as Duration
    pub fn idle_wait(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.idle_wait_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit one line per pipeline stage transition
    #[serde(default = "default_true")]
    pub log_stages: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_stages: true,
        }
    }
}

// Default value helper functions
fn default_true() -> bool {
    true
}
fn default_database_url() -> String {
    "postgres://localhost/batchops".to_string()
}
fn default_pool_size() -> u32 {
    10
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_kv_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_namespace() -> String {
    "batchops".to_string()
}
fn default_kv_retries() -> u32 {
    5
}
fn default_kv_retry_delay_ms() -> u64 {
    500
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data")
}
fn default_tick_interval() -> u64 {
    10
}
fn default_worker_pool_size() -> usize {
    4
}
fn default_lease_secs() -> u64 {
    600
}
fn default_stage_timeout() -> u64 {
    600
}
fn default_transient_attempts() -> u32 {
    3
}
fn default_transient_backoff_ms() -> u64 {
    500
}
fn default_idle_wait_ms() -> u64 {
    250
}
fn default_shutdown_grace() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}
