//! Declarative gateway configuration: model, YAML loader, validation.
//!
//! The configuration file describes the listener, the pool of backend
//! buckets, the balancer strategy, health probing, the placement database,
//! and handler-boundary toggles. [`Config::load`] reads and validates a file
//! and computes derived fields (most notably the byte-sized capacity parsed
//! from human-readable strings such as `"500GB"`).
//!
//! Hot reloading lives in [`manager`].

pub mod manager;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ShoalError, ShoalResult};

/// The balancer strategy names accepted in configuration.
pub const KNOWN_STRATEGIES: &[&str] =
    &["round-robin", "least-space", "weighted", "consistent-hash"];

/// Top-level gateway configuration.
///
/// Every section has serde defaults so a minimal file only needs `buckets`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Listener parameters.
    #[serde(default)]
    pub server: ServerConfig,
    /// The pool of backend buckets.
    #[serde(default)]
    pub buckets: Vec<BucketConfig>,
    /// Load-balancer strategy selection.
    #[serde(default)]
    pub balancer: BalancerConfig,
    /// Health probe cadence and deadline.
    #[serde(default)]
    pub health: HealthConfig,
    /// Placement metadata store backing.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// S3 API handler-boundary toggles.
    #[serde(default)]
    pub s3api: S3ApiConfig,
    /// Observability toggle.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Static credentials for the gateway's own auth boundary.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Read timeout in seconds.
    #[serde(default = "default_rw_timeout")]
    pub read_timeout: u64,
    /// Write timeout in seconds.
    #[serde(default = "default_rw_timeout")]
    pub write_timeout: u64,
    /// Log level filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            read_timeout: default_rw_timeout(),
            write_timeout: default_rw_timeout(),
            log_level: default_log_level(),
        }
    }
}

/// One backend bucket: an S3 endpoint + bucket name pair under the
/// gateway's control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Unique bucket name; doubles as the bucket name on the backend.
    pub name: String,
    /// Backend S3 endpoint URL.
    pub endpoint: String,
    /// Backend region.
    #[serde(default = "default_region")]
    pub region: String,
    /// Backend access key.
    #[serde(default)]
    pub access_key: String,
    /// Backend secret key.
    #[serde(default)]
    pub secret_key: String,
    /// Human-readable capacity, e.g. `"500GB"`.
    pub max_size: String,
    /// Derived byte capacity; computed by [`Config::validate`].
    #[serde(skip)]
    pub max_size_bytes: u64,
    /// Weight for the weighted-random strategy. Zero-weight buckets are
    /// only drawn when every weight is zero.
    #[serde(default)]
    pub weight: u32,
    /// Whether the bucket participates in placement at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-category operation ceilings.
    #[serde(default)]
    pub limits: OperationLimits,
}

/// Per-epoch operation ceilings, one per category. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLimits {
    /// Ceiling for read-type operations.
    #[serde(default)]
    pub read: u64,
    /// Ceiling for write-type operations.
    #[serde(default)]
    pub write: u64,
    /// Ceiling for delete-type operations.
    #[serde(default)]
    pub delete: u64,
    /// Ceiling for list-type operations.
    #[serde(default)]
    pub list: u64,
}

/// Load-balancer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Strategy name; one of [`KNOWN_STRATEGIES`].
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Virtual nodes per bucket for the consistent-hash ring.
    #[serde(default = "default_replicas")]
    pub replicas: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            replicas: default_replicas(),
        }
    }
}

/// Health probing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Probe cadence in seconds.
    #[serde(default = "default_health_interval")]
    pub interval: u64,
    /// Per-probe deadline in seconds.
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

impl HealthConfig {
    /// Probe cadence as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    /// Per-probe deadline as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Placement store backing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection string, e.g. `sqlite://shoal.db`.
    #[serde(default = "default_dsn")]
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { dsn: default_dsn() }
    }
}

/// Toggles at the S3 API handler boundary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct S3ApiConfig {
    /// Proxy object bytes through the gateway instead of redirecting.
    #[serde(default)]
    pub proxy_mode: bool,
    /// Infer bucket names from the `Host` header.
    #[serde(default)]
    pub virtual_host: bool,
}

/// Observability toggle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether gauges and counters are maintained.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Static credentials for the gateway's own auth boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Gateway access key.
    #[serde(default)]
    pub access_key: String,
    /// Gateway secret key.
    #[serde(default)]
    pub secret_key: String,
    /// Whether authentication is enforced at the handler boundary.
    #[serde(default)]
    pub required: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_owned()
}

fn default_port() -> u16 {
    8080
}

fn default_rw_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_region() -> String {
    "us-east-1".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_strategy() -> String {
    "round-robin".to_owned()
}

fn default_replicas() -> usize {
    100
}

fn default_health_interval() -> u64 {
    30
}

fn default_health_timeout() -> u64 {
    10
}

fn default_dsn() -> String {
    "sqlite://shoal.db".to_owned()
}

impl Config {
    /// Load and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::Internal`] if the file cannot be read and
    /// [`ShoalError::InvalidArgument`] if it fails to parse or validate.
    pub fn load(path: impl AsRef<Path>) -> ShoalResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ShoalError::internal(format!("read config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate a configuration document from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::InvalidArgument`] on parse or validation
    /// failure.
    pub fn from_yaml(raw: &str) -> ShoalResult<Self> {
        let mut config: Self = serde_yaml::from_str(raw)
            .map_err(|e| ShoalError::invalid(format!("parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and compute derived fields.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::InvalidArgument`] for duplicate or empty bucket
    /// names, empty endpoints, unparseable capacities, an unknown strategy
    /// name, or a zero health interval.
    pub fn validate(&mut self) -> ShoalResult<()> {
        let mut seen = HashSet::new();
        for bucket in &mut self.buckets {
            if bucket.name.is_empty() {
                return Err(ShoalError::invalid("bucket with empty name"));
            }
            if !seen.insert(bucket.name.clone()) {
                return Err(ShoalError::invalid(format!(
                    "duplicate bucket name: {}",
                    bucket.name
                )));
            }
            if bucket.endpoint.is_empty() {
                return Err(ShoalError::invalid(format!(
                    "bucket {} has no endpoint",
                    bucket.name
                )));
            }
            bucket.max_size_bytes = parse_size(&bucket.max_size).map_err(|e| {
                ShoalError::invalid(format!("bucket {}: {e}", bucket.name))
            })?;
        }

        if !KNOWN_STRATEGIES.contains(&self.balancer.strategy.as_str()) {
            return Err(ShoalError::invalid(format!(
                "unknown balancer strategy: {}",
                self.balancer.strategy
            )));
        }
        if self.balancer.replicas == 0 {
            return Err(ShoalError::invalid("balancer replicas must be positive"));
        }
        if self.health.interval == 0 {
            return Err(ShoalError::invalid("health interval must be positive"));
        }
        Ok(())
    }
}

/// Parse a human-readable size string (`"500GB"`, `"1.5TB"`, `"1048576"`)
/// into bytes. Units are 1024-based; a bare number is taken as bytes.
///
/// # Errors
///
/// Returns [`ShoalError::InvalidArgument`] for empty input, an unknown
/// unit, or a non-numeric magnitude.
pub fn parse_size(input: &str) -> ShoalResult<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ShoalError::invalid("empty size string"));
    }

    let upper = trimmed.to_ascii_uppercase();
    let (number, multiplier) = if let Some(number) = upper.strip_suffix("TB") {
        (number, 1u64 << 40)
    } else if let Some(number) = upper.strip_suffix("GB") {
        (number, 1u64 << 30)
    } else if let Some(number) = upper.strip_suffix("MB") {
        (number, 1u64 << 20)
    } else if let Some(number) = upper.strip_suffix("KB") {
        (number, 1u64 << 10)
    } else if let Some(number) = upper.strip_suffix('B') {
        (number, 1)
    } else {
        (upper.as_str(), 1)
    };

    let magnitude: f64 = number
        .trim()
        .parse()
        .map_err(|_| ShoalError::invalid(format!("invalid size: {input}")))?;
    if magnitude < 0.0 {
        return Err(ShoalError::invalid(format!("negative size: {input}")));
    }

    let bytes = (magnitude * multiplier as f64).round();
    Ok(bytes as u64)
}
