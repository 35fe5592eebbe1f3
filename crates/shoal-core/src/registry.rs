//! The bucket registry: the single source of truth for which backends
//! exist, whether they are healthy, how full they are, and how many
//! operations they have served.
//!
//! [`BucketRegistry`] owns one [`BucketInfo`] record per configured backend.
//! The name→record map sits behind a registry-level read-write lock; each
//! record carries its own interior mutability (atomics for counters and
//! usage, a lock for the config/client pair). Lock order is registry before
//! record.
//!
//! Snapshots reconcile additively: new names get freshly built S3 clients,
//! removed names are dropped, and surviving names keep their runtime
//! state (usage, availability, operation counters) while taking the new
//! configuration.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::BucketConfig;
use crate::error::{ShoalError, ShoalResult};

/// The closed set of operation categories tracked per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// Object reads (downloads, head requests).
    Read,
    /// Object writes (uploads, multipart uploads).
    Write,
    /// Object deletions.
    Delete,
    /// Listing operations.
    List,
}

impl OperationCategory {
    /// Stable lowercase name, used in logs and counter views.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::List => "list",
        }
    }
}

impl std::fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-category operation counters for one bucket.
#[derive(Debug, Default)]
struct OperationCounters {
    read: AtomicU64,
    write: AtomicU64,
    delete: AtomicU64,
    list: AtomicU64,
}

impl OperationCounters {
    fn cell(&self, category: OperationCategory) -> &AtomicU64 {
        match category {
            OperationCategory::Read => &self.read,
            OperationCategory::Write => &self.write,
            OperationCategory::Delete => &self.delete,
            OperationCategory::List => &self.list,
        }
    }

    /// Increment and return the new count.
    fn increment(&self, category: OperationCategory) -> u64 {
        self.cell(category).fetch_add(1, Ordering::AcqRel) + 1
    }

    fn get(&self, category: OperationCategory) -> u64 {
        self.cell(category).load(Ordering::Acquire)
    }

    fn reset(&self) {
        self.read.store(0, Ordering::Release);
        self.write.store(0, Ordering::Release);
        self.delete.store(0, Ordering::Release);
        self.list.store(0, Ordering::Release);
    }
}

/// Configuration plus the backend client built from it. Replaced whole on
/// snapshot reconcile so readers see either the old pair or the new one.
struct BackendState {
    config: BucketConfig,
    client: Client,
}

/// Mutable runtime record for one backend bucket.
///
/// Identity (the name) never changes; everything else may. `used_size` is
/// signed so reservations can be rolled back below a stale baseline; all
/// observers clamp it at zero.
pub struct BucketInfo {
    name: String,
    state: RwLock<BackendState>,
    used_size: AtomicI64,
    available: AtomicBool,
    enabled: AtomicBool,
    last_checked: RwLock<Option<DateTime<Utc>>>,
    ops: OperationCounters,
}

impl std::fmt::Debug for BucketInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketInfo")
            .field("name", &self.name)
            .field("used_size", &self.used_size())
            .field("available", &self.available.load(Ordering::Acquire))
            .field("enabled", &self.enabled.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl BucketInfo {
    pub(crate) fn new(config: BucketConfig) -> Self {
        let client = build_client(&config);
        let enabled = config.enabled;
        Self {
            name: config.name.clone(),
            state: RwLock::new(BackendState { config, client }),
            used_size: AtomicI64::new(0),
            available: AtomicBool::new(true),
            enabled: AtomicBool::new(enabled),
            last_checked: RwLock::new(None),
            ops: OperationCounters::default(),
        }
    }

    /// The bucket's unique name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> BucketConfig {
        self.state.read().config.clone()
    }

    /// A handle to the backend S3 client (cheap to clone).
    #[must_use]
    pub fn client(&self) -> Client {
        self.state.read().client.clone()
    }

    /// The backend endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> String {
        self.state.read().config.endpoint.clone()
    }

    /// Configured byte capacity.
    #[must_use]
    pub fn max_size_bytes(&self) -> u64 {
        self.state.read().config.max_size_bytes
    }

    /// Configured weight for the weighted-random strategy.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.state.read().config.weight
    }

    /// Current usage in bytes, clamped at zero.
    #[must_use]
    pub fn used_size(&self) -> u64 {
        self.used_size.load(Ordering::Acquire).max(0) as u64
    }

    /// Remaining capacity in bytes.
    #[must_use]
    pub fn available_space(&self) -> u64 {
        self.max_size_bytes().saturating_sub(self.used_size())
    }

    /// Adjust the usage estimate. Negative deltas are the delete /
    /// rollback path and may transiently drive the raw value below zero.
    pub fn update_used_size(&self, delta: i64) {
        self.used_size.fetch_add(delta, Ordering::AcqRel);
    }

    /// Overwrite the usage estimate with a probe-measured value.
    pub fn set_used_size(&self, bytes: u64) {
        self.used_size.store(bytes as i64, Ordering::Release);
    }

    /// Whether the bucket may serve traffic: enabled and probe-healthy.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.enabled.load(Ordering::Acquire) && self.available.load(Ordering::Acquire)
    }

    /// Whether the bucket is enabled (configured on and not tripped by an
    /// operation ceiling).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Record a health probe result.
    pub fn set_available(&self, healthy: bool, checked_at: DateTime<Utc>) {
        let was = self.available.swap(healthy, Ordering::AcqRel);
        *self.last_checked.write() = Some(checked_at);
        if was != healthy {
            if healthy {
                info!(bucket = %self.name, "bucket became healthy");
            } else {
                warn!(bucket = %self.name, "bucket became unhealthy");
            }
        }
    }

    /// When the bucket was last probed.
    #[must_use]
    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        *self.last_checked.read()
    }

    /// Current count for one operation category.
    #[must_use]
    pub fn operation_count(&self, category: OperationCategory) -> u64 {
        self.ops.get(category)
    }

    /// Count one operation against the category's ceiling.
    ///
    /// Returns `true` exactly when this increment crossed the configured
    /// ceiling and transitioned the bucket to disabled. A bucket disabled
    /// this way stays disabled until an explicit reset or a config reload.
    pub fn record_operation(&self, category: OperationCategory) -> bool {
        let count = self.ops.increment(category);
        let limit = category_limit(&self.state.read().config.limits, category);
        if limit > 0 && count >= limit {
            // swap returns the previous value, so only the increment that
            // flips enabled reports the transition.
            if self.enabled.swap(false, Ordering::AcqRel) {
                warn!(
                    bucket = %self.name,
                    category = %category,
                    count,
                    limit,
                    "operation ceiling reached, disabling bucket"
                );
                return true;
            }
        }
        false
    }

    /// Start a new operation-counter epoch: zero every counter and restore
    /// the configured enabled flag.
    pub fn reset_operations(&self) {
        self.ops.reset();
        let configured = self.state.read().config.enabled;
        self.enabled.store(configured, Ordering::Release);
        info!(bucket = %self.name, "operation counters reset");
    }

    /// Replace the configuration (and rebuild the backend client), keeping
    /// all runtime state.
    fn apply_config(&self, config: BucketConfig) {
        let client = build_client(&config);
        let enabled = config.enabled;
        *self.state.write() = BackendState { config, client };
        self.enabled.store(enabled, Ordering::Release);
        debug!(bucket = %self.name, "bucket configuration updated");
    }
}

/// The configured ceiling for one category; zero means unlimited.
fn category_limit(limits: &crate::config::OperationLimits, category: OperationCategory) -> u64 {
    match category {
        OperationCategory::Read => limits.read,
        OperationCategory::Write => limits.write,
        OperationCategory::Delete => limits.delete,
        OperationCategory::List => limits.list,
    }
}

/// Build a backend client from a bucket configuration. Path-style
/// addressing is forced because most non-AWS endpoints require it.
fn build_client(config: &BucketConfig) -> Client {
    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        None,
        None,
        "shoal-bucket-config",
    );
    let conf = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .endpoint_url(&config.endpoint)
        .force_path_style(true)
        .build();
    Client::from_conf(conf)
}

/// The live, mutable directory of backend buckets.
#[derive(Debug, Default)]
pub struct BucketRegistry {
    buckets: RwLock<HashMap<String, Arc<BucketInfo>>>,
}

impl BucketRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up one bucket by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<BucketInfo>> {
        self.buckets.read().get(name).cloned()
    }

    /// All buckets in the current generation, ordered by name.
    #[must_use]
    pub fn get_all(&self) -> Vec<Arc<BucketInfo>> {
        let mut all: Vec<_> = self.buckets.read().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// All buckets that are enabled and probe-healthy, ordered by name.
    #[must_use]
    pub fn get_available(&self) -> Vec<Arc<BucketInfo>> {
        let mut available: Vec<_> = self
            .buckets
            .read()
            .values()
            .filter(|b| b.is_available())
            .cloned()
            .collect();
        available.sort_by(|a, b| a.name.cmp(&b.name));
        available
    }

    /// Names of all registered buckets, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.buckets.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Whether the registry has no buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    /// Reconcile the registry against a new configuration snapshot.
    ///
    /// Additive: new names are inserted with freshly built clients,
    /// removed names are dropped, surviving names keep usage,
    /// availability and counters while taking the new configuration.
    pub fn apply_snapshot(&self, configs: &[BucketConfig]) {
        let keep: HashSet<&str> = configs.iter().map(|c| c.name.as_str()).collect();
        let mut buckets = self.buckets.write();

        buckets.retain(|name, _| {
            let kept = keep.contains(name.as_str());
            if !kept {
                info!(bucket = %name, "bucket removed from registry");
            }
            kept
        });

        for config in configs {
            if let Some(existing) = buckets.get(&config.name) {
                existing.apply_config(config.clone());
            } else {
                info!(bucket = %config.name, endpoint = %config.endpoint, "bucket added to registry");
                buckets.insert(config.name.clone(), Arc::new(BucketInfo::new(config.clone())));
            }
        }
    }

    /// Adjust the usage estimate of one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::NotFound`] for an unknown bucket name.
    pub fn update_used_size(&self, name: &str, delta: i64) -> ShoalResult<()> {
        let bucket = self
            .get(name)
            .ok_or_else(|| ShoalError::NotFound(format!("bucket {name}")))?;
        bucket.update_used_size(delta);
        Ok(())
    }

    /// Count one operation against a bucket's ceiling.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::NotFound`] for an unknown bucket name.
    pub fn record_operation(
        &self,
        name: &str,
        category: OperationCategory,
    ) -> ShoalResult<bool> {
        let bucket = self
            .get(name)
            .ok_or_else(|| ShoalError::NotFound(format!("bucket {name}")))?;
        Ok(bucket.record_operation(category))
    }

    /// Start a new operation-counter epoch for one bucket.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::NotFound`] for an unknown bucket name.
    pub fn reset_operations(&self, name: &str) -> ShoalResult<()> {
        let bucket = self
            .get(name)
            .ok_or_else(|| ShoalError::NotFound(format!("bucket {name}")))?;
        bucket.reset_operations();
        Ok(())
    }

    /// Start a new operation-counter epoch for every bucket.
    pub fn reset_all_operations(&self) {
        for bucket in self.get_all() {
            bucket.reset_operations();
        }
    }

    /// Record a probe result for one bucket. A target that disappeared
    /// since the probe started is tolerated.
    pub fn set_health(&self, name: &str, healthy: bool, checked_at: DateTime<Utc>) {
        if let Some(bucket) = self.get(name) {
            bucket.set_available(healthy, checked_at);
        }
    }

    /// Record a probe-measured usage for one bucket; unknown names are
    /// tolerated.
    pub fn set_used_size(&self, name: &str, bytes: u64) {
        if let Some(bucket) = self.get(name) {
            bucket.set_used_size(bytes);
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::bucket_config;
    use super::*;
    use crate::config::OperationLimits;

    #[test]
    fn test_should_reconcile_snapshot_additively() {
        let registry = BucketRegistry::new();
        registry.apply_snapshot(&[
            bucket_config("a", 100, 1),
            bucket_config("b", 100, 1),
        ]);
        assert_eq!(registry.names(), ["a", "b"]);

        registry.update_used_size("b", 42).unwrap();
        registry.record_operation("b", OperationCategory::Read).unwrap();

        registry.apply_snapshot(&[
            bucket_config("b", 200, 5),
            bucket_config("c", 100, 1),
        ]);
        assert_eq!(registry.names(), ["b", "c"]);

        let b = registry.get("b").unwrap();
        assert_eq!(b.max_size_bytes(), 200);
        assert_eq!(b.weight(), 5);
        assert_eq!(b.used_size(), 42);
        assert_eq!(b.operation_count(OperationCategory::Read), 1);
    }

    #[test]
    fn test_should_clamp_used_size_at_zero() {
        let registry = BucketRegistry::new();
        registry.apply_snapshot(&[bucket_config("a", 100, 1)]);
        let a = registry.get("a").unwrap();

        a.update_used_size(-50);
        assert_eq!(a.used_size(), 0);
        assert_eq!(a.available_space(), 100);

        // A later positive delta must see the true (negative) baseline.
        a.update_used_size(80);
        assert_eq!(a.used_size(), 30);
    }

    #[test]
    fn test_should_disable_bucket_when_ceiling_crossed() {
        let registry = BucketRegistry::new();
        let mut config = bucket_config("a", 100, 1);
        config.limits = OperationLimits {
            write: 2,
            ..OperationLimits::default()
        };
        registry.apply_snapshot(&[config]);

        assert!(!registry.record_operation("a", OperationCategory::Write).unwrap());
        assert!(registry.record_operation("a", OperationCategory::Write).unwrap());
        // Already disabled: further increments never re-report the transition.
        assert!(!registry.record_operation("a", OperationCategory::Write).unwrap());

        assert!(registry.get_available().is_empty());
        assert_eq!(registry.get_all().len(), 1);
    }

    #[test]
    fn test_should_reenable_bucket_on_reset() {
        let registry = BucketRegistry::new();
        let mut config = bucket_config("a", 100, 1);
        config.limits = OperationLimits {
            read: 1,
            ..OperationLimits::default()
        };
        registry.apply_snapshot(&[config]);

        assert!(registry.record_operation("a", OperationCategory::Read).unwrap());
        assert!(registry.get_available().is_empty());

        registry.reset_operations("a").unwrap();
        let a = registry.get("a").unwrap();
        assert!(a.is_available());
        assert_eq!(a.operation_count(OperationCategory::Read), 0);
    }

    #[test]
    fn test_should_exclude_unhealthy_buckets() {
        let registry = BucketRegistry::new();
        registry.apply_snapshot(&[
            bucket_config("a", 100, 1),
            bucket_config("b", 100, 1),
        ]);

        registry.set_health("a", false, Utc::now());
        let available = registry.get_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name(), "b");

        registry.set_health("a", true, Utc::now());
        assert_eq!(registry.get_available().len(), 2);
    }

    #[test]
    fn test_should_fail_mutations_for_unknown_bucket() {
        let registry = BucketRegistry::new();
        assert!(matches!(
            registry.update_used_size("ghost", 1),
            Err(ShoalError::NotFound(_))
        ));
        assert!(matches!(
            registry.record_operation("ghost", OperationCategory::Read),
            Err(ShoalError::NotFound(_))
        ));
    }
}
