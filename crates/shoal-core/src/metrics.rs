//! Observability gauges and the health-to-registry reporter.
//!
//! [`GatewayMetrics`] owns an explicit `prometheus::Registry` so several
//! gateways can coexist in one process (tests in particular). The
//! [`MetricsReporter`] is the health monitor's sink: it writes probe
//! results into the bucket registry and mirrors them onto the gauges. It
//! holds only a weak reference to the registry, so its lifetime never
//! keeps the registry alive.

use std::sync::{Arc, Weak};

use prometheus::{IntCounterVec, IntGaugeVec, Opts};

use crate::health::{HealthReporter, Stats, Status};
use crate::registry::BucketRegistry;

/// Gauge and counter set for one gateway instance.
#[derive(Debug)]
pub struct GatewayMetrics {
    registry: prometheus::Registry,
    bucket_healthy: IntGaugeVec,
    bucket_usage_bytes: IntGaugeVec,
    bucket_capacity_bytes: IntGaugeVec,
    balancer_decisions_total: IntCounterVec,
    s3_operations_total: IntCounterVec,
}

impl GatewayMetrics {
    /// Create the metric set on a fresh prometheus registry.
    #[must_use]
    pub fn new() -> Self {
        let registry = prometheus::Registry::new();

        let bucket_healthy = IntGaugeVec::new(
            Opts::new(
                "shoal_bucket_healthy",
                "Health status of a backend bucket (1 = healthy, 0 = unhealthy)",
            ),
            &["bucket", "endpoint"],
        )
        .expect("bucket_healthy definition");
        let bucket_usage_bytes = IntGaugeVec::new(
            Opts::new(
                "shoal_bucket_usage_bytes",
                "Current usage of a backend bucket in bytes",
            ),
            &["bucket"],
        )
        .expect("bucket_usage_bytes definition");
        let bucket_capacity_bytes = IntGaugeVec::new(
            Opts::new(
                "shoal_bucket_capacity_bytes",
                "Maximum capacity of a backend bucket in bytes",
            ),
            &["bucket"],
        )
        .expect("bucket_capacity_bytes definition");
        let balancer_decisions_total = IntCounterVec::new(
            Opts::new(
                "shoal_balancer_decisions_total",
                "Total number of load balancing decisions",
            ),
            &["strategy", "bucket"],
        )
        .expect("balancer_decisions_total definition");
        let s3_operations_total = IntCounterVec::new(
            Opts::new(
                "shoal_s3_operations_total",
                "Total number of S3 operations per category",
            ),
            &["operation", "bucket"],
        )
        .expect("s3_operations_total definition");

        registry
            .register(Box::new(bucket_healthy.clone()))
            .expect("register bucket_healthy");
        registry
            .register(Box::new(bucket_usage_bytes.clone()))
            .expect("register bucket_usage_bytes");
        registry
            .register(Box::new(bucket_capacity_bytes.clone()))
            .expect("register bucket_capacity_bytes");
        registry
            .register(Box::new(balancer_decisions_total.clone()))
            .expect("register balancer_decisions_total");
        registry
            .register(Box::new(s3_operations_total.clone()))
            .expect("register s3_operations_total");

        Self {
            registry,
            bucket_healthy,
            bucket_usage_bytes,
            bucket_capacity_bytes,
            balancer_decisions_total,
            s3_operations_total,
        }
    }

    /// The underlying prometheus registry, for scraping or assertions.
    #[must_use]
    pub fn prometheus_registry(&self) -> &prometheus::Registry {
        &self.registry
    }

    /// Record a bucket's health transition.
    pub fn set_bucket_health(&self, bucket: &str, endpoint: &str, healthy: bool) {
        self.bucket_healthy
            .with_label_values(&[bucket, endpoint])
            .set(i64::from(healthy));
    }

    /// Record a bucket's measured usage and configured capacity.
    pub fn set_bucket_usage(&self, bucket: &str, used: u64, capacity: u64) {
        self.bucket_usage_bytes
            .with_label_values(&[bucket])
            .set(used.min(i64::MAX as u64) as i64);
        self.bucket_capacity_bytes
            .with_label_values(&[bucket])
            .set(capacity.min(i64::MAX as u64) as i64);
    }

    /// Count one balancer decision.
    pub fn record_decision(&self, strategy: &str, bucket: &str) {
        self.balancer_decisions_total
            .with_label_values(&[strategy, bucket])
            .inc();
    }

    /// Count one S3 operation.
    pub fn record_operation(&self, operation: &str, bucket: &str) {
        self.s3_operations_total
            .with_label_values(&[operation, bucket])
            .inc();
    }
}

impl Default for GatewayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Health-monitor sink: feeds probe results into the bucket registry and
/// the gauges.
pub struct MetricsReporter {
    registry: Weak<BucketRegistry>,
    metrics: Option<Arc<GatewayMetrics>>,
}

impl MetricsReporter {
    /// Create a reporter over a non-owning registry handle. `metrics` is
    /// `None` when observability is disabled.
    #[must_use]
    pub fn new(registry: Weak<BucketRegistry>, metrics: Option<Arc<GatewayMetrics>>) -> Self {
        Self { registry, metrics }
    }
}

impl HealthReporter for MetricsReporter {
    fn report_health(&self, target_id: &str, status: &Status) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        registry.set_health(target_id, status.healthy, status.last_checked);

        if let Some(metrics) = &self.metrics {
            if let Some(bucket) = registry.get(target_id) {
                metrics.set_bucket_health(target_id, &bucket.endpoint(), status.healthy);
            }
        }
    }

    fn report_stats(&self, stats: &Stats) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        registry.set_used_size(&stats.target_id, stats.used_size);

        if let Some(metrics) = &self.metrics {
            if let Some(bucket) = registry.get(&stats.target_id) {
                metrics.set_bucket_usage(&stats.target_id, stats.used_size, bucket.max_size_bytes());
            }
        }
    }
}
