//! The health monitor: keeps the registry's availability and usage
//! fields current by probing every backend on a fixed cadence.
//!
//! The monitor owns the target set; the probe itself belongs to the
//! [`Checker`] implementation. Each tick fans out one concurrent probe
//! per target, bounded by the checker's per-probe deadline, and publishes
//! the results through a [`HealthReporter`]. Results that arrive after
//! the monitor was stopped are discarded; in-flight probes are never
//! forcibly aborted.

mod s3;

pub use s3::S3Checker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The outcome of one health probe.
#[derive(Debug, Clone)]
pub struct Status {
    /// Whether the target answered the probe.
    pub healthy: bool,
    /// When the probe completed.
    pub last_checked: DateTime<Utc>,
    /// The probe error, when unhealthy.
    pub error: Option<String>,
}

/// Usage measured by a probe.
#[derive(Debug, Clone)]
pub struct Stats {
    /// The probed target.
    pub target_id: String,
    /// Total bytes stored on the target.
    pub used_size: u64,
}

/// One monitored backend. The id is the backend bucket name.
#[derive(Clone)]
pub struct Target {
    /// Unique target id.
    pub id: String,
    /// Client for the target's endpoint.
    pub client: Client,
}

impl std::fmt::Debug for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Target").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A probing strategy. Probes are I/O-bound and run in parallel across
/// targets; the monitor enforces [`timeout`](Checker::timeout) around
/// each call.
#[async_trait]
pub trait Checker: Send + Sync + 'static {
    /// Probe the target's liveness.
    async fn check(&self, target: &Target) -> Status;

    /// Measure the target's usage. Only called after a healthy check;
    /// `None` when the measurement failed or is unsupported.
    async fn stats(&self, target: &Target) -> Option<Stats>;

    /// Tick cadence.
    fn interval(&self) -> Duration;

    /// Per-probe deadline.
    fn timeout(&self) -> Duration;
}

/// Receives probe results. Implementations must not block.
pub trait HealthReporter: Send + Sync + 'static {
    /// A probe finished for `target_id`.
    fn report_health(&self, target_id: &str, status: &Status);

    /// A usage measurement finished.
    fn report_stats(&self, stats: &Stats);
}

/// Periodically probes registered targets and publishes the results.
pub struct HealthMonitor {
    checker: Arc<dyn Checker>,
    reporter: Arc<dyn HealthReporter>,
    targets: RwLock<HashMap<String, Target>>,
    statuses: RwLock<HashMap<String, Status>>,
    stop: CancellationToken,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("targets", &self.targets.read().len())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    /// Create a monitor with the given probe strategy and result sink.
    pub fn new(checker: Arc<dyn Checker>, reporter: Arc<dyn HealthReporter>) -> Self {
        Self {
            checker,
            reporter,
            targets: RwLock::new(HashMap::new()),
            statuses: RwLock::new(HashMap::new()),
            stop: CancellationToken::new(),
        }
    }

    /// Add or replace a monitored target.
    pub fn register(&self, target: Target) {
        self.targets.write().insert(target.id.clone(), target);
    }

    /// Remove a target and its last status.
    pub fn unregister(&self, target_id: &str) {
        self.targets.write().remove(target_id);
        self.statuses.write().remove(target_id);
    }

    /// Ids of all registered targets, sorted.
    #[must_use]
    pub fn target_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.targets.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The last published status for a target.
    #[must_use]
    pub fn get_status(&self, target_id: &str) -> Option<Status> {
        self.statuses.read().get(target_id).cloned()
    }

    /// All last published statuses.
    #[must_use]
    pub fn all_statuses(&self) -> HashMap<String, Status> {
        self.statuses.read().clone()
    }

    /// Whether a target's last probe succeeded.
    #[must_use]
    pub fn is_healthy(&self, target_id: &str) -> bool {
        self.statuses
            .read()
            .get(target_id)
            .is_some_and(|s| s.healthy)
    }

    /// Probe every target once, then keep probing on the checker's
    /// interval until `token` or [`stop`](Self::stop) fires.
    pub async fn start(self: Arc<Self>, token: CancellationToken) {
        self.check_all(&token).await;

        let monitor = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.checker.interval());
            // The immediate first tick duplicates the sweep above.
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = monitor.stop.cancelled() => break,
                    _ = ticker.tick() => monitor.check_all(&token).await,
                }
            }
            debug!("health monitor stopped");
        });
    }

    /// Signal the run loop to terminate. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Probe every registered target concurrently and publish results.
    async fn check_all(&self, token: &CancellationToken) {
        let targets: Vec<Target> = self.targets.read().values().cloned().collect();
        if targets.is_empty() {
            return;
        }
        debug!(targets = targets.len(), "health sweep started");

        let deadline = self.checker.timeout();
        let mut probes = Vec::with_capacity(targets.len());
        for target in targets {
            let checker = Arc::clone(&self.checker);
            probes.push(tokio::spawn(async move {
                let status = match tokio::time::timeout(deadline, checker.check(&target)).await
                {
                    Ok(status) => status,
                    Err(_) => Status {
                        healthy: false,
                        last_checked: Utc::now(),
                        error: Some(format!("probe timed out after {deadline:?}")),
                    },
                };
                let stats = if status.healthy {
                    tokio::time::timeout(deadline, checker.stats(&target))
                        .await
                        .unwrap_or(None)
                } else {
                    None
                };
                (target, status, stats)
            }));
        }

        for probe in probes {
            let Ok((target, status, stats)) = probe.await else {
                continue;
            };
            // Results are discarded once stop has been signalled, and for
            // targets that disappeared mid-tick.
            if self.stop.is_cancelled() || token.is_cancelled() {
                return;
            }
            if !self.targets.read().contains_key(&target.id) {
                continue;
            }

            self.statuses
                .write()
                .insert(target.id.clone(), status.clone());
            self.reporter.report_health(&target.id, &status);
            if let Some(stats) = stats {
                self.reporter.report_stats(&stats);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsReporter;
    use crate::registry::test_support::bucket_config;
    use crate::registry::BucketRegistry;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubChecker {
        alpha_down: AtomicBool,
    }

    #[async_trait]
    impl Checker for StubChecker {
        async fn check(&self, target: &Target) -> Status {
            let down = target.id == "alpha" && self.alpha_down.load(Ordering::Acquire);
            Status {
                healthy: !down,
                last_checked: Utc::now(),
                error: down.then(|| "connection refused".to_owned()),
            }
        }

        async fn stats(&self, target: &Target) -> Option<Stats> {
            Some(Stats {
                target_id: target.id.clone(),
                used_size: 7,
            })
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(50)
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn monitored_registry() -> (Arc<BucketRegistry>, Arc<HealthMonitor>, Arc<StubChecker>) {
        let registry = Arc::new(BucketRegistry::new());
        registry.apply_snapshot(&[
            bucket_config("alpha", 100, 1),
            bucket_config("beta", 100, 1),
        ]);

        let checker = Arc::new(StubChecker {
            alpha_down: AtomicBool::new(true),
        });
        let reporter = Arc::new(MetricsReporter::new(Arc::downgrade(&registry), None));
        let monitor = Arc::new(HealthMonitor::new(checker.clone(), reporter));
        for bucket in registry.get_all() {
            monitor.register(Target {
                id: bucket.name().to_owned(),
                client: bucket.client(),
            });
        }
        (registry, monitor, checker)
    }

    #[tokio::test]
    async fn test_should_exclude_unhealthy_bucket_after_sweep() {
        let (registry, monitor, checker) = monitored_registry();

        let token = CancellationToken::new();
        Arc::clone(&monitor).start(token.clone()).await;

        let available = registry.get_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name(), "beta");
        assert!(!monitor.is_healthy("alpha"));
        assert!(monitor.is_healthy("beta"));
        assert_eq!(registry.get("beta").unwrap().used_size(), 7);

        // Recovery is observed on a later tick.
        checker.alpha_down.store(false, Ordering::Release);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.get_available().len(), 2);

        monitor.stop();
        token.cancel();
    }

    #[tokio::test]
    async fn test_should_stop_probing_after_stop() {
        let (registry, monitor, checker) = monitored_registry();

        let token = CancellationToken::new();
        Arc::clone(&monitor).start(token.clone()).await;
        assert_eq!(registry.get_available().len(), 1);

        monitor.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // A recovery after stop is never observed.
        checker.alpha_down.store(false, Ordering::Release);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(registry.get_available().len(), 1);
    }

    #[tokio::test]
    async fn test_should_drop_status_on_unregister() {
        let (_registry, monitor, _checker) = monitored_registry();

        let token = CancellationToken::new();
        Arc::clone(&monitor).start(token.clone()).await;
        assert!(monitor.get_status("alpha").is_some());

        monitor.unregister("alpha");
        assert!(monitor.get_status("alpha").is_none());
        assert_eq!(monitor.target_ids(), ["beta"]);

        monitor.stop();
    }
}
