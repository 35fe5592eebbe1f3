//! The load balancer: given `(key, size)`, pick one backend bucket from
//! the registry's available set.
//!
//! Every strategy sees the same pipeline: the registry's available
//! buckets, filtered down to those with enough free space for the
//! request. Strategies only choose among eligible buckets; they never
//! re-check capacity themselves.

mod consistent_hash;
mod least_space;
mod round_robin;
mod weighted;

pub use consistent_hash::ConsistentHashStrategy;
pub use least_space::LeastSpaceStrategy;
pub use round_robin::RoundRobinStrategy;
pub use weighted::WeightedStrategy;

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::BalancerConfig;
use crate::error::{ShoalError, ShoalResult};
use crate::registry::{BucketInfo, BucketRegistry};

/// A placement strategy: choose one bucket from an eligible, non-empty
/// slice. Implementations must be safe under concurrent callers.
pub trait Strategy: Send + Sync {
    /// Choose a bucket for `key` out of `buckets`. The slice is never
    /// empty and every entry already has at least `size` bytes free.
    fn select(
        &self,
        buckets: &[Arc<BucketInfo>],
        key: &str,
        size: u64,
    ) -> ShoalResult<Arc<BucketInfo>>;

    /// The strategy's configuration name.
    fn name(&self) -> &'static str;
}

/// Build a strategy from configuration.
///
/// # Errors
///
/// Returns [`ShoalError::InvalidArgument`] for an unknown strategy name.
fn build_strategy(config: &BalancerConfig) -> ShoalResult<Arc<dyn Strategy>> {
    match config.strategy.as_str() {
        "round-robin" => Ok(Arc::new(RoundRobinStrategy::new())),
        "least-space" => Ok(Arc::new(LeastSpaceStrategy)),
        "weighted" => Ok(Arc::new(WeightedStrategy)),
        "consistent-hash" => Ok(Arc::new(ConsistentHashStrategy::new(config.replicas))),
        other => Err(ShoalError::invalid(format!(
            "unknown balancer strategy: {other}"
        ))),
    }
}

/// The balancer: strategy dispatch plus the availability and capacity
/// filter stage.
pub struct Balancer {
    registry: Arc<BucketRegistry>,
    strategy: RwLock<Arc<dyn Strategy>>,
}

impl std::fmt::Debug for Balancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field("strategy", &self.strategy_name())
            .finish_non_exhaustive()
    }
}

impl Balancer {
    /// Create a balancer over `registry` with the configured strategy.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::InvalidArgument`] for an unknown strategy
    /// name.
    pub fn new(registry: Arc<BucketRegistry>, config: &BalancerConfig) -> ShoalResult<Self> {
        let strategy = build_strategy(config)?;
        Ok(Self {
            registry,
            strategy: RwLock::new(strategy),
        })
    }

    /// The active strategy's name.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.read().name()
    }

    /// Replace the strategy from a new configuration snapshot. The swap is
    /// atomic: a request sees either the old strategy or the new one.
    ///
    /// # Errors
    ///
    /// Returns [`ShoalError::InvalidArgument`] for an unknown strategy
    /// name; the old strategy stays active.
    pub fn rebuild(&self, config: &BalancerConfig) -> ShoalResult<()> {
        let strategy = build_strategy(config)?;
        let name = strategy.name();
        *self.strategy.write() = strategy;
        debug!(strategy = name, "balancer strategy rebuilt");
        Ok(())
    }

    /// Select a backend bucket for `(key, size)`.
    ///
    /// # Errors
    ///
    /// - [`ShoalError::NoAvailableBackend`] when the registry has zero
    ///   available buckets.
    /// - [`ShoalError::InsufficientCapacity`] when no available bucket has
    ///   `size` bytes free.
    pub fn select_bucket(&self, key: &str, size: u64) -> ShoalResult<Arc<BucketInfo>> {
        let available = self.registry.get_available();
        if available.is_empty() {
            return Err(ShoalError::NoAvailableBackend);
        }

        let eligible: Vec<Arc<BucketInfo>> = available
            .into_iter()
            .filter(|b| b.available_space() >= size)
            .collect();
        if eligible.is_empty() {
            return Err(ShoalError::InsufficientCapacity { requested: size });
        }

        let strategy = Arc::clone(&*self.strategy.read());
        let selected = strategy.select(&eligible, key, size)?;
        debug!(
            key,
            size,
            bucket = %selected.name(),
            strategy = strategy.name(),
            "bucket selected"
        );
        Ok(selected)
    }
}
