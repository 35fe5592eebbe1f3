//! Round-robin strategy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::ShoalResult;
use crate::registry::BucketInfo;

use super::Strategy;

/// Cycles through the eligible buckets with a single monotonic counter.
///
/// The eligible slice is rebuilt per call, so fairness is approximate
/// while membership changes; with stable membership each bucket is hit
/// once per `n` consecutive calls.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicU64,
}

impl RoundRobinStrategy {
    /// Create a strategy with the counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Strategy for RoundRobinStrategy {
    fn select(
        &self,
        buckets: &[Arc<BucketInfo>],
        _key: &str,
        _size: u64,
    ) -> ShoalResult<Arc<BucketInfo>> {
        let turn = self.counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        let index = (turn % buckets.len() as u64) as usize;
        Ok(Arc::clone(&buckets[index]))
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::test_support::bucket_config;
    use crate::registry::BucketRegistry;

    #[test]
    fn test_should_visit_every_bucket_once_per_cycle() {
        let registry = BucketRegistry::new();
        registry.apply_snapshot(&[
            bucket_config("a", 100, 1),
            bucket_config("b", 100, 1),
            bucket_config("c", 100, 1),
        ]);
        let buckets = registry.get_all();
        let strategy = RoundRobinStrategy::new();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..buckets.len() {
            let selected = strategy.select(&buckets, "k", 0).unwrap();
            seen.insert(selected.name().to_owned());
        }
        assert_eq!(seen.len(), buckets.len());
    }
}
