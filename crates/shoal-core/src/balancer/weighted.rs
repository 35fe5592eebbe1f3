//! Weighted-random strategy.

use std::sync::Arc;

use rand::Rng;

use crate::error::ShoalResult;
use crate::registry::BucketInfo;

use super::Strategy;

/// Draws buckets in proportion to their configured weights. When every
/// weight is zero the draw is uniform.
#[derive(Debug, Default)]
pub struct WeightedStrategy;

impl Strategy for WeightedStrategy {
    fn select(
        &self,
        buckets: &[Arc<BucketInfo>],
        _key: &str,
        _size: u64,
    ) -> ShoalResult<Arc<BucketInfo>> {
        let mut rng = rand::rng();

        let total: u64 = buckets.iter().map(|b| u64::from(b.weight())).sum();
        if total == 0 {
            let index = rng.random_range(0..buckets.len());
            return Ok(Arc::clone(&buckets[index]));
        }

        let draw = rng.random_range(0..total);
        let mut cumulative = 0u64;
        for bucket in buckets {
            cumulative += u64::from(bucket.weight());
            if draw < cumulative {
                return Ok(Arc::clone(bucket));
            }
        }
        // Not reachable when the weights sum to `total`.
        Ok(Arc::clone(&buckets[buckets.len() - 1]))
    }

    fn name(&self) -> &'static str {
        "weighted"
    }
}
