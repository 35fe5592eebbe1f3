//! Least-space strategy.

use std::sync::Arc;

use crate::error::ShoalResult;
use crate::registry::BucketInfo;

use super::Strategy;

/// Picks the bucket with the most free space. Ties go to the first bucket
/// in registry iteration order.
#[derive(Debug, Default)]
pub struct LeastSpaceStrategy;

impl Strategy for LeastSpaceStrategy {
    fn select(
        &self,
        buckets: &[Arc<BucketInfo>],
        _key: &str,
        _size: u64,
    ) -> ShoalResult<Arc<BucketInfo>> {
        // Strictly-greater comparison keeps the first of equals.
        let mut best = &buckets[0];
        let mut best_space = best.available_space();
        for bucket in &buckets[1..] {
            let space = bucket.available_space();
            if space > best_space {
                best = bucket;
                best_space = space;
            }
        }
        Ok(Arc::clone(best))
    }

    fn name(&self) -> &'static str {
        "least-space"
    }
}
