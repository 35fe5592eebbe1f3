//! Consistent-hash strategy.
//!
//! Each bucket contributes `replicas` virtual points to a sorted ring.
//! A key is served by the first point clockwise from its own hash, so a
//! membership change only relocates the keys adjacent to the points that
//! appeared or vanished (~1/n of the keyspace per bucket).
//!
//! Point hash: the big-endian high 32 bits of the MD5 of the virtual key
//! `"{bucket}-{i}"`. MD5 is kept for placement compatibility with earlier
//! deployments; any well-distributed 32-bit hash would do.

use std::sync::Arc;

use md5::{Digest, Md5};
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::error::{ShoalError, ShoalResult};
use crate::registry::BucketInfo;

use super::Strategy;

/// Maps keys onto buckets through a ring of virtual nodes. With a fixed
/// bucket set, identical keys always land on the same bucket.
pub struct ConsistentHashStrategy {
    replicas: usize,
    ring: RwLock<Ring>,
}

#[derive(Default)]
struct Ring {
    /// Hash points in non-decreasing order, each carrying its bucket name.
    points: Vec<(u32, String)>,
    /// Sorted bucket names the ring was built from.
    members: Vec<String>,
}

impl Ring {
    fn build(names: &[String], replicas: usize) -> Self {
        let mut points = Vec::with_capacity(names.len() * replicas);
        for name in names {
            for i in 0..replicas {
                points.push((hash32(&format!("{name}-{i}")), name.clone()));
            }
        }
        points.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
        Self {
            points,
            members: names.to_vec(),
        }
    }

    /// First point at or after the key's hash, wrapping to the start.
    fn lookup<'a>(&'a self, key: &str) -> Option<&'a str> {
        if self.points.is_empty() {
            return None;
        }
        let hash = hash32(key);
        let mut index = self.points.partition_point(|(point, _)| *point < hash);
        if index == self.points.len() {
            index = 0;
        }
        Some(&self.points[index].1)
    }
}

impl ConsistentHashStrategy {
    /// Create a strategy with the given number of virtual nodes per
    /// bucket.
    #[must_use]
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            ring: RwLock::new(Ring::default()),
        }
    }
}

impl std::fmt::Debug for ConsistentHashStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistentHashStrategy")
            .field("replicas", &self.replicas)
            .finish_non_exhaustive()
    }
}

impl Strategy for ConsistentHashStrategy {
    fn select(
        &self,
        buckets: &[Arc<BucketInfo>],
        key: &str,
        _size: u64,
    ) -> ShoalResult<Arc<BucketInfo>> {
        let mut names: Vec<String> = buckets.iter().map(|b| b.name().to_owned()).collect();
        names.sort_unstable();

        let ring = self.ring.read();
        let ring = if ring.members == names {
            ring
        } else {
            drop(ring);
            let mut ring = self.ring.write();
            // Re-check: another caller may have rebuilt for the same set.
            if ring.members != names {
                *ring = Ring::build(&names, self.replicas);
            }
            RwLockWriteGuard::downgrade(ring)
        };

        let name = ring
            .lookup(key)
            .ok_or_else(|| ShoalError::internal("consistent-hash ring is empty"))?;
        buckets
            .iter()
            .find(|b| b.name() == name)
            .cloned()
            .ok_or_else(|| ShoalError::internal("hash ring out of sync with bucket set"))
    }

    fn name(&self) -> &'static str {
        "consistent-hash"
    }
}

/// Big-endian high 32 bits of the MD5 of `key`.
fn hash32(key: &str) -> u32 {
    let digest = Md5::digest(key.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}
