//! The S3 probe: `HeadBucket` for liveness, `ListObjectsV2` for usage.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, warn};

use super::{Checker, Stats, Status, Target};

/// Probes backend buckets over their own S3 API.
///
/// Usage measurement walks the full object listing and sums sizes, which
/// is O(objects) per tick; backends with native usage APIs can replace
/// this checker wholesale.
#[derive(Debug, Clone)]
pub struct S3Checker {
    interval: Duration,
    timeout: Duration,
}

impl S3Checker {
    /// Create a checker with the given cadence and per-probe deadline.
    #[must_use]
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[async_trait]
impl Checker for S3Checker {
    async fn check(&self, target: &Target) -> Status {
        match target.client.head_bucket().bucket(&target.id).send().await {
            Ok(_) => Status {
                healthy: true,
                last_checked: Utc::now(),
                error: None,
            },
            Err(e) => {
                debug!(bucket = %target.id, error = %e, "head bucket probe failed");
                Status {
                    healthy: false,
                    last_checked: Utc::now(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn stats(&self, target: &Target) -> Option<Stats> {
        let mut used_size: u64 = 0;
        let mut continuation: Option<String> = None;

        loop {
            let mut request = target.client.list_objects_v2().bucket(&target.id);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    warn!(bucket = %target.id, error = %e, "usage scan failed");
                    return None;
                }
            };

            used_size += response
                .contents()
                .iter()
                .filter_map(aws_sdk_s3::types::Object::size)
                .map(|size| size.max(0) as u64)
                .sum::<u64>();

            if response.is_truncated().unwrap_or(false) {
                continuation = response.next_continuation_token().map(str::to_owned);
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Some(Stats {
            target_id: target.id.clone(),
            used_size,
        })
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}
