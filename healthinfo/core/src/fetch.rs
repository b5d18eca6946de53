use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::{ClusterAdmin, Frame};
use crate::{
    HealthCategory, HealthInfoError, HealthInfoResult, FETCH_RETRY_DELAY, MAX_FETCH_ATTEMPTS,
};

/// Retry bounds for the streamed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Attempts before giving up with [`HealthInfoError::HealthReportFailed`].
    pub max_attempts: u32,
    /// Pause between attempts that ended without a usable version.
    pub retry_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_FETCH_ATTEMPTS,
            retry_delay: FETCH_RETRY_DELAY,
        }
    }
}

/// A complete health document and where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedHealthInfo {
    /// Last document decoded on the successful attempt.
    pub document: Value,
    /// Protocol version reported by the cluster for that attempt.
    pub version: String,
    /// 1-based attempt that produced the document.
    pub attempts: u32,
}

/// Whether a document carries the non-empty `version` that marks it complete.
pub fn is_complete(document: &Value) -> bool {
    document
        .get("version")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.is_empty())
}

/// Fetch a complete health document, retrying while the cluster only streams
/// incomplete ones.
///
/// Each attempt drains one streamed response and keeps the last decoded
/// object. Transport errors abort immediately; only "stream ended without a
/// version" is retried.
pub async fn fetch_health_info(
    admin: &dyn ClusterAdmin,
    categories: &[HealthCategory],
    deadline: Option<Duration>,
    policy: &FetchPolicy,
) -> HealthInfoResult<FetchedHealthInfo> {
    let deadline = deadline.ok_or(HealthInfoError::InvalidDeadline)?;

    for attempt in 1..=policy.max_attempts {
        let mut stream = admin.health_info(categories, deadline).await?;
        let mut latest: Option<Value> = None;
        while let Some(frame) = stream.next_frame().await {
            match frame? {
                Frame::Document(document) => latest = Some(document),
                Frame::Truncated(reason) => {
                    warn!(attempt, %reason, "health info stream ended mid-object");
                    break;
                }
            }
        }

        if let Some(document) = latest.filter(is_complete) {
            debug!(attempt, version = stream.version(), "health info complete");
            return Ok(FetchedHealthInfo {
                document,
                version: stream.version().to_string(),
                attempts: attempt,
            });
        }

        debug!(
            attempt,
            max_attempts = policy.max_attempts,
            "health info incomplete, retrying"
        );
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.retry_delay).await;
        }
    }

    Err(HealthInfoError::HealthReportFailed {
        attempts: policy.max_attempts,
    })
}
