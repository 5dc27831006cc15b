use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration};

use crate::{error::SessionError, models::UploadPayload};

use super::{store::JSON_CONTENT_TYPE, ObjectStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: the wait after failed attempt `n` (1-based) is
    /// `n * base_delay`. No jitter.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub key: String,
    pub attempts: u32,
    pub bytes: usize,
}

/// `{taskId}_{workerId}_{sessionTimestamp}.json`, with characters that would
/// create sub-paths in the store replaced.
pub fn destination_key(task_id: &str, worker_id: &str, session_timestamp_ms: i64) -> String {
    format!(
        "{}_{}_{}.json",
        sanitize_component(task_id),
        sanitize_component(worker_id),
        session_timestamp_ms
    )
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | '?' | '#' | '%' => '-',
            c if c.is_whitespace() || c.is_control() => '-',
            c => c,
        })
        .collect()
}

#[derive(Clone)]
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    policy: RetryPolicy,
}

impl UploadPipeline {
    pub fn new(store: Arc<dyn ObjectStore>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Writes the payload under `key`, retrying failed attempts. Never
    /// panics; exhaustion is reported as `SessionError::UploadExhausted`.
    pub async fn upload(
        &self,
        key: &str,
        payload: &UploadPayload,
    ) -> Result<UploadReceipt, SessionError> {
        let body = payload
            .to_json_bytes()
            .map_err(|err| SessionError::FinalizeFailed(format!("payload serialization: {err}")))?;
        let bytes = body.len();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            match self.store.upsert(key, JSON_CONTENT_TYPE, body.clone()).await {
                Ok(()) => {
                    info!(
                        "Uploaded {key} ({bytes} bytes) to {} on attempt {attempt}",
                        self.store.describe()
                    );
                    return Ok(UploadReceipt {
                        key: key.to_string(),
                        attempts: attempt,
                        bytes,
                    });
                }
                Err(err) => {
                    warn!("Upload attempt {attempt}/{max_attempts} for {key} failed: {err:#}");
                    last_error = format!("{err:#}");
                }
            }

            if attempt < max_attempts {
                time::sleep(self.policy.delay_after(attempt)).await;
            }
        }

        Err(SessionError::UploadExhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
