use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::SignalEvent;

/// Details about the participant's environment, supplied by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub viewport: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    /// Epoch milliseconds at finalize; also part of the destination key.
    pub session_timestamp: i64,
    pub worker_id: String,
    pub task_id: String,
    pub video_url: String,
    pub total_frames: usize,
    pub duration: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub viewport: Option<String>,
}

/// The document written to remote storage. Built once when the session
/// finalizes and never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadPayload {
    pub tracking_data: Vec<SignalEvent>,
    pub metadata: SessionMetadata,
}

impl UploadPayload {
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
