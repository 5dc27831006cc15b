//! Local record of session attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum JournalStatus {
    Playing,
    Uploading,
    Completed,
    Failed,
    /// Reset by the participant before reaching a terminal stage.
    Abandoned,
    /// Found unfinished at startup.
    Interrupted,
}

impl JournalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalStatus::Playing => "Playing",
            JournalStatus::Uploading => "Uploading",
            JournalStatus::Completed => "Completed",
            JournalStatus::Failed => "Failed",
            JournalStatus::Abandoned => "Abandoned",
            JournalStatus::Interrupted => "Interrupted",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, JournalStatus::Playing | JournalStatus::Uploading)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub worker_id: String,
    pub task_id: String,
    pub video_url: String,
    pub status: JournalStatus,
    pub event_count: u64,
    pub object_key: Option<String>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
