use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
    models::{JournalEntry, JournalStatus},
    Database,
};

const JOURNAL_COLUMNS: &str = "id, worker_id, task_id, video_url, status, event_count, \
     object_key, error_message, started_at, finished_at, created_at, updated_at";

impl Database {
    pub async fn insert_journal_entry(&self, entry: &JournalEntry) -> Result<()> {
        let entry = entry.clone();

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (
                    id, worker_id, task_id, video_url, status, event_count,
                    object_key, error_message, started_at, finished_at, created_at, updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    entry.id,
                    entry.worker_id,
                    entry.task_id,
                    entry.video_url,
                    entry.status.as_str(),
                    to_i64(entry.event_count)?,
                    entry.object_key,
                    entry.error_message,
                    entry.started_at.map(|dt| dt.to_rfc3339()),
                    entry.finished_at.map(|dt| dt.to_rfc3339()),
                    entry.created_at.to_rfc3339(),
                    entry.updated_at.to_rfc3339(),
                ],
            )
            .context("failed to insert journal entry")?;
            Ok(())
        })
        .await
    }

    /// Moves a session to `status`. Terminal statuses also stamp
    /// `finished_at`. Returns false when no row matched.
    pub async fn update_journal_status(
        &self,
        session_id: &str,
        status: JournalStatus,
        event_count: Option<u64>,
        object_key: Option<String>,
        error_message: Option<String>,
    ) -> Result<bool> {
        let session_id = session_id.to_string();
        let now = Utc::now().to_rfc3339();
        let finished_at = if status.is_open() {
            None
        } else {
            Some(now.clone())
        };
        let event_count = event_count.map(to_i64).transpose()?;

        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions
                     SET status = ?1,
                         event_count = COALESCE(?2, event_count),
                         object_key = COALESCE(?3, object_key),
                         error_message = COALESCE(?4, error_message),
                         finished_at = COALESCE(?5, finished_at),
                         updated_at = ?6
                     WHERE id = ?7",
                    params![
                        status.as_str(),
                        event_count,
                        object_key,
                        error_message,
                        finished_at,
                        now,
                        session_id,
                    ],
                )
                .context("failed to update journal status")?;
            Ok(updated > 0)
        })
        .await
    }

    pub async fn get_journal_entry(&self, session_id: &str) -> Result<Option<JournalEntry>> {
        let session_id = session_id.to_string();

        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNAL_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query(params![session_id])?;

            if let Some(row) = rows.next()? {
                Ok(Some(row_to_entry(row)?))
            } else {
                Ok(None)
            }
        })
        .await
    }

    /// Most recent first.
    pub async fn list_journal_entries(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let limit = to_i64(limit as u64)?;

        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOURNAL_COLUMNS} FROM sessions ORDER BY created_at DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query(params![limit])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_entry(row)?);
            }
            Ok(entries)
        })
        .await
    }

    /// Marks every session still open from a previous run as interrupted.
    /// The buffered signals of such a session were never persisted, so it
    /// cannot be resumed.
    pub async fn recover_interrupted_sessions(&self, now: DateTime<Utc>) -> Result<usize> {
        let now = now.to_rfc3339();

        self.execute(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE sessions
                     SET status = ?1, finished_at = ?2, updated_at = ?2
                     WHERE status IN (?3, ?4)",
                    params![
                        JournalStatus::Interrupted.as_str(),
                        now,
                        JournalStatus::Playing.as_str(),
                        JournalStatus::Uploading.as_str(),
                    ],
                )
                .context("failed to mark interrupted sessions")?;
            Ok(updated)
        })
        .await
    }
}

fn row_to_entry(row: &Row<'_>) -> Result<JournalEntry> {
    let status: String = row.get(4)?;
    let event_count: i64 = row.get(5)?;
    let started_at: Option<String> = row.get(8)?;
    let finished_at: Option<String> = row.get(9)?;
    let created_at: String = row.get(10)?;
    let updated_at: String = row.get(11)?;

    Ok(JournalEntry {
        id: row.get(0)?,
        worker_id: row.get(1)?,
        task_id: row.get(2)?,
        video_url: row.get(3)?,
        status: parse_status(&status)?,
        event_count: to_u64(event_count, "event_count")?,
        object_key: row.get(6)?,
        error_message: row.get(7)?,
        started_at: parse_optional_datetime(started_at, "started_at")?,
        finished_at: parse_optional_datetime(finished_at, "finished_at")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str) -> JournalEntry {
        let now = Utc::now();
        JournalEntry {
            id: id.into(),
            worker_id: "w-1".into(),
            task_id: "video1".into(),
            video_url: "https://cdn.example/video1.mp4".into(),
            status: JournalStatus::Playing,
            event_count: 0,
            object_key: None,
            error_message: None,
            started_at: Some(now),
            finished_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn open(dir: &TempDir) -> Database {
        Database::new(dir.path().join("journal.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn insert_update_and_read_back() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.insert_journal_entry(&entry("s-1")).await.unwrap();
        let updated = db
            .update_journal_status(
                "s-1",
                JournalStatus::Completed,
                Some(42),
                Some("video1_w-1_1.json".into()),
                None,
            )
            .await
            .unwrap();
        assert!(updated);

        let stored = db.get_journal_entry("s-1").await.unwrap().unwrap();
        assert_eq!(stored.status, JournalStatus::Completed);
        assert_eq!(stored.event_count, 42);
        assert_eq!(stored.object_key.as_deref(), Some("video1_w-1_1.json"));
        assert!(stored.finished_at.is_some());

        assert!(!db
            .update_journal_status("missing", JournalStatus::Failed, None, None, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn open_sessions_are_interrupted_on_recovery() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);

        db.insert_journal_entry(&entry("playing")).await.unwrap();
        db.insert_journal_entry(&entry("uploading")).await.unwrap();
        db.insert_journal_entry(&entry("done")).await.unwrap();
        db.update_journal_status("uploading", JournalStatus::Uploading, None, None, None)
            .await
            .unwrap();
        db.update_journal_status("done", JournalStatus::Completed, None, None, None)
            .await
            .unwrap();

        assert_eq!(db.recover_interrupted_sessions(Utc::now()).await.unwrap(), 2);
        for id in ["playing", "uploading"] {
            let stored = db.get_journal_entry(id).await.unwrap().unwrap();
            assert_eq!(stored.status, JournalStatus::Interrupted);
        }
        let done = db.get_journal_entry("done").await.unwrap().unwrap();
        assert_eq!(done.status, JournalStatus::Completed);
        assert_eq!(db.list_journal_entries(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn journal_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.insert_journal_entry(&entry("s-1")).await.unwrap();
        }
        let db = open(&dir);
        assert!(db.get_journal_entry("s-1").await.unwrap().is_some());
    }
}
