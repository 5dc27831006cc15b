//! Local `ObjectStore` backed by the `tracking_objects` table, used when no
//! remote storage is configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::{
    db::{
        helpers::{parse_datetime, to_i64, to_u64},
        Database,
    },
    upload::ObjectStore,
};

#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub key: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub size_bytes: u64,
    pub updated_at: DateTime<Utc>,
}

impl Database {
    pub async fn get_object(&self, key: &str) -> Result<Option<StoredObject>> {
        let key = key.to_string();

        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT object_key, content_type, body, size_bytes, updated_at
                 FROM tracking_objects WHERE object_key = ?1",
            )?;
            let mut rows = stmt.query(params![key])?;

            let Some(row) = rows.next()? else {
                return Ok(None);
            };
            let size_bytes: i64 = row.get(3)?;
            let updated_at: String = row.get(4)?;
            Ok(Some(StoredObject {
                key: row.get(0)?,
                content_type: row.get(1)?,
                body: row.get(2)?,
                size_bytes: to_u64(size_bytes, "size_bytes")?,
                updated_at: parse_datetime(&updated_at, "updated_at")?,
            }))
        })
        .await
    }

    pub async fn count_objects(&self) -> Result<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM tracking_objects", [], |row| row.get(0))?;
            to_u64(count, "count")
        })
        .await
    }
}

#[async_trait]
impl ObjectStore for Database {
    async fn upsert(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<()> {
        let key = key.to_string();
        let content_type = content_type.to_string();
        let size_bytes = to_i64(body.len() as u64)?;
        let now = Utc::now().to_rfc3339();

        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO tracking_objects (object_key, content_type, body, size_bytes, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(object_key) DO UPDATE SET
                     content_type = excluded.content_type,
                     body = excluded.body,
                     size_bytes = excluded.size_bytes,
                     updated_at = excluded.updated_at",
                params![key, content_type, body, size_bytes, now],
            )
            .with_context(|| format!("failed to store object {key}"))?;
            Ok(())
        })
        .await
    }

    fn describe(&self) -> String {
        format!("sqlite:{}", self.path().display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn upsert_replaces_existing_object() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("objects.sqlite3")).unwrap();

        db.upsert("a.json", "application/json", b"{\"v\":1}".to_vec())
            .await
            .unwrap();
        db.upsert("a.json", "application/json", b"{\"v\":22}".to_vec())
            .await
            .unwrap();

        let stored = db.get_object("a.json").await.unwrap().unwrap();
        assert_eq!(stored.body, b"{\"v\":22}".to_vec());
        assert_eq!(stored.size_bytes, 8);
        assert_eq!(db.count_objects().await.unwrap(), 1);
        assert!(db.get_object("missing.json").await.unwrap().is_none());
        assert!(db.describe().starts_with("sqlite:"));
    }
}
