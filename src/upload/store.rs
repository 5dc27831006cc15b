use anyhow::Result;
use async_trait::async_trait;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A keyed blob store with upsert semantics: writing an existing key
/// replaces its contents. Each call either stores the whole body or fails.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upsert(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<()>;

    /// Short description for logs.
    fn describe(&self) -> String;
}
