//! Object storage over the Supabase-style storage REST API:
//! `POST {base_url}/storage/v1/object/{bucket}/{key}` with `x-upsert: true`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::ObjectStore;

const USER_AGENT: &str = concat!("viewtrack/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;
const CACHE_CONTROL: &str = "max-age=3600";

pub struct HttpObjectStore {
    http_client: Client,
    base_url: String,
    bucket: String,
    api_key: String,
}

impl HttpObjectStore {
    pub fn new(base_url: &str, bucket: &str, api_key: &str) -> Result<Self> {
        if base_url.trim().is_empty() {
            bail!("storage base url is empty");
        }
        if bucket.trim().is_empty() {
            bail!("storage bucket is empty");
        }

        let http_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("failed to build storage http client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upsert(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<()> {
        let url = self.object_url(key);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("apikey", &self.api_key)
            .header("x-upsert", "true")
            .header("cache-control", CACHE_CONTROL)
            .header("content-type", content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let error_text = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(anyhow!("storage rejected credentials ({status}): {error_text}"))
            }
            _ => Err(anyhow!("storage returned {status}: {error_text}")),
        }
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.base_url, self.bucket)
    }
}
