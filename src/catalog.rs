//! Task selection from launch parameters.
//!
//! Links handed to participants look like `https://host/?video=video3&code=Y3M7C5W9&workerId=w-17`.
//! The `video` parameter picks an entry from a fixed table; anything missing or
//! unknown falls back to the first entry under the test task id.
//!
//! The same table produces the link sheets handed to recruitment platforms,
//! see [`TaskCatalog::survey_links`].

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const FALLBACK_TASK_ID: &str = "TASK-TEST";

/// Links generated per task when a sheet is requested without a count.
pub const DEFAULT_LINKS_PER_TASK: usize = 50;

const WORKER_ID_KEYS: [&str; 3] = ["workerId", "worker_id", "participantId"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub key: String,
    pub video_url: String,
    pub completion_code: String,
    #[serde(default)]
    pub description: String,
}

/// One row of a participant link sheet.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SurveyLink {
    pub id: usize,
    pub url: String,
    pub completion_code: String,
    pub description: String,
    pub batch: String,
}

/// What a participant was asked to watch and the code they receive for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    pub task_id: String,
    pub video_url: String,
    pub completion_code: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchParams {
    pub video: Option<String>,
    pub code: Option<String>,
    pub worker_id: Option<String>,
}

impl LaunchParams {
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw).with_context(|| format!("invalid launch url '{raw}'"))?;
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.trim().to_string()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        let lookup = |name: &str| {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
        };

        Ok(Self {
            video: lookup("video"),
            code: lookup("code"),
            worker_id: WORKER_ID_KEYS.iter().find_map(|key| lookup(*key)),
        })
    }

    /// Worker id from the link, or `anonymous_{epoch_ms}` when none was given.
    pub fn worker_id_or_anonymous(&self) -> String {
        self.worker_id
            .clone()
            .unwrap_or_else(|| format!("anonymous_{}", Utc::now().timestamp_millis()))
    }
}

#[derive(Debug, Clone)]
pub struct TaskCatalog {
    entries: Vec<CatalogEntry>,
}

impl TaskCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn builtin() -> Self {
        let table = [
            ("video1", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/f4bea092-1f69-4f99-8d7a-fc8fb52ac610/CAY_R91_V1_WW_VID_1080x1920_24s.mp4", "EM7K2X9Q", "CAY_R91_V1 (24s)"),
            ("video2", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/42588136-407d-4f3c-b9d3-3bbdff874c01/CAY_C2_V2_WW_VID_1080x1920_36s.mp4", "B4N6P8R1", "CAY_C2_V2 (36s)"),
            ("video3", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/0c017021-67de-4289-adb0-513be3bab6ad/CAY_C31_V4_WW_VID_1080x1920_28s.mp4", "Y3M7C5W9", "CAY_C31_V4 (28s)"),
            ("video4", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/41d2ec4f-e68e-4979-b23b-8e70fda4d3e0/CAY_C38_V3_WW_VID_1080x1920_28s.mp4", "Q8T2V6K4", "CAY_C38_V3 (28s)"),
            ("video5", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/a81667e4-941c-4f79-bb55-73f4b7fa5195/CAY_C44_V4_WW_VID_1080x1920_55s.mp4", "L9B5H3F7", "CAY_C44_V4 (55s)"),
            ("video6", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/188f3e44-468a-4bbf-bbd6-31cae958658f/CAY_C47_V2_WW_VID_1080x1920_57s.mp4", "R6X8N2M4", "CAY_C47_V2 (57s)"),
            ("video7", "https://assets.homa-cloud.com/cm0wqgm1d002gdslcdl3hq3yl/0e6f38ec-c31d-4e48-9cca-a42be08eabdc/CAY_C46_V3_WW_VID_1080x1920_28s.mp4", "Z4K7Q3P9", "CAY_C46_V3 (28s)"),
            ("video8", "https://x-ad-assets.s3.amazonaws.com/media_asset/fb933ca4ddaaed31/media", "W5J9R7T2", "S3 Asset 1"),
            ("video9", "https://x-ad-assets.s3.amazonaws.com/media_asset/0b70f4ccb1ab283b/media", "F8L3B6N1", "S3 Asset 2"),
            ("video10", "https://x-ad-assets.s3.amazonaws.com/media_asset/00b01c9653131b14/media", "C2Y7M4K8", "S3 Asset 3"),
        ];

        Self::new(
            table
                .iter()
                .map(|(key, url, code, description)| CatalogEntry {
                    key: key.to_string(),
                    video_url: url.to_string(),
                    completion_code: code.to_string(),
                    description: description.to_string(),
                })
                .collect(),
        )
    }

    pub fn get(&self, key: &str) -> Option<&CatalogEntry> {
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Participant link for the task `key`: `{base}/?video={key}&code={code}`.
    pub fn launch_url(&self, base: &str, key: &str) -> Result<String> {
        let entry = self
            .get(key)
            .with_context(|| format!("no task '{key}' in the catalog"))?;
        let mut url = Url::parse(base).with_context(|| format!("invalid base url '{base}'"))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("video", &entry.key)
            .append_pair("code", &entry.completion_code);
        Ok(url.into())
    }

    /// `per_task` numbered links for every task, grouped by task with one
    /// batch label per row.
    pub fn survey_links(&self, base: &str, per_task: usize) -> Result<Vec<SurveyLink>> {
        let mut links = Vec::with_capacity(self.entries.len() * per_task);
        for entry in &self.entries {
            let url = self.launch_url(base, &entry.key)?;
            for index in 1..=per_task {
                links.push(SurveyLink {
                    id: links.len() + 1,
                    url: url.clone(),
                    completion_code: entry.completion_code.clone(),
                    description: entry.description.clone(),
                    batch: format!("{}_batch_{index:02}", entry.key),
                });
            }
        }
        Ok(links)
    }

    /// Resolves launch parameters into an assignment. An explicit `code`
    /// parameter always overrides the catalog's completion code.
    pub fn resolve(&self, params: &LaunchParams) -> Option<TaskAssignment> {
        let matched = params.video.as_deref().and_then(|key| self.get(key));

        let (task_id, entry) = match matched {
            Some(entry) => (entry.key.clone(), entry),
            None => (FALLBACK_TASK_ID.to_string(), self.entries.first()?),
        };

        Some(TaskAssignment {
            task_id,
            video_url: entry.video_url.clone(),
            completion_code: params
                .code
                .clone()
                .unwrap_or_else(|| entry.completion_code.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_video_with_its_code() {
        let params = LaunchParams::from_url("https://study.example/?video=video3").unwrap();
        let assignment = TaskCatalog::builtin().resolve(&params).unwrap();

        assert_eq!(assignment.task_id, "video3");
        assert_eq!(assignment.completion_code, "Y3M7C5W9");
        assert!(assignment.video_url.contains("CAY_C31_V4"));
    }

    #[test]
    fn unknown_or_missing_video_falls_back() {
        let catalog = TaskCatalog::builtin();
        for raw in [
            "https://study.example/",
            "https://study.example/?video=video99",
        ] {
            let params = LaunchParams::from_url(raw).unwrap();
            let assignment = catalog.resolve(&params).unwrap();
            assert_eq!(assignment.task_id, FALLBACK_TASK_ID);
            assert_eq!(assignment.completion_code, "EM7K2X9Q");
        }
    }

    #[test]
    fn code_parameter_overrides_catalog_code() {
        let params =
            LaunchParams::from_url("https://study.example/?video=video2&code=CUSTOM1").unwrap();
        let assignment = TaskCatalog::builtin().resolve(&params).unwrap();
        assert_eq!(assignment.task_id, "video2");
        assert_eq!(assignment.completion_code, "CUSTOM1");
    }

    #[test]
    fn worker_id_prefers_worker_id_key() {
        let params = LaunchParams::from_url(
            "https://study.example/?participantId=p-1&workerId=w-9&worker_id=w-2",
        )
        .unwrap();
        assert_eq!(params.worker_id.as_deref(), Some("w-9"));
    }

    #[test]
    fn missing_worker_id_becomes_anonymous() {
        let params = LaunchParams::from_url("https://study.example/?video=video1").unwrap();
        assert!(params.worker_id_or_anonymous().starts_with("anonymous_"));
    }

    #[test]
    fn launch_url_round_trips_through_resolve() {
        let catalog = TaskCatalog::builtin();
        let url = catalog
            .launch_url("https://your-app.vercel.app", "video5")
            .unwrap();
        assert_eq!(url, "https://your-app.vercel.app/?video=video5&code=L9B5H3F7");

        let assignment = catalog
            .resolve(&LaunchParams::from_url(&url).unwrap())
            .unwrap();
        assert_eq!(assignment.task_id, "video5");
        assert_eq!(assignment.completion_code, "L9B5H3F7");
    }

    #[test]
    fn launch_url_rejects_unknown_task_and_bad_base() {
        let catalog = TaskCatalog::builtin();
        assert!(catalog.launch_url("https://study.example", "video99").is_err());
        assert!(catalog.launch_url("not a url", "video1").is_err());
    }

    #[test]
    fn survey_links_number_rows_and_label_batches() {
        let links = TaskCatalog::builtin()
            .survey_links("https://study.example", 3)
            .unwrap();

        assert_eq!(links.len(), 30);
        assert_eq!(links[0].id, 1);
        assert_eq!(links[0].batch, "video1_batch_01");
        assert_eq!(links[0].description, "CAY_R91_V1 (24s)");
        assert_eq!(links[5].batch, "video2_batch_03");
        assert_eq!(links[5].completion_code, "B4N6P8R1");
        assert_eq!(links[29].id, 30);
        assert_eq!(links[29].url, "https://study.example/?video=video10&code=C2Y7M4K8");
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        assert!(TaskCatalog::new(Vec::new())
            .resolve(&LaunchParams::default())
            .is_none());
    }
}
