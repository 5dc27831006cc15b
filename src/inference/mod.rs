//! Capability boundary to the external facial-analysis engine.
//!
//! The engine is opaque: it is configured once with a license key and a set
//! of module specs, then started and stopped per session while it pushes
//! detections on its own cadence.

pub mod controller;
pub mod modules;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::models::Detection;

pub use controller::InferenceController;
pub use modules::{default_modules, validate_modules, ModuleKind, ModuleSpec};

#[async_trait]
pub trait InferenceControl: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}

/// What a configured engine hands back: its start/stop pair and the stream
/// of detections it will deliver.
pub struct InferenceLink {
    pub control: Box<dyn InferenceControl>,
    pub events: mpsc::UnboundedReceiver<Detection>,
}

#[async_trait]
pub trait InferenceEngine: Send + Sync {
    async fn configure(&self, modules: &[ModuleSpec], license_key: &str) -> Result<InferenceLink>;
}
