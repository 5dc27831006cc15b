use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::mpsc;

use crate::models::Detection;

use super::{validate_modules, InferenceControl, InferenceEngine, ModuleSpec};

pub struct InferenceController {
    engine: Arc<dyn InferenceEngine>,
    modules: Vec<ModuleSpec>,
    license_key: String,
    control: Option<Box<dyn InferenceControl>>,
    streaming: bool,
}

impl InferenceController {
    pub fn new(engine: Arc<dyn InferenceEngine>, modules: Vec<ModuleSpec>, license_key: String) -> Self {
        Self {
            engine,
            modules,
            license_key,
            control: None,
            streaming: false,
        }
    }

    /// Configures the engine on first use. The detection receiver is handed
    /// out only on that first call; later sessions reuse the same link.
    pub async fn ensure_configured(&mut self) -> Result<Option<mpsc::UnboundedReceiver<Detection>>> {
        if self.control.is_some() {
            return Ok(None);
        }

        if self.license_key.trim().is_empty() {
            bail!("inference license key not configured");
        }
        validate_modules(&self.modules)?;

        let link = self
            .engine
            .configure(&self.modules, &self.license_key)
            .await
            .context("inference engine rejected configuration")?;

        info!(
            "Inference engine configured with {} modules",
            self.modules.len()
        );
        self.control = Some(link.control);
        Ok(Some(link.events))
    }

    pub async fn start_stream(&mut self) -> Result<()> {
        if self.streaming {
            bail!("inference stream already active");
        }
        let Some(control) = self.control.as_ref() else {
            bail!("inference engine not configured");
        };

        control.start().await.context("inference start failed")?;
        self.streaming = true;
        info!("Inference stream started");
        Ok(())
    }

    pub async fn stop_stream(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        let Some(control) = self.control.as_ref() else {
            self.streaming = false;
            return Ok(());
        };

        // Even a failed stop leaves the stream unusable for this session.
        self.streaming = false;
        control.stop().await.context("inference stop failed")?;
        info!("Inference stream stopped");
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }
}
