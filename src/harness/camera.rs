use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::time::{self, Duration};

use crate::permission::{CameraAccess, DenialCategory};

pub struct SimulatedCamera {
    supported: bool,
    outcome: Result<(), DenialCategory>,
    delay: Duration,
    requests: AtomicUsize,
}

impl SimulatedCamera {
    pub fn new(outcome: Result<(), DenialCategory>) -> Self {
        Self {
            supported: true,
            outcome,
            delay: Duration::ZERO,
            requests: AtomicUsize::new(0),
        }
    }

    pub fn granting() -> Self {
        Self::new(Ok(()))
    }

    /// A platform without any capture API.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new(Err(DenialCategory::UnsupportedPlatform))
        }
    }

    /// Time the participant takes to answer the prompt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraAccess for SimulatedCamera {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn request_access(&self) -> Result<(), DenialCategory> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            time::sleep(self.delay).await;
        }
        self.outcome
    }
}
