use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tokio::{
    sync::mpsc,
    time::{self, Duration, MissedTickBehavior},
};

use crate::{
    inference::{InferenceControl, InferenceEngine, InferenceLink, ModuleSpec},
    models::Detection,
};

const EMOTIONS: [&str; 7] = [
    "Angry", "Disgust", "Fear", "Happy", "Sad", "Surprise", "Neutral",
];

/// Engine that emits one synthetic detection per `period` while started.
/// `manual()` builds one that only emits what `inject` pushes.
pub struct SimulatedInference {
    period: Option<Duration>,
    fail_configure: bool,
    fail_stop: bool,
    configure_calls: AtomicUsize,
    streaming: Arc<AtomicBool>,
    sender: Mutex<Option<mpsc::UnboundedSender<Detection>>>,
}

impl SimulatedInference {
    pub fn new(period: Duration) -> Self {
        Self {
            period: Some(period),
            fail_configure: false,
            fail_stop: false,
            configure_calls: AtomicUsize::new(0),
            streaming: Arc::new(AtomicBool::new(false)),
            sender: Mutex::new(None),
        }
    }

    pub fn manual() -> Self {
        Self {
            period: None,
            ..Self::new(Duration::from_secs(1))
        }
    }

    pub fn failing_configure(mut self) -> Self {
        self.fail_configure = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn configure_count(&self) -> usize {
        self.configure_calls.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Pushes a detection regardless of the stream state, the way a real
    /// engine may deliver a result after being told to stop.
    pub fn inject(&self, detection: Detection) -> bool {
        let sender = match self.sender.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        sender.is_some_and(|tx| tx.send(detection).is_ok())
    }
}

#[async_trait]
impl InferenceEngine for SimulatedInference {
    async fn configure(&self, modules: &[ModuleSpec], _license_key: &str) -> Result<InferenceLink> {
        self.configure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_configure {
            bail!("simulated engine refused {} modules", modules.len());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(period) = self.period {
            tokio::spawn(generate(tx.clone(), Arc::clone(&self.streaming), period));
        }
        match self.sender.lock() {
            Ok(mut guard) => *guard = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }

        Ok(InferenceLink {
            control: Box::new(SimulatedControl {
                streaming: Arc::clone(&self.streaming),
                fail_stop: self.fail_stop,
            }),
            events: rx,
        })
    }
}

struct SimulatedControl {
    streaming: Arc<AtomicBool>,
    fail_stop: bool,
}

#[async_trait]
impl InferenceControl for SimulatedControl {
    async fn start(&self) -> Result<()> {
        self.streaming.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.streaming.store(false, Ordering::SeqCst);
        if self.fail_stop {
            bail!("simulated engine did not acknowledge stop");
        }
        Ok(())
    }
}

async fn generate(
    tx: mpsc::UnboundedSender<Detection>,
    streaming: Arc<AtomicBool>,
    period: Duration,
) {
    let mut rng = StdRng::from_entropy();
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sequence: u64 = 0;

    loop {
        ticker.tick().await;
        if tx.is_closed() {
            break;
        }
        if !streaming.load(Ordering::SeqCst) {
            continue;
        }
        if tx.send(random_detection(&mut rng, sequence)).is_err() {
            break;
        }
        sequence += 1;
    }
}

fn random_detection(rng: &mut StdRng, sequence: u64) -> Detection {
    match sequence % 4 {
        0 => Detection::ArousalValence {
            arousal: rng.gen_range(-1.0..1.0),
            valence: rng.gen_range(-1.0..1.0),
        },
        1 => {
            let emotions: BTreeMap<String, f64> = EMOTIONS
                .iter()
                .map(|name| (name.to_string(), rng.gen_range(0.0..1.0)))
                .collect();
            let dominant_emotion = emotions
                .iter()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| "Neutral".into());
            Detection::Emotion {
                dominant_emotion,
                emotions,
            }
        }
        2 => Detection::Attention {
            attention: rng.gen_range(0.0..1.0),
        },
        _ => {
            let total_faces = if rng.gen_bool(0.9) { 1 } else { 0 };
            Detection::FaceDetection {
                total_faces,
                status: if total_faces > 0 { "FACE_FOUND" } else { "NO_FACE" }.into(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::default_modules;

    #[tokio::test(start_paused = true)]
    async fn emits_only_while_started() {
        let engine = SimulatedInference::new(Duration::from_millis(100));
        let mut link = engine.configure(&default_modules(), "key").await.unwrap();

        time::sleep(Duration::from_millis(550)).await;
        assert!(link.events.try_recv().is_err());

        link.control.start().await.unwrap();
        time::sleep(Duration::from_millis(550)).await;
        let mut received = 0;
        while link.events.try_recv().is_ok() {
            received += 1;
        }
        assert!(received >= 4, "received {received}");

        link.control.stop().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;
        while link.events.try_recv().is_ok() {}
        time::sleep(Duration::from_millis(550)).await;
        assert!(link.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn manual_engine_forwards_injected_detections() {
        let engine = SimulatedInference::manual();
        assert!(!engine.inject(Detection::Attention { attention: 0.1 }));

        let mut link = engine.configure(&default_modules(), "key").await.unwrap();
        assert!(engine.inject(Detection::Attention { attention: 0.2 }));
        assert_eq!(
            link.events.recv().await,
            Some(Detection::Attention { attention: 0.2 })
        );
    }
}
