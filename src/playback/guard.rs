use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Duration, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::error::SessionError;

use super::{MediaPlayer, Presentation};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Pause, seek back, seek forward, leave fullscreen.
const CONTROL_KEYS: [&str; 4] = ["Space", "ArrowLeft", "ArrowRight", "Escape"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekOutcome {
    Allowed,
    Reverted { to: f64 },
}

struct Sampler {
    handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

/// Keeps playback moving forward only while a session is playing.
///
/// The safe position is sampled on a fixed interval rather than per frame, so
/// a seek can be undone by at most one interval of legitimate progress.
#[derive(Clone)]
pub struct PlaybackGuard {
    armed: Arc<AtomicBool>,
    safe_position: Arc<AtomicU64>,
    sample_interval: Duration,
    sampler: Arc<Mutex<Option<Sampler>>>,
}

impl PlaybackGuard {
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
            safe_position: Arc::new(AtomicU64::new(0f64.to_bits())),
            sample_interval,
            sampler: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn arm(&self, player: Arc<dyn MediaPlayer>) {
        let mut sampler = self.sampler.lock().await;
        if let Some(previous) = sampler.take() {
            previous.cancel_token.cancel();
            previous.handle.abort();
        }

        self.store_safe_position(player.current_time());
        self.armed.store(true, Ordering::SeqCst);

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(sample_loop(
            player,
            Arc::clone(&self.safe_position),
            self.sample_interval,
            cancel_token.clone(),
        ));

        *sampler = Some(Sampler {
            handle,
            cancel_token,
        });
        log_info!(
            "Playback guard armed (sampling every {}ms)",
            self.sample_interval.as_millis()
        );
    }

    pub async fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);

        if let Some(sampler) = self.sampler.lock().await.take() {
            sampler.cancel_token.cancel();
            if let Err(err) = sampler.handle.await {
                log_warn!("playback guard sampler failed to join: {err}");
            }
            log_info!("Playback guard disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    pub fn safe_position(&self) -> f64 {
        f64::from_bits(self.safe_position.load(Ordering::SeqCst))
    }

    /// Takes one sample immediately; skipped while the player is seeking.
    pub fn record_safe_position(&self, player: &dyn MediaPlayer) {
        if !player.is_seeking() {
            self.store_safe_position(player.current_time());
        }
    }

    fn store_safe_position(&self, seconds: f64) {
        self.safe_position.store(seconds.to_bits(), Ordering::SeqCst);
    }

    pub fn on_seeking(&self, player: &dyn MediaPlayer) -> SeekOutcome {
        if !self.is_armed() {
            return SeekOutcome::Allowed;
        }

        let safe = self.safe_position();
        let current = player.current_time();
        if current == safe {
            return SeekOutcome::Allowed;
        }

        player.set_current_time(safe);
        log_info!("Reverted seek from {current:.3}s to {safe:.3}s");
        SeekOutcome::Reverted { to: safe }
    }

    /// Returns true when the key press must be swallowed.
    pub fn on_key(&self, code: &str) -> bool {
        self.is_armed() && CONTROL_KEYS.contains(&code)
    }

    /// Returns true when the host should ask the participant to confirm
    /// leaving the page. Hosts may ignore the request.
    pub fn on_close_requested(&self) -> bool {
        self.is_armed()
    }

    /// Re-requests exclusive presentation if it was lost mid-playback.
    pub async fn on_presentation_changed(
        &self,
        player: &dyn MediaPlayer,
        presentation: &dyn Presentation,
    ) -> Result<(), SessionError> {
        if !self.is_armed()
            || presentation.is_exclusive()
            || player.is_paused()
            || player.is_ended()
        {
            return Ok(());
        }

        presentation.enter_exclusive().await.map_err(|err| {
            log_warn!("could not re-enter exclusive presentation: {err:#}");
            SessionError::PresentationUnavailable(err.to_string())
        })
    }
}

async fn sample_loop(
    player: Arc<dyn MediaPlayer>,
    safe_position: Arc<AtomicU64>,
    sample_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(sample_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !player.is_seeking() {
                    safe_position.store(player.current_time().to_bits(), Ordering::SeqCst);
                }
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{SimulatedPlayer, SimulatedPresentation};

    #[tokio::test(start_paused = true)]
    async fn seek_ahead_is_forced_back_to_safe_position() {
        let player = Arc::new(SimulatedPlayer::new(60.0));
        player.play().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        let guard = PlaybackGuard::new(DEFAULT_SAMPLE_INTERVAL);
        guard.arm(player.clone()).await;
        guard.record_safe_position(player.as_ref());
        let safe = guard.safe_position();

        player.begin_seek(safe + 5.0);
        assert_eq!(
            guard.on_seeking(player.as_ref()),
            SeekOutcome::Reverted { to: safe }
        );
        assert_eq!(player.current_time(), safe);

        guard.disarm().await;
    }

    #[tokio::test(start_paused = true)]
    async fn sampler_tracks_forward_progress() {
        let player = Arc::new(SimulatedPlayer::new(60.0));
        player.play().await.unwrap();

        let guard = PlaybackGuard::new(Duration::from_millis(250));
        guard.arm(player.clone()).await;
        tokio::time::sleep(Duration::from_millis(2_010)).await;

        let safe = guard.safe_position();
        assert!((1.75..=2.01).contains(&safe), "safe position {safe}");
        guard.disarm().await;
    }

    #[tokio::test]
    async fn disarmed_guard_lets_everything_through() {
        let player = Arc::new(SimulatedPlayer::new(30.0));
        let guard = PlaybackGuard::new(DEFAULT_SAMPLE_INTERVAL);

        player.begin_seek(12.0);
        assert_eq!(guard.on_seeking(player.as_ref()), SeekOutcome::Allowed);
        assert_eq!(player.current_time(), 12.0);
        assert!(!guard.on_key("Space"));
        assert!(!guard.on_close_requested());
    }

    #[tokio::test]
    async fn swallows_only_control_keys_while_armed() {
        let player = Arc::new(SimulatedPlayer::new(30.0));
        let guard = PlaybackGuard::new(DEFAULT_SAMPLE_INTERVAL);
        guard.arm(player).await;

        for code in CONTROL_KEYS {
            assert!(guard.on_key(code));
        }
        assert!(!guard.on_key("KeyA"));
        assert!(guard.on_close_requested());
        guard.disarm().await;
    }

    #[tokio::test]
    async fn reenters_presentation_and_tolerates_refusal() {
        let player = Arc::new(SimulatedPlayer::new(30.0));
        player.play().await.unwrap();
        let guard = PlaybackGuard::new(DEFAULT_SAMPLE_INTERVAL);
        guard.arm(player.clone()).await;

        let presentation = SimulatedPresentation::new(true);
        presentation.drop_exclusive();
        guard
            .on_presentation_changed(player.as_ref(), &presentation)
            .await
            .unwrap();
        assert!(presentation.is_exclusive());

        let refusing = SimulatedPresentation::new(false);
        let err = guard
            .on_presentation_changed(player.as_ref(), &refusing)
            .await
            .unwrap_err();
        assert!(!err.is_fatal());
        guard.disarm().await;
    }
}
