use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Mutex, MutexGuard,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::time::{self, Duration, Instant};

use crate::playback::{MediaPlayer, Presentation};

struct PlayerClock {
    /// Position at `playing_since`, or the paused position.
    position: f64,
    playing_since: Option<Instant>,
    seeking: bool,
}

/// Media whose position advances with the tokio clock, so paused-time tests
/// can drive playback deterministically.
pub struct SimulatedPlayer {
    duration: f64,
    play_error: Option<String>,
    clock: Mutex<PlayerClock>,
}

impl SimulatedPlayer {
    pub fn new(duration_secs: f64) -> Self {
        Self {
            duration: duration_secs.max(0.0),
            play_error: None,
            clock: Mutex::new(PlayerClock {
                position: 0.0,
                playing_since: None,
                seeking: false,
            }),
        }
    }

    /// `play()` will be rejected, as with an autoplay policy or a bad source.
    pub fn failing_play(mut self, message: &str) -> Self {
        self.play_error = Some(message.to_string());
        self
    }

    fn clock(&self) -> MutexGuard<'_, PlayerClock> {
        match self.clock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn position_of(&self, clock: &PlayerClock) -> f64 {
        let advanced = clock
            .playing_since
            .map(|since| since.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        (clock.position + advanced).min(self.duration)
    }

    fn move_to(&self, clock: &mut PlayerClock, seconds: f64) {
        clock.position = seconds.clamp(0.0, self.duration);
        if clock.playing_since.is_some() {
            clock.playing_since = Some(Instant::now());
        }
    }

    /// Starts a participant seek; the host would fire `seeking` next.
    pub fn begin_seek(&self, seconds: f64) {
        let mut clock = self.clock();
        self.move_to(&mut clock, seconds);
        clock.seeking = true;
    }

    /// Resolves once playback reaches the end. Never resolves while paused.
    pub async fn wait_until_ended(&self) {
        loop {
            let remaining = self.duration - self.current_time();
            if remaining <= 0.0 {
                return;
            }
            time::sleep(Duration::from_secs_f64(remaining).max(Duration::from_millis(1))).await;
        }
    }
}

#[async_trait]
impl MediaPlayer for SimulatedPlayer {
    async fn play(&self) -> Result<()> {
        if let Some(message) = &self.play_error {
            bail!("{message}");
        }
        let mut clock = self.clock();
        if clock.playing_since.is_none() {
            clock.playing_since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&self) {
        let mut clock = self.clock();
        clock.position = self.position_of(&clock);
        clock.playing_since = None;
    }

    fn current_time(&self) -> f64 {
        let clock = self.clock();
        self.position_of(&clock)
    }

    fn set_current_time(&self, seconds: f64) {
        let mut clock = self.clock();
        self.move_to(&mut clock, seconds);
        clock.seeking = false;
    }

    fn duration(&self) -> Option<f64> {
        Some(self.duration)
    }

    fn is_seeking(&self) -> bool {
        self.clock().seeking
    }

    fn is_paused(&self) -> bool {
        self.clock().playing_since.is_none() || self.is_ended()
    }

    fn is_ended(&self) -> bool {
        self.current_time() >= self.duration
    }
}

pub struct SimulatedPresentation {
    allow_enter: bool,
    enter_delay: Duration,
    exclusive: AtomicBool,
    enter_requests: AtomicUsize,
}

impl SimulatedPresentation {
    pub fn new(allow_enter: bool) -> Self {
        Self {
            allow_enter,
            enter_delay: Duration::ZERO,
            exclusive: AtomicBool::new(false),
            enter_requests: AtomicUsize::new(0),
        }
    }

    /// Entering takes `delay`, like a browser animating into fullscreen.
    pub fn with_enter_delay(mut self, delay: Duration) -> Self {
        self.enter_delay = delay;
        self
    }

    /// The participant left fullscreen through the browser chrome.
    pub fn drop_exclusive(&self) {
        self.exclusive.store(false, Ordering::SeqCst);
    }

    pub fn enter_requests(&self) -> usize {
        self.enter_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Presentation for SimulatedPresentation {
    fn is_exclusive(&self) -> bool {
        self.exclusive.load(Ordering::SeqCst)
    }

    async fn enter_exclusive(&self) -> Result<()> {
        self.enter_requests.fetch_add(1, Ordering::SeqCst);
        if !self.enter_delay.is_zero() {
            time::sleep(self.enter_delay).await;
        }
        if !self.allow_enter {
            bail!("fullscreen request denied");
        }
        self.exclusive.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn exit_exclusive(&self) -> Result<()> {
        self.exclusive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn position_follows_the_clock_and_stops_at_the_end() {
        let player = SimulatedPlayer::new(5.0);
        assert!(player.is_paused());

        player.play().await.unwrap();
        time::sleep(Duration::from_secs(2)).await;
        assert!((player.current_time() - 2.0).abs() < 1e-6);

        player.wait_until_ended().await;
        assert!(player.is_ended());
        assert_eq!(player.current_time(), 5.0);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_flag_clears_when_position_is_set() {
        let player = SimulatedPlayer::new(30.0);
        player.begin_seek(12.0);
        assert!(player.is_seeking());
        assert_eq!(player.current_time(), 12.0);

        player.set_current_time(3.0);
        assert!(!player.is_seeking());
        assert_eq!(player.current_time(), 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_holds_the_position() {
        let player = SimulatedPlayer::new(10.0);
        player.play().await.unwrap();
        time::sleep(Duration::from_secs(3)).await;

        player.pause();
        time::sleep(Duration::from_secs(2)).await;

        assert!(player.is_paused());
        assert!((player.current_time() - 3.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_enter_counts_the_request_up_front() {
        let presentation =
            Arc::new(SimulatedPresentation::new(true).with_enter_delay(Duration::from_millis(100)));
        let entering = {
            let presentation = presentation.clone();
            tokio::spawn(async move { presentation.enter_exclusive().await })
        };
        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(presentation.enter_requests(), 1);
        assert!(!presentation.is_exclusive());

        entering.await.unwrap().unwrap();
        assert!(presentation.is_exclusive());
    }

    #[tokio::test]
    async fn rejected_play_reports_the_reason() {
        let player = SimulatedPlayer::new(10.0).failing_play("autoplay blocked");
        let err = player.play().await.unwrap_err();
        assert!(err.to_string().contains("autoplay blocked"));
    }
}
