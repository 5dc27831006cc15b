use anyhow::Result;
use async_trait::async_trait;

/// The host's video element, as far as the session needs it.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    async fn play(&self) -> Result<()>;

    fn pause(&self);

    /// Current position in seconds.
    fn current_time(&self) -> f64;

    fn set_current_time(&self, seconds: f64);

    /// Total length in seconds, once metadata has loaded.
    fn duration(&self) -> Option<f64>;

    fn is_seeking(&self) -> bool;

    fn is_paused(&self) -> bool;

    fn is_ended(&self) -> bool;
}

/// Exclusive full-viewport display ("fullscreen").
#[async_trait]
pub trait Presentation: Send + Sync {
    fn is_exclusive(&self) -> bool;

    async fn enter_exclusive(&self) -> Result<()>;

    async fn exit_exclusive(&self) -> Result<()>;
}
