pub mod guard;
pub mod media;

pub use guard::{PlaybackGuard, SeekOutcome, DEFAULT_SAMPLE_INTERVAL};
pub use media::{MediaPlayer, Presentation};
