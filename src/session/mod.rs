pub mod buffer;
pub mod controller;
pub mod state;

pub use buffer::SignalBuffer;
pub use controller::{SessionController, SessionHost, SessionSnapshot, PROGRESS_UPDATE_INTERVAL};
pub use state::{Session, SessionEvent, Stage, TransitionError};
