//! In-process stand-ins for the host capabilities: a camera that grants or
//! refuses on cue, an inference engine that emits synthetic detections, and
//! a clock-driven media player. Used by the dry-run binary and the tests.

mod camera;
mod inference;
mod media;

pub use camera::SimulatedCamera;
pub use inference::SimulatedInference;
pub use media::{SimulatedPlayer, SimulatedPresentation};
