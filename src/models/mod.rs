pub mod payload;
pub mod signal;

pub use payload::{ClientInfo, SessionMetadata, UploadPayload};
pub use signal::{Detection, SignalEvent, SignalKind};
