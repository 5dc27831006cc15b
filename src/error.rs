use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permission::DenialCategory;

/// Failures that end a session in the `Error` stage, plus the one non-fatal
/// presentation failure that is only logged.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("camera permission denied ({category:?})")]
    PermissionDenied { category: DenialCategory },

    #[error("camera capture is not supported on this platform")]
    DeviceUnsupported,

    #[error("inference engine failed to initialize: {0}")]
    InferenceInitFailed(String),

    #[error("playback failed: {0}")]
    PlaybackFailed(String),

    #[error("finalizing the session failed: {0}")]
    FinalizeFailed(String),

    #[error("upload failed after {attempts} attempts: {last_error}")]
    UploadExhausted { attempts: u32, last_error: String },

    #[error("exclusive presentation unavailable: {0}")]
    PresentationUnavailable(String),
}

/// Coarse category carried by the `Error` stage so hosts can branch without
/// parsing messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    PermissionDenied,
    DeviceUnsupported,
    InferenceInitFailed,
    PlaybackFailed,
    FinalizeFailed,
    UploadExhausted,
    PresentationUnavailable,
}

impl SessionError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::PermissionDenied { .. } => FailureKind::PermissionDenied,
            SessionError::DeviceUnsupported => FailureKind::DeviceUnsupported,
            SessionError::InferenceInitFailed(_) => FailureKind::InferenceInitFailed,
            SessionError::PlaybackFailed(_) => FailureKind::PlaybackFailed,
            SessionError::FinalizeFailed(_) => FailureKind::FinalizeFailed,
            SessionError::UploadExhausted { .. } => FailureKind::UploadExhausted,
            SessionError::PresentationUnavailable(_) => FailureKind::PresentationUnavailable,
        }
    }

    /// Presentation loss degrades the session; everything else ends it.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::PresentationUnavailable(_))
    }

    /// Message shown to the participant on the error screen.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied { category } => category.user_message().to_string(),
            SessionError::DeviceUnsupported => DenialCategory::UnsupportedPlatform
                .user_message()
                .to_string(),
            SessionError::InferenceInitFailed(_) => {
                "Failed to initialize emotion tracking. Please check your license key and try again."
                    .into()
            }
            SessionError::PlaybackFailed(_) => "Failed to start video. Please try again.".into(),
            SessionError::FinalizeFailed(_) => {
                "Failed to process your response. Please try again.".into()
            }
            SessionError::UploadExhausted { .. } => {
                "Failed to upload your response. Please check your internet connection and try again."
                    .into()
            }
            SessionError::PresentationUnavailable(_) => {
                "Fullscreen is unavailable; the video will continue in the page.".into()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_presentation_loss_is_non_fatal() {
        assert!(!SessionError::PresentationUnavailable("denied".into()).is_fatal());
        assert!(SessionError::DeviceUnsupported.is_fatal());
        assert!(SessionError::UploadExhausted {
            attempts: 3,
            last_error: "timeout".into()
        }
        .is_fatal());
    }

    #[test]
    fn unsupported_device_shares_platform_message() {
        assert_eq!(
            SessionError::DeviceUnsupported.user_message(),
            SessionError::PermissionDenied {
                category: DenialCategory::UnsupportedPlatform
            }
            .user_message()
        );
    }
}
