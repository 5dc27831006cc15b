use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Why the host refused camera access.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DenialCategory {
    UserRefused,
    NoDeviceFound,
    DeviceBusy,
    UnsupportedPlatform,
    Other,
}

impl DenialCategory {
    /// Maps the error names browsers report from `getUserMedia`.
    pub fn from_error_name(name: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" | "SecurityError" => {
                DenialCategory::UserRefused
            }
            "NotFoundError" | "DevicesNotFoundError" | "OverconstrainedError" => {
                DenialCategory::NoDeviceFound
            }
            "NotReadableError" | "TrackStartError" | "AbortError" => DenialCategory::DeviceBusy,
            "NotSupportedError" | "TypeError" => DenialCategory::UnsupportedPlatform,
            _ => DenialCategory::Other,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            DenialCategory::UserRefused => {
                "Camera access was denied. Please click the camera icon in your browser address bar and allow camera access."
            }
            DenialCategory::NoDeviceFound => {
                "No camera found. Please make sure you have a camera connected."
            }
            DenialCategory::DeviceBusy => "Camera is already in use by another application.",
            DenialCategory::UnsupportedPlatform => {
                "Your browser does not support camera access. Please use a modern browser."
            }
            DenialCategory::Other => {
                "Camera access is required for this study. Please allow camera access and try again."
            }
        }
    }
}

/// Momentary camera access used only to learn the grant status. The device
/// is released as soon as the grant is confirmed; frames are never read here.
#[async_trait]
pub trait CameraAccess: Send + Sync {
    fn is_supported(&self) -> bool;

    async fn request_access(&self) -> Result<(), DenialCategory>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refusal_and_missing_device_have_distinct_messages() {
        assert_ne!(
            DenialCategory::UserRefused.user_message(),
            DenialCategory::NoDeviceFound.user_message()
        );
    }

    #[test]
    fn maps_browser_error_names() {
        assert_eq!(
            DenialCategory::from_error_name("NotAllowedError"),
            DenialCategory::UserRefused
        );
        assert_eq!(
            DenialCategory::from_error_name("NotFoundError"),
            DenialCategory::NoDeviceFound
        );
        assert_eq!(
            DenialCategory::from_error_name("NotReadableError"),
            DenialCategory::DeviceBusy
        );
        assert_eq!(
            DenialCategory::from_error_name("SomethingElse"),
            DenialCategory::Other
        );
    }
}
