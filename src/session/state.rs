use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use uuid::Uuid;

use crate::{
    catalog::TaskAssignment,
    error::{FailureKind, SessionError},
    models::{Detection, SignalEvent},
    permission::DenialCategory,
};

use super::SignalBuffer;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "name", rename_all = "camelCase")]
pub enum Stage {
    #[default]
    Idle,
    AwaitingPermission,
    Playing,
    Finalizing,
    Uploading,
    Complete,
    Error { kind: FailureKind, message: String },
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Idle => "Idle",
            Stage::AwaitingPermission => "AwaitingPermission",
            Stage::Playing => "Playing",
            Stage::Finalizing => "Finalizing",
            Stage::Uploading => "Uploading",
            Stage::Complete => "Complete",
            Stage::Error { .. } => "Error",
        }
    }

    /// `Complete` and `Error` only leave through `retry`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Complete | Stage::Error { .. })
    }

    fn failed(error: &SessionError) -> Self {
        Stage::Error {
            kind: error.kind(),
            message: error.user_message(),
        }
    }

    /// Transition table. Pure: side effects belong to the controller.
    pub fn next(&self, event: &SessionEvent) -> Result<Stage, TransitionError> {
        use SessionEvent as E;

        match (self, event) {
            (_, E::Retry) => Ok(Stage::Idle),
            (Stage::Idle | Stage::AwaitingPermission, E::RequestPermission) => {
                Ok(Stage::AwaitingPermission)
            }
            (Stage::AwaitingPermission, E::PermissionGranted) => Ok(Stage::Playing),
            (Stage::AwaitingPermission, E::PermissionDenied(category)) => {
                Ok(Stage::failed(&SessionError::PermissionDenied {
                    category: *category,
                }))
            }
            (Stage::Playing, E::PlaybackEnded) => Ok(Stage::Finalizing),
            (Stage::Finalizing, E::PayloadReady) => Ok(Stage::Uploading),
            (Stage::Uploading, E::UploadSucceeded) => Ok(Stage::Complete),
            (Stage::Uploading, E::UploadExhausted { attempts, last_error }) => {
                Ok(Stage::failed(&SessionError::UploadExhausted {
                    attempts: *attempts,
                    last_error: last_error.clone(),
                }))
            }
            (stage, E::Fail(error)) if !stage.is_terminal() && error.is_fatal() => {
                Ok(Stage::failed(error))
            }
            (stage, event) => Err(TransitionError {
                from: stage.label(),
                event: event.label(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RequestPermission,
    PermissionGranted,
    PermissionDenied(DenialCategory),
    PlaybackEnded,
    PayloadReady,
    UploadSucceeded,
    UploadExhausted { attempts: u32, last_error: String },
    Fail(SessionError),
    Retry,
}

impl SessionEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SessionEvent::RequestPermission => "requestPermission",
            SessionEvent::PermissionGranted => "permissionGranted",
            SessionEvent::PermissionDenied(_) => "permissionDenied",
            SessionEvent::PlaybackEnded => "playbackEnded",
            SessionEvent::PayloadReady => "payloadReady",
            SessionEvent::UploadSucceeded => "uploadSucceeded",
            SessionEvent::UploadExhausted { .. } => "uploadExhausted",
            SessionEvent::Fail(_) => "fail",
            SessionEvent::Retry => "retry",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot apply {event} while {from}")]
pub struct TransitionError {
    pub from: &'static str,
    pub event: &'static str,
}

/// One attempt at the viewing task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub worker_id: String,
    pub task_id: String,
    pub video_url: String,
    pub stage: Stage,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    signals: SignalBuffer,
    /// Set when playback starts; event offsets are measured from here.
    #[serde(skip)]
    running_anchor: Option<Instant>,
}

impl Session {
    pub fn new(assignment: &TaskAssignment, worker_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            worker_id: worker_id.into(),
            task_id: assignment.task_id.clone(),
            video_url: assignment.video_url.clone(),
            stage: Stage::Idle,
            started_at: None,
            signals: SignalBuffer::new(),
            running_anchor: None,
        }
    }

    /// Applies a transition. `retry` also discards the buffer and issues a
    /// new session id, so late results for the old attempt can be told apart.
    pub fn apply(&mut self, event: SessionEvent) -> Result<&Stage, TransitionError> {
        let next = self.stage.next(&event)?;

        match (&event, &next) {
            (SessionEvent::Retry, _) => {
                self.id = Uuid::new_v4().to_string();
                self.started_at = None;
                self.running_anchor = None;
                self.signals.clear();
            }
            (_, Stage::Playing) => {
                self.started_at = Some(Utc::now());
                self.running_anchor = Some(Instant::now());
            }
            _ => {}
        }

        self.stage = next;
        Ok(&self.stage)
    }

    pub fn started_at_ms(&self) -> Option<i64> {
        self.started_at.map(|dt| dt.timestamp_millis())
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.running_anchor
            .map(|anchor| anchor.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Stamps a detection and appends it if the session is playing.
    pub fn record(&mut self, detection: Detection, media_time_seconds: f64) -> bool {
        let event = SignalEvent::new(media_time_seconds, self.elapsed_ms(), detection);
        self.signals.append(&self.stage, event)
    }

    pub fn signals(&self) -> &SignalBuffer {
        &self.signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment() -> TaskAssignment {
        TaskAssignment {
            task_id: "video1".into(),
            video_url: "https://cdn.example/video1.mp4".into(),
            completion_code: "EM7K2X9Q".into(),
        }
    }

    #[test]
    fn happy_path_walks_every_stage() {
        let mut stage = Stage::default();
        assert_eq!(stage, Stage::Idle);
        for (event, expected) in [
            (SessionEvent::RequestPermission, Stage::AwaitingPermission),
            (SessionEvent::PermissionGranted, Stage::Playing),
            (SessionEvent::PlaybackEnded, Stage::Finalizing),
            (SessionEvent::PayloadReady, Stage::Uploading),
            (SessionEvent::UploadSucceeded, Stage::Complete),
        ] {
            stage = stage.next(&event).unwrap();
            assert_eq!(stage, expected);
        }
    }

    #[test]
    fn terminal_stages_only_accept_retry() {
        let failed = Stage::Idle
            .next(&SessionEvent::Fail(SessionError::DeviceUnsupported))
            .unwrap();

        for terminal in [Stage::Complete, failed] {
            for event in [
                SessionEvent::RequestPermission,
                SessionEvent::PermissionGranted,
                SessionEvent::PlaybackEnded,
                SessionEvent::UploadSucceeded,
                SessionEvent::Fail(SessionError::PlaybackFailed("x".into())),
            ] {
                assert!(terminal.next(&event).is_err());
            }
            assert_eq!(terminal.next(&SessionEvent::Retry).unwrap(), Stage::Idle);
        }
    }

    #[test]
    fn out_of_order_events_are_rejected() {
        let err = Stage::Idle.next(&SessionEvent::PlaybackEnded).unwrap_err();
        assert_eq!(
            err,
            TransitionError {
                from: "Idle",
                event: "playbackEnded"
            }
        );
        assert!(Stage::Playing.next(&SessionEvent::RequestPermission).is_err());
        assert!(Stage::Finalizing.next(&SessionEvent::UploadSucceeded).is_err());
    }

    #[test]
    fn denial_carries_category_message() {
        let stage = Stage::AwaitingPermission
            .next(&SessionEvent::PermissionDenied(DenialCategory::DeviceBusy))
            .unwrap();
        assert_eq!(
            stage,
            Stage::Error {
                kind: FailureKind::PermissionDenied,
                message: DenialCategory::DeviceBusy.user_message().into(),
            }
        );
    }

    #[test]
    fn exhausted_upload_maps_to_upload_failure() {
        let stage = Stage::Uploading
            .next(&SessionEvent::UploadExhausted {
                attempts: 3,
                last_error: "503".into(),
            })
            .unwrap();
        assert!(matches!(
            stage,
            Stage::Error {
                kind: FailureKind::UploadExhausted,
                ..
            }
        ));
    }

    #[test]
    fn presentation_loss_is_not_a_transition() {
        let err = Stage::Playing
            .next(&SessionEvent::Fail(SessionError::PresentationUnavailable(
                "denied".into(),
            )))
            .unwrap_err();
        assert_eq!(err.from, "Playing");
    }

    #[tokio::test]
    async fn records_only_while_playing_and_retry_discards() {
        let mut session = Session::new(&assignment(), "w-1");
        let first_id = session.id.clone();
        let detection = Detection::Attention { attention: 0.4 };

        assert!(!session.record(detection.clone(), 0.0));
        session.apply(SessionEvent::RequestPermission).unwrap();
        session.apply(SessionEvent::PermissionGranted).unwrap();
        assert!(session.started_at_ms().is_some());
        assert!(session.record(detection.clone(), 0.5));
        session.apply(SessionEvent::PlaybackEnded).unwrap();
        assert!(!session.record(detection, 0.6));
        assert_eq!(session.signals().len(), 1);

        session.apply(SessionEvent::Retry).unwrap();
        assert_eq!(session.stage, Stage::Idle);
        assert!(session.signals().snapshot().is_empty());
        assert!(session.started_at.is_none());
        assert_ne!(session.id, first_id);
    }
}
