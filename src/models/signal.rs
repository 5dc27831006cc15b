//! Inference events as they are buffered and uploaded.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SignalKind {
    ArousalValence,
    Emotion,
    Attention,
    FaceDetection,
}

/// One raw output of the inference engine, before it is stamped with media
/// and wall-clock time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Detection {
    #[serde(rename = "FACE_AROUSAL_VALENCE")]
    ArousalValence { arousal: f64, valence: f64 },
    #[serde(rename = "FACE_EMOTION", rename_all = "camelCase")]
    Emotion {
        dominant_emotion: String,
        emotions: BTreeMap<String, f64>,
    },
    #[serde(rename = "FACE_ATTENTION")]
    Attention { attention: f64 },
    #[serde(rename = "FACE_DETECTOR", rename_all = "camelCase")]
    FaceDetection { total_faces: u32, status: String },
}

impl Detection {
    pub fn kind(&self) -> SignalKind {
        match self {
            Detection::ArousalValence { .. } => SignalKind::ArousalValence,
            Detection::Emotion { .. } => SignalKind::Emotion,
            Detection::Attention { .. } => SignalKind::Attention,
            Detection::FaceDetection { .. } => SignalKind::FaceDetection,
        }
    }
}

/// A detection stamped with the media position and the milliseconds elapsed
/// since tracking started. Serialized flat, e.g.
/// `{"mediaTime":1.5,"timestamp":1500,"type":"FACE_ATTENTION","attention":0.9}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEvent {
    #[serde(rename = "mediaTime")]
    pub media_time_seconds: f64,
    #[serde(rename = "timestamp")]
    pub offset_ms: u64,
    #[serde(flatten)]
    pub detection: Detection,
}

impl SignalEvent {
    pub fn new(media_time_seconds: f64, offset_ms: u64, detection: Detection) -> Self {
        Self {
            media_time_seconds,
            offset_ms,
            detection,
        }
    }

    pub fn kind(&self) -> SignalKind {
        self.detection.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_flat_with_type_tag() {
        let event = SignalEvent::new(
            2.25,
            2250,
            Detection::FaceDetection {
                total_faces: 1,
                status: "FACE_FOUND".into(),
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "mediaTime": 2.25,
                "timestamp": 2250,
                "type": "FACE_DETECTOR",
                "totalFaces": 1,
                "status": "FACE_FOUND"
            })
        );
    }

    #[test]
    fn emotion_payload_uses_camel_case_fields() {
        let mut emotions = BTreeMap::new();
        emotions.insert("Happy".to_string(), 0.7);
        let event = SignalEvent::new(
            0.5,
            500,
            Detection::Emotion {
                dominant_emotion: "Happy".into(),
                emotions,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "FACE_EMOTION");
        assert_eq!(value["dominantEmotion"], "Happy");
        assert_eq!(value["emotions"]["Happy"], 0.7);
        assert_eq!(event.kind(), SignalKind::Emotion);
    }
}
