use log::debug;

use crate::models::SignalEvent;

use super::Stage;

/// Append-only log of signal events for one session.
///
/// Events are kept exactly as delivered: no sorting, no deduplication. The
/// inference stream is asynchronous and may deliver events just before or
/// after the `Playing` window, so appends outside it are dropped rather
/// than queued.
#[derive(Debug, Clone, Default)]
pub struct SignalBuffer {
    events: Vec<SignalEvent>,
    dropped: u64,
}

impl SignalBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the event was kept.
    pub fn append(&mut self, stage: &Stage, event: SignalEvent) -> bool {
        if *stage != Stage::Playing {
            self.dropped = self.dropped.saturating_add(1);
            debug!(
                "Dropping {:?} event outside playback window (stage={})",
                event.kind(),
                stage.label()
            );
            return false;
        }

        self.events.push(event);
        true
    }

    pub fn snapshot(&self) -> Vec<SignalEvent> {
        self.events.clone()
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.dropped = 0;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Count of events rejected because the session was not playing.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::models::Detection;

    fn attention(offset_ms: u64, value: f64) -> SignalEvent {
        SignalEvent::new(
            offset_ms as f64 / 1000.0,
            offset_ms,
            Detection::Attention { attention: value },
        )
    }

    #[test]
    fn ignores_events_outside_playing() {
        let mut buffer = SignalBuffer::new();
        let not_playing = [
            Stage::Idle,
            Stage::AwaitingPermission,
            Stage::Finalizing,
            Stage::Uploading,
            Stage::Complete,
            Stage::Error {
                kind: FailureKind::PlaybackFailed,
                message: "boom".into(),
            },
        ];

        for stage in &not_playing {
            assert!(!buffer.append(stage, attention(10, 0.1)));
        }
        assert!(buffer.append(&Stage::Playing, attention(20, 0.2)));

        let snapshot = buffer.snapshot();
        assert_eq!(snapshot, vec![attention(20, 0.2)]);
        assert_eq!(buffer.dropped(), not_playing.len() as u64);
    }

    #[test]
    fn keeps_append_order_and_duplicates() {
        let mut buffer = SignalBuffer::new();
        let events = vec![
            attention(300, 0.3),
            attention(100, 0.1),
            attention(100, 0.1),
            attention(200, 0.2),
        ];
        for event in &events {
            buffer.append(&Stage::Playing, event.clone());
        }

        assert_eq!(buffer.snapshot(), events);
    }

    #[test]
    fn clear_empties_the_log() {
        let mut buffer = SignalBuffer::new();
        buffer.append(&Stage::Playing, attention(1, 0.5));
        buffer.append(&Stage::Idle, attention(2, 0.5));
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 0);
        assert!(buffer.snapshot().is_empty());
    }
}
