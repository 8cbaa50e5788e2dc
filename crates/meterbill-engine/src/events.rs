//! Reading change notifications
//!
//! The engine publishes one event per committed transition. Delivery is
//! best effort: slow subscribers see `RecvError::Lagged` and no one blocks
//! the engine.

use chrono::{DateTime, Utc};
use meterbill_common::Reading;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingEventKind {
    Submitted,
    Approved,
    Rejected,
    Reopened,
}

impl ReadingEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingEventKind::Submitted => "submitted",
            ReadingEventKind::Approved => "approved",
            ReadingEventKind::Rejected => "rejected",
            ReadingEventKind::Reopened => "reopened",
        }
    }
}

/// A committed change and the reading as stored after it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingEvent {
    pub kind: ReadingEventKind,
    pub reading: Reading,
    pub emitted_at: DateTime<Utc>,
}

pub struct EventPublisher {
    tx: broadcast::Sender<ReadingEvent>,
}

impl EventPublisher {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn publish(&self, kind: ReadingEventKind, reading: &Reading) {
        let event = ReadingEvent {
            kind,
            reading: reading.clone(),
            emitted_at: Utc::now(),
        };
        if self.tx.send(event).is_err() {
            debug!(reading_id = %reading.id, "No event subscribers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReadingEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterbill_common::OcrCandidate;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let publisher = EventPublisher::new(16);
        let mut rx = publisher.subscribe();
        let reading = Reading::new_pending("A1", "img", OcrCandidate::empty(), Utc::now(), chrono_tz::UTC);

        publisher.publish(ReadingEventKind::Submitted, &reading);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ReadingEventKind::Submitted);
        assert_eq!(event.reading.id, reading.id);
    }

    #[test]
    fn test_event_wire_shape() {
        let reading = Reading::new_pending("A1", "img", OcrCandidate::empty(), Utc::now(), chrono_tz::UTC);
        let event = ReadingEvent {
            kind: ReadingEventKind::Reopened,
            reading,
            emitted_at: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "reopened");
        assert_eq!(json["reading"]["flatId"], "A1");
        assert_eq!(json["reading"]["status"], "pending");
        assert!(json.get("emittedAt").is_some());
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let publisher = EventPublisher::new(4);
        let reading = Reading::new_pending("A1", "img", OcrCandidate::empty(), Utc::now(), chrono_tz::UTC);
        publisher.publish(ReadingEventKind::Submitted, &reading);
        assert_eq!(publisher.subscriber_count(), 0);
    }
}
