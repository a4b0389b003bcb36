use super::types::{EventSequence, MonitorEvent, MonitorEventPayload};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<MonitorEvent>;
pub type EventSender = broadcast::Sender<MonitorEvent>;

/// Event bus for distributing monitor events
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number)
    pub fn publish(&self, payload: MonitorEventPayload) -> Result<EventSequence, String> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = MonitorEvent {
            sequence,
            timestamp: Utc::now(),
            payload,
        };

        self.sender
            .send(event)
            .map(|_| sequence)
            .map_err(|e| format!("Failed to publish event: {}", e))
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skipped(name: &str) -> MonitorEventPayload {
        MonitorEventPayload::FileSkipped {
            file_name: name.to_string(),
            reason: "already processed".to_string(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(100);
        let mut rx = bus.subscribe();

        let seq = bus.publish(skipped("a.csv")).unwrap();
        assert_eq!(seq, 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.sequence, 1);
        assert_eq!(event.file_name(), Some("a.csv"));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(100);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        bus.publish(MonitorEventPayload::MonitoringStopped).unwrap();

        let event1 = rx1.recv().await.unwrap();
        let event2 = rx2.recv().await.unwrap();
        assert_eq!(event1.sequence, event2.sequence);
        assert_eq!(event1.payload_type(), "monitoring_stopped");
    }

    #[test]
    fn test_sequence_ordering() {
        let bus = EventBus::new(100);
        let _rx = bus.subscribe(); // Keep receiver alive to prevent channel from closing

        let seq1 = bus.publish(skipped("1.csv")).unwrap();
        let seq2 = bus.publish(skipped("2.csv")).unwrap();

        assert_eq!(seq1, 1);
        assert_eq!(seq2, 2);
    }

    #[test]
    fn test_publish_without_subscribers_errors() {
        let bus = EventBus::new(10);
        assert!(bus.publish(skipped("x.csv")).is_err());
    }
}
