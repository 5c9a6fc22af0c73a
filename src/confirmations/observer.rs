//! Confirmation Outcome Notifications
//!
//! Observers are told about every terminal outcome. Notifications are
//! fire-and-forget and must not block the engine.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::types::Confirmation;

/// Receives confirmation outcomes
pub trait ConfirmationsObserver: Send + Sync {
    fn on_confirmed(&self, confirmation: &Confirmation);

    fn on_failed_to_confirm(&self, confirmation: &Confirmation);

    /// The server rejected the current token issuers
    fn on_issuers_out_of_date(&self) {}
}

/// Outcome event published on the broadcast channel
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConfirmationEvent {
    Confirmed { confirmation: Confirmation },
    FailedToConfirm { confirmation: Confirmation },
    IssuersOutOfDate,
}

/// Observer that publishes events to any number of subscribers
#[derive(Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<ConfirmationEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConfirmationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn publish(&self, event: ConfirmationEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(100)
    }
}

impl ConfirmationsObserver for EventPublisher {
    fn on_confirmed(&self, confirmation: &Confirmation) {
        self.publish(ConfirmationEvent::Confirmed {
            confirmation: confirmation.clone(),
        });
    }

    fn on_failed_to_confirm(&self, confirmation: &Confirmation) {
        self.publish(ConfirmationEvent::FailedToConfirm {
            confirmation: confirmation.clone(),
        });
    }

    fn on_issuers_out_of_date(&self) {
        self.publish(ConfirmationEvent::IssuersOutOfDate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publishes_to_subscribers() {
        let publisher = EventPublisher::default();
        let mut rx = publisher.subscribe();

        let confirmation = Confirmation {
            id: "c1".to_string(),
            ..Default::default()
        };
        publisher.on_confirmed(&confirmation);
        publisher.on_issuers_out_of_date();

        match rx.recv().await.unwrap() {
            ConfirmationEvent::Confirmed { confirmation } => assert_eq!(confirmation.id, "c1"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(rx.recv().await.unwrap(), ConfirmationEvent::IssuersOutOfDate));
    }

    #[test]
    fn test_publish_without_subscribers() {
        let publisher = EventPublisher::default();
        assert_eq!(publisher.subscriber_count(), 0);
        publisher.on_failed_to_confirm(&Confirmation::default());
    }
}
