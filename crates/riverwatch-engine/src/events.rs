use riverwatch_common::types::EngineEvent;
use tokio::sync::broadcast;

/// Broadcast bus for engine events.
///
/// Consumers (statistics, notification delivery) subscribe out of
/// band; publishing never blocks and a bus with no subscribers drops
/// events silently.
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: EngineEvent) {
        tracing::debug!(event = ?event, "Publishing engine event");
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
