use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::types::Event;

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn write(&self, event: &Event);
}

/// Fan-out of channel events to live subscribers and registered sinks.
///
/// Sinks are fixed at construction; subscribers may come and go.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Event>,
    sinks: Arc<[Arc<dyn EventSink>]>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        Self::with_sinks(buffer, Vec::new())
    }

    pub fn with_sinks(buffer: usize, sinks: Vec<Arc<dyn EventSink>>) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self {
            tx,
            sinks: sinks.into(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Delivers to subscribers immediately and to sinks on detached tasks,
    /// so a slow sink never holds up the caller.
    pub async fn emit(&self, event: Event) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event.clone());
        }
        for sink in self.sinks.iter() {
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                sink.write(&event).await;
            });
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(256)
    }
}
