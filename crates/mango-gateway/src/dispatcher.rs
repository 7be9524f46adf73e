use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::warn;

use mango_types::events::SocketEvent;

/// An event serialized once and fanned out to every socket.
#[derive(Debug, Clone)]
pub struct Broadcast {
    /// `None` means every connected user receives it.
    pub recipients: Option<Arc<[i64]>>,
    pub json: Arc<str>,
}

impl Broadcast {
    pub fn is_for(&self, user_id: i64) -> bool {
        self.recipients
            .as_ref()
            .is_none_or(|ids| ids.contains(&user_id))
    }
}

/// Fans socket events out to all connected clients.
#[derive(Clone)]
pub struct Dispatcher {
    tx: broadcast::Sender<Broadcast>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1024);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
        self.tx.subscribe()
    }

    /// Deliver an event to every connected client.
    pub fn broadcast(&self, event: &SocketEvent) {
        self.publish(event, None);
    }

    /// Deliver an event only to the given users.
    pub fn send_to(&self, event: &SocketEvent, user_ids: &[i64]) {
        self.publish(event, Some(Arc::from(user_ids)));
    }

    fn publish(&self, event: &SocketEvent, recipients: Option<Arc<[i64]>>) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize socket event: {}", e);
                return;
            }
        };
        // No receivers just means nobody is connected.
        let _ = self.tx.send(Broadcast {
            recipients,
            json: Arc::from(json),
        });
    }
}
