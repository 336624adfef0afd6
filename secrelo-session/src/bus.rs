//! Cross-tab session signals.
//!
//! Stands in for the browser's storage-event broadcast: every tab that
//! shares durable storage subscribes to the same bus, and a logout in one
//! tab is delivered to all of them.

use tokio::sync::broadcast;
use uuid::Uuid;

const BUS_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionSignal {
    /// The tab identified by `origin` ended the shared auth session.
    LoggedOut { origin: Uuid },
}

impl SessionSignal {
    pub fn origin(&self) -> Uuid {
        match self {
            SessionSignal::LoggedOut { origin } => *origin,
        }
    }
}

/// Shared signal channel between sibling sessions. Cheap to clone.
#[derive(Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionSignal>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.tx.subscribe()
    }

    /// Sends `signal` to every subscriber. Returns how many received it.
    pub fn publish(&self, signal: SessionSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn every_subscriber_sees_a_logout() {
        let bus = SessionBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.clone().subscribe();

        let origin = Uuid::new_v4();
        assert_eq!(bus.publish(SessionSignal::LoggedOut { origin }), 2);

        assert_eq!(a.recv().await.unwrap().origin(), origin);
        assert_eq!(b.recv().await.unwrap().origin(), origin);
    }

    #[test]
    fn publish_without_subscribers_is_harmless() {
        let bus = SessionBus::new();
        let origin = Uuid::new_v4();
        assert_eq!(bus.publish(SessionSignal::LoggedOut { origin }), 0);
    }
}
