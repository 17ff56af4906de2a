//! Enforcer client registry and event fan-out
//!
//! Every connected enforcer owns one bounded channel. A new client first gets
//! an `ALL_EVENTS` event telling it to resync from the HTTP surface; after that
//! it receives each change exactly once. Nothing is buffered for clients that
//! connect later.

pub mod server;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::proto::{event_type, Event};

pub use server::EventStreamServer;

/// Capacity of each client's event channel
pub const CLIENT_BUFFER: usize = 256;

/// Shared handle to the fan-out registry
pub type SharedFanOut = Arc<FanOut>;

/// Event with a fresh UUID and the given type and timestamp
pub fn new_event(event_type: &str, time_stamp: i64) -> Event {
    Event {
        uuid: uuid::Uuid::new_v4().to_string(),
        r#type: event_type.to_string(),
        time_stamp,
        ..Default::default()
    }
}

/// Registry of connected enforcers
#[derive(Debug, Default)]
pub struct FanOut {
    clients: DashMap<String, mpsc::Sender<Event>>,
}

impl FanOut {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `client_id` and return its event stream, primed with `ALL_EVENTS`
    ///
    /// A client reconnecting under the same id replaces its old registration.
    pub fn connect(&self, client_id: &str) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let resync = new_event(event_type::ALL_EVENTS, chrono::Utc::now().timestamp_millis());
        // fresh channel, cannot be full
        let _ = tx.try_send(resync);

        if self.clients.insert(client_id.to_string(), tx).is_some() {
            info!(client_id = %client_id, "Enforcer reconnected");
        } else {
            info!(client_id = %client_id, "Enforcer connected");
        }
        rx
    }

    /// Remove a client
    pub fn disconnect(&self, client_id: &str) {
        if self.clients.remove(client_id).is_some() {
            info!(client_id = %client_id, "Enforcer disconnected");
        }
    }

    /// Remove `client_id` once its stream has gone away
    ///
    /// A newer registration under the same id is left in place.
    pub fn release(&self, client_id: &str) {
        if self.clients.remove_if(client_id, |_, tx| tx.is_closed()).is_some() {
            info!(client_id = %client_id, "Enforcer disconnected");
        }
    }

    /// Send `event` to every connected client
    ///
    /// Clients whose stream has gone away are removed; a client whose buffer
    /// is full misses the event and is told so in the log.
    pub fn broadcast(&self, event: &Event) {
        let mut closed = Vec::new();
        for entry in self.clients.iter() {
            match entry.value().try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(client_id = %entry.key(), event_type = %event.r#type, "Enforcer buffer full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(entry.key().clone()),
            }
        }
        for client_id in closed {
            // only drop the registration whose channel actually closed
            self.clients
                .remove_if(&client_id, |_, tx| tx.is_closed());
            debug!(client_id = %client_id, "Removed closed enforcer stream");
        }
        debug!(event_type = %event.r#type, clients = self.clients.len(), "Event broadcast");
    }

    /// Ids of connected clients
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// Whether `client_id` is connected
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    /// Number of connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_only_removes_closed_streams() {
        let fanout = FanOut::new();
        let rx = fanout.connect("enforcer-0");
        fanout.release("enforcer-0");
        assert!(fanout.is_connected("enforcer-0"));

        drop(rx);
        fanout.release("enforcer-0");
        assert!(!fanout.is_connected("enforcer-0"));
    }

    #[tokio::test]
    async fn test_connect_primes_with_all_events() {
        let fanout = FanOut::new();
        let mut rx = fanout.connect("enforcer-0");
        let first = rx.recv().await.unwrap();
        assert_eq!(first.r#type, event_type::ALL_EVENTS);
        assert!(!first.uuid.is_empty());
        assert!(fanout.is_connected("enforcer-0"));
    }

    /// Story: Two enforcers each see a change exactly once after their resync
    #[tokio::test]
    async fn story_two_clients_receive_broadcast_once() {
        let fanout = FanOut::new();
        let mut a = fanout.connect("a");
        let mut b = fanout.connect("b");

        fanout.broadcast(&new_event(event_type::APPLICATION_CREATED, 1));

        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().r#type, event_type::ALL_EVENTS);
            assert_eq!(rx.recv().await.unwrap().r#type, event_type::APPLICATION_CREATED);
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn test_closed_client_removed_on_broadcast() {
        let fanout = FanOut::new();
        let rx = fanout.connect("gone");
        let _keep = fanout.connect("stays");
        drop(rx);

        fanout.broadcast(&new_event(event_type::SUBSCRIPTION_CREATED, 1));

        assert!(!fanout.is_connected("gone"));
        assert!(fanout.is_connected("stays"));
        assert_eq!(fanout.len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_replaces_registration() {
        let fanout = FanOut::new();
        let old = fanout.connect("e");
        let mut new = fanout.connect("e");
        drop(old);

        fanout.broadcast(&new_event(event_type::APPLICATION_DELETED, 2));

        assert!(fanout.is_connected("e"));
        assert_eq!(new.recv().await.unwrap().r#type, event_type::ALL_EVENTS);
        assert_eq!(new.recv().await.unwrap().r#type, event_type::APPLICATION_DELETED);
    }

    #[test]
    fn test_disconnect() {
        let fanout = FanOut::new();
        let _rx = fanout.connect("e");
        fanout.disconnect("e");
        assert!(fanout.is_empty());
        assert!(fanout.client_ids().is_empty());
    }
}
