//! Fan-out of hub events to every connected observer.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::counter;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::connection::ObserverConnection;
use crate::metrics::BROADCAST_DROPS_TOTAL;
use crate::protocol::ObserverEvent;

/// The set of connected observers.
///
/// Broadcasting serializes once and pushes the same frame into each
/// observer's queue without waiting, so one slow observer cannot stall the
/// others or the receive loop.
#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<HashMap<String, Arc<ObserverConnection>>>,
}

impl ObserverSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer. An existing entry with the same id is replaced.
    pub fn add(&self, observer: Arc<ObserverConnection>) {
        let _ = self
            .observers
            .write()
            .insert(observer.id.clone(), observer);
    }

    /// Remove an observer by id.
    pub fn remove(&self, id: &str) -> Option<Arc<ObserverConnection>> {
        self.observers.write().remove(id)
    }

    /// Look up an observer.
    pub fn get(&self, id: &str) -> Option<Arc<ObserverConnection>> {
        self.observers.read().get(id).cloned()
    }

    /// Connected observers.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Send `event` to every observer. Returns how many queues accepted it.
    pub fn broadcast(&self, event: &ObserverEvent) -> usize {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(text) => Arc::from(text),
            Err(e) => {
                warn!(event = event.name(), error = %e, "failed to serialize broadcast");
                return 0;
            }
        };

        let observers = self.observers.read();
        let mut delivered = 0;
        for observer in observers.values() {
            if observer.send(Arc::clone(&frame)) {
                delivered += 1;
            } else {
                counter!(BROADCAST_DROPS_TOTAL).increment(1);
                warn!(observer = %observer.id, event = event.name(), "observer queue full, frame dropped");
            }
        }
        debug!(event = event.name(), recipients = observers.len(), delivered, "broadcast");
        delivered
    }
}
