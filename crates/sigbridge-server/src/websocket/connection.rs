//! Per-observer connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

use crate::protocol::ObserverEvent;

/// One connected observer.
///
/// Outbound frames go through a bounded queue drained by the session's
/// writer task. A full queue drops the frame instead of blocking the hub.
pub struct ObserverConnection {
    /// Connection id, `observer_<uuid>`.
    pub id: String,
    tx: mpsc::Sender<Arc<str>>,
    /// When the upgrade completed.
    pub connected_at: Instant,
    last_activity: Mutex<Instant>,
    dropped: AtomicU64,
}

impl ObserverConnection {
    /// Connection with the given id writing into `tx`.
    pub fn new(id: String, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
            dropped: AtomicU64::new(0),
        }
    }

    /// Fresh id for a new observer.
    pub fn generate_id() -> String {
        format!("observer_{}", uuid::Uuid::now_v7())
    }

    /// Queue a pre-serialized frame. Returns `false` and counts a drop when
    /// the queue is full or the writer is gone.
    pub fn send(&self, frame: Arc<str>) -> bool {
        if self.tx.try_send(frame).is_ok() {
            true
        } else {
            let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Serialize and queue a single event.
    pub fn send_event(&self, event: &ObserverEvent) -> bool {
        match serde_json::to_string(event) {
            Ok(text) => self.send(Arc::from(text)),
            Err(e) => {
                warn!(observer = %self.id, event = event.name(), error = %e, "failed to serialize event");
                false
            }
        }
    }

    /// Frames dropped so far.
    pub fn drop_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Note inbound traffic (a frame or a pong).
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound traffic.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }
}
