//! Per-chain probe state: sample window, averages, liveness.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::sampler::{Sample, SampleWindow};

/// Which probe chain a state belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// Observer ↔ hub ack exchange.
    Server,
    /// Hub ↔ application ping/pong.
    App,
}

impl ChainKind {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Server => "server",
            Self::App => "app",
        }
    }
}

/// Chain state shared between the probe path and the staleness watch.
pub type SharedChain<S> = Arc<Mutex<ChainState<S>>>;

/// Result of [`ChainState::record`].
#[derive(Clone, Debug, PartialEq)]
pub struct Recorded<S> {
    /// The clamped sample as stored.
    pub sample: S,
    /// `Some(true)` if the chain was not known alive before this sample.
    pub transition: Option<bool>,
}

/// Snapshot of one chain for status replies.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStatus<A> {
    /// Chain name.
    pub chain: ChainKind,
    /// Whether probes are being emitted.
    pub enabled: bool,
    /// Probe period.
    pub interval_ms: u64,
    /// Staleness timeout; negative never expires.
    pub timeout_ms: i64,
    /// Whether a response arrived within the timeout.
    pub alive: bool,
    /// Time of the last response, epoch millis.
    pub last_seen: Option<i64>,
    /// Samples currently in the window.
    pub samples: usize,
    /// Window means, absent until the first sample.
    pub averages: Option<A>,
}

/// Mutable state of one probe chain.
///
/// Samples survive disable/enable; only the window's own eviction removes
/// them.
#[derive(Debug)]
pub struct ChainState<S: Sample> {
    kind: ChainKind,
    enabled: bool,
    interval_ms: u64,
    timeout_ms: i64,
    window: SampleWindow<S>,
    averages: Option<S::Averages>,
    last_seen: Option<i64>,
    known_alive: bool,
}

impl<S: Sample> ChainState<S> {
    /// Disabled chain with an empty window of `capacity`.
    pub fn new(kind: ChainKind, capacity: usize, interval_ms: u64, timeout_ms: i64) -> Self {
        Self {
            kind,
            enabled: false,
            interval_ms,
            timeout_ms,
            window: SampleWindow::new(capacity),
            averages: None,
            last_seen: None,
            known_alive: false,
        }
    }

    /// Wrap in the shared handle used across tasks.
    pub fn shared(self) -> SharedChain<S> {
        Arc::new(Mutex::new(self))
    }

    /// Clamp, store, recompute averages, and mark the chain seen at `now`.
    pub fn record(&mut self, raw: S, now: i64) -> Recorded<S> {
        let sample = raw.clamped();
        let _ = self.window.push(sample.clone());
        self.averages = S::averages(&self.window);
        let transition = self.mark_seen(now);
        Recorded { sample, transition }
    }

    /// Note a response at `now`. Returns `Some(true)` when the chain comes
    /// back alive.
    pub fn mark_seen(&mut self, now: i64) -> Option<bool> {
        self.last_seen = Some(now);
        if self.known_alive {
            None
        } else {
            self.known_alive = true;
            Some(true)
        }
    }

    /// Expire liveness. Returns `Some(false)` on the alive → unknown edge.
    pub fn check_staleness(&mut self, now: i64) -> Option<bool> {
        if !self.known_alive || self.timeout_ms < 0 {
            return None;
        }
        let last_seen = self.last_seen?;
        if now - last_seen > self.timeout_ms {
            self.known_alive = false;
            Some(false)
        } else {
            None
        }
    }

    /// Chain name.
    pub fn kind(&self) -> ChainKind {
        self.kind
    }

    /// Whether probes are being emitted.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Record whether probes are being emitted.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Probe period.
    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Change the probe period.
    pub fn set_interval_ms(&mut self, interval_ms: u64) {
        self.interval_ms = interval_ms;
    }

    /// Staleness timeout.
    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    /// Change the staleness timeout. Negative disables expiry.
    pub fn set_timeout_ms(&mut self, timeout_ms: i64) {
        self.timeout_ms = timeout_ms;
    }

    /// Whether the chain is known alive.
    pub fn is_alive(&self) -> bool {
        self.known_alive
    }

    /// Last response time.
    pub fn last_seen(&self) -> Option<i64> {
        self.last_seen
    }

    /// Current window means.
    pub fn averages(&self) -> Option<&S::Averages> {
        self.averages.as_ref()
    }

    /// Stored samples.
    pub fn window(&self) -> &SampleWindow<S> {
        &self.window
    }

    /// Serializable snapshot.
    pub fn status(&self) -> ChainStatus<S::Averages> {
        ChainStatus {
            chain: self.kind,
            enabled: self.enabled,
            interval_ms: self.interval_ms,
            timeout_ms: self.timeout_ms,
            alive: self.known_alive,
            last_seen: self.last_seen,
            samples: self.window.len(),
            averages: self.averages.clone(),
        }
    }
}
