//! Timer-driven probe emission and staleness polling.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sigbridge_core::clock::now_millis;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::chain::{ChainStatus, SharedChain};
use crate::sampler::Sample;

/// Default staleness poll period.
pub const DEFAULT_STALENESS_TICK: Duration = Duration::from_millis(200);

/// Sends one probe. Implementations record whatever they need to match the
/// response later.
#[async_trait]
pub trait ProbeEmitter: Send + Sync + 'static {
    /// Emit a single probe.
    async fn emit_probe(&self);
}

struct Timer {
    interval: Duration,
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Periodic probe timer for one chain.
///
/// Each timer runs on a child of the parent token, so cancelling the parent
/// stops every scheduler sharing it.
pub struct ProbeScheduler {
    name: &'static str,
    emitter: Arc<dyn ProbeEmitter>,
    parent: CancellationToken,
    timer: Mutex<Option<Timer>>,
}

impl ProbeScheduler {
    /// Disabled scheduler.
    pub fn new(
        name: &'static str,
        emitter: Arc<dyn ProbeEmitter>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            name,
            emitter,
            parent,
            timer: Mutex::new(None),
        }
    }

    /// Start emitting every `interval`. The first probe goes out one full
    /// interval from now. Enabling an enabled scheduler restarts it.
    pub fn enable(&self, interval: Duration) {
        let mut timer = self.timer.lock();
        if let Some(old) = timer.take() {
            old.cancel.cancel();
        }
        *timer = Some(self.spawn(interval));
        debug!(
            chain = self.name,
            interval_ms = interval.as_millis() as u64,
            "probe timer started"
        );
    }

    /// Change the period. Restarts the timer from zero when enabled;
    /// returns whether it did.
    pub fn set_interval(&self, interval: Duration) -> bool {
        let mut timer = self.timer.lock();
        match timer.take() {
            Some(old) if !old.cancel.is_cancelled() => {
                old.cancel.cancel();
                *timer = Some(self.spawn(interval));
                debug!(
                    chain = self.name,
                    interval_ms = interval.as_millis() as u64,
                    "probe timer restarted"
                );
                true
            }
            _ => false,
        }
    }

    /// Stop emitting. Idempotent.
    pub fn disable(&self) {
        if let Some(old) = self.timer.lock().take() {
            old.cancel.cancel();
            debug!(chain = self.name, "probe timer stopped");
        }
    }

    /// Whether a live timer is running.
    pub fn is_enabled(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|t| !t.cancel.is_cancelled())
    }

    /// Current period, when enabled.
    pub fn interval(&self) -> Option<Duration> {
        self.timer
            .lock()
            .as_ref()
            .filter(|t| !t.cancel.is_cancelled())
            .map(|t| t.interval)
    }

    fn spawn(&self, interval: Duration) -> Timer {
        let interval = interval.max(Duration::from_millis(1));
        let cancel = self.parent.child_token();
        let token = cancel.clone();
        let emitter = Arc::clone(&self.emitter);
        let name = self.name;
        let first = Instant::now() + interval;

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(first, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        trace!(chain = name, "emitting probe");
                        emitter.emit_probe().await;
                    }
                }
            }
        });

        Timer {
            interval,
            cancel,
            _handle: handle,
        }
    }
}

impl Drop for ProbeScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.cancel.cancel();
        }
    }
}

/// Poll `chain` every `tick` and call `on_change` with a fresh status on
/// each liveness transition. Returns when `cancel` fires.
pub async fn run_staleness_watch<S, F, Fut>(
    chain: SharedChain<S>,
    tick: Duration,
    cancel: CancellationToken,
    mut on_change: F,
) where
    S: Sample,
    F: FnMut(ChainStatus<S::Averages>) -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    let mut ticker = time::interval(tick.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let changed = {
                    let mut state = chain.lock();
                    state
                        .check_staleness(now_millis())
                        .map(|_| state.status())
                };
                if let Some(status) = changed {
                    debug!(chain = status.chain.as_str(), "probe chain went stale");
                    on_change(status).await;
                }
            }
        }
    }
}
