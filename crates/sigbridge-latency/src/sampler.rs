//! Sample types and the bounded sample window.

use std::collections::VecDeque;
use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Default window size for both chains.
pub const DEFAULT_CAPACITY: usize = 50;

/// Fixed-capacity FIFO of samples. Pushing into a full window evicts the
/// oldest entry.
#[derive(Clone, Debug)]
pub struct SampleWindow<T> {
    samples: VecDeque<T>,
    capacity: usize,
}

impl<T> SampleWindow<T> {
    /// Empty window. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted sample when the window was full.
    pub fn push(&mut self, sample: T) -> Option<T> {
        let evicted = if self.samples.len() == self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Number of stored samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &T> {
        self.samples.iter()
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&T> {
        self.samples.back()
    }
}

impl<T> Default for SampleWindow<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A multi-timestamp probe measurement.
pub trait Sample: Clone + Debug + Send + Serialize + DeserializeOwned + 'static {
    /// Derived means over a window.
    type Averages: Clone + Debug + PartialEq + Send + Serialize + DeserializeOwned + 'static;

    /// Raise each timestamp to at least its predecessor.
    #[must_use]
    fn clamped(self) -> Self;

    /// Means over `window`, `None` when it is empty.
    fn averages(window: &SampleWindow<Self>) -> Option<Self::Averages>;
}

/// One `ack_request` round trip, epoch millis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSample {
    /// Observer sent the request.
    pub requested: i64,
    /// Hub received it.
    pub received: i64,
    /// Hub replied.
    pub responded: i64,
    /// Observer received the reply.
    pub received_at_client: i64,
}

impl ServerSample {
    /// `received_at_client - requested`.
    pub fn round_trip(&self) -> i64 {
        self.received_at_client.saturating_sub(self.requested)
    }

    /// `received - requested`.
    pub fn request_leg(&self) -> i64 {
        self.received.saturating_sub(self.requested)
    }

    /// `received_at_client - responded`.
    pub fn response_leg(&self) -> i64 {
        self.received_at_client.saturating_sub(self.responded)
    }

    /// `responded - received`.
    pub fn remote_processing(&self) -> i64 {
        self.responded.saturating_sub(self.received)
    }
}

/// Server chain means, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerAverages {
    /// Mean of [`ServerSample::round_trip`].
    pub round_trip: f64,
    /// Mean of [`ServerSample::request_leg`].
    pub request_leg: f64,
    /// Mean of [`ServerSample::response_leg`].
    pub response_leg: f64,
    /// Mean of [`ServerSample::remote_processing`].
    pub remote_processing: f64,
}

impl Sample for ServerSample {
    type Averages = ServerAverages;

    fn clamped(self) -> Self {
        let received = self.received.max(self.requested);
        let responded = self.responded.max(received);
        let received_at_client = self.received_at_client.max(responded);
        Self {
            requested: self.requested,
            received,
            responded,
            received_at_client,
        }
    }

    fn averages(window: &SampleWindow<Self>) -> Option<ServerAverages> {
        Some(ServerAverages {
            round_trip: mean(window.iter().map(Self::round_trip))?,
            request_leg: mean(window.iter().map(Self::request_leg))?,
            response_leg: mean(window.iter().map(Self::response_leg))?,
            remote_processing: mean(window.iter().map(Self::remote_processing))?,
        })
    }
}

/// One `misc:ping`/`misc:pong` round trip, epoch millis.
///
/// `recievedPong` keeps the established wire spelling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppSample {
    /// Hub sent the ping.
    #[serde(rename = "pingSent")]
    pub ping_sent: i64,
    /// Application sent the pong (its `sent` stamp).
    #[serde(rename = "appSentRespPong")]
    pub app_sent_resp_pong: i64,
    /// Hub received the pong.
    #[serde(rename = "recievedPong")]
    pub received_pong: i64,
}

impl AppSample {
    /// `received_pong - ping_sent`.
    pub fn round_trip(&self) -> i64 {
        self.received_pong.saturating_sub(self.ping_sent)
    }

    /// `app_sent_resp_pong - ping_sent`.
    pub fn request_plus_processing(&self) -> i64 {
        self.app_sent_resp_pong.saturating_sub(self.ping_sent)
    }

    /// `received_pong - app_sent_resp_pong`.
    pub fn response_leg(&self) -> i64 {
        self.received_pong.saturating_sub(self.app_sent_resp_pong)
    }
}

/// App chain means, in milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppAverages {
    /// Mean of [`AppSample::round_trip`].
    pub round_trip: f64,
    /// Mean of [`AppSample::request_plus_processing`].
    pub request_plus_processing: f64,
    /// Mean of [`AppSample::response_leg`].
    pub response_leg: f64,
}

impl Sample for AppSample {
    type Averages = AppAverages;

    fn clamped(self) -> Self {
        let app_sent_resp_pong = self.app_sent_resp_pong.max(self.ping_sent);
        let received_pong = self.received_pong.max(app_sent_resp_pong);
        Self {
            ping_sent: self.ping_sent,
            app_sent_resp_pong,
            received_pong,
        }
    }

    fn averages(window: &SampleWindow<Self>) -> Option<AppAverages> {
        Some(AppAverages {
            round_trip: mean(window.iter().map(Self::round_trip))?,
            request_plus_processing: mean(window.iter().map(Self::request_plus_processing))?,
            response_leg: mean(window.iter().map(Self::response_leg))?,
        })
    }
}

fn mean(values: impl ExactSizeIterator<Item = i64>) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    let sum: i128 = values.map(i128::from).sum();
    Some(sum as f64 / n as f64)
}
