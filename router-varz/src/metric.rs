use std::{collections::BTreeMap, num::NonZeroUsize, time::Duration};

use portable_atomic::{AtomicU64, Ordering};
use quanta::Clock;
use serde::Serialize;

use crate::{
    meter::{Meter, MeterSnapshot, DEFAULT_TICK_INTERVAL},
    sample::{ExpDecaySample, SampleSnapshot},
    Quantile,
};

/// Default number of latency samples held per metric.
pub const DEFAULT_RESERVOIR_SIZE: usize = 1028;

/// Default decay factor for the latency reservoir.
pub const DEFAULT_DECAY_ALPHA: f64 = 0.015;

/// Parameters shared by every [`HttpMetric`] created for one aggregator.
#[derive(Clone, Debug)]
pub struct MetricSettings {
    pub(crate) reservoir_size: NonZeroUsize,
    pub(crate) decay_alpha: f64,
    pub(crate) tick_interval: Duration,
    pub(crate) clock: Clock,
}

impl MetricSettings {
    /// Creates settings with the default reservoir size, decay factor and tick interval.
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            reservoir_size: NonZeroUsize::new(DEFAULT_RESERVOIR_SIZE)
                .unwrap_or(NonZeroUsize::MIN),
            decay_alpha: DEFAULT_DECAY_ALPHA,
            tick_interval: DEFAULT_TICK_INTERVAL,
            clock,
        }
    }
}

impl Default for MetricSettings {
    fn default() -> Self {
        Self::with_clock(Clock::new())
    }
}

/// The class of an upstream response, derived from the hundreds digit of its status code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum StatusClass {
    /// `2xx`
    Success,
    /// `3xx`
    Redirection,
    /// `4xx`
    ClientError,
    /// `5xx`
    ServerError,
    /// Anything else, including responses that never arrived.
    Other,
}

impl StatusClass {
    /// Classifies a status code.  An absent status is a failed or aborted response.
    pub fn from_status(status: Option<u16>) -> StatusClass {
        match status.map(|s| s / 100) {
            Some(2) => StatusClass::Success,
            Some(3) => StatusClass::Redirection,
            Some(4) => StatusClass::ClientError,
            Some(5) => StatusClass::ServerError,
            _ => StatusClass::Other,
        }
    }

    fn index(self) -> usize {
        match self {
            StatusClass::Success => 0,
            StatusClass::Redirection => 1,
            StatusClass::ClientError => 2,
            StatusClass::ServerError => 3,
            StatusClass::Other => 4,
        }
    }
}

/// Request and response metrics for one slice of traffic.
///
/// Counts requests, measures their rate, buckets responses by status class and keeps a decaying
/// sample of response latencies.  All capture operations may be called concurrently.
pub struct HttpMetric {
    requests: AtomicU64,
    rate: Meter,
    responses: [AtomicU64; 5],
    latency: ExpDecaySample,
}

impl HttpMetric {
    /// Creates an empty `HttpMetric`.
    pub fn new(settings: &MetricSettings) -> HttpMetric {
        HttpMetric {
            requests: AtomicU64::new(0),
            rate: Meter::new(settings.tick_interval, settings.clock.clone()),
            responses: Default::default(),
            latency: ExpDecaySample::new(
                settings.reservoir_size,
                settings.decay_alpha,
                settings.clock.clone(),
            ),
        }
    }

    /// Records an incoming request.
    pub fn capture_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.rate.mark(1);
    }

    /// Records a completed response.
    ///
    /// `status` is `None` when no response was received from the backend.  `elapsed` is stored
    /// with nanosecond resolution.
    pub fn capture_response(&self, status: Option<u16>, elapsed: Duration) {
        let class = StatusClass::from_status(status);
        self.responses[class.index()].fetch_add(1, Ordering::Relaxed);

        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.latency.update(nanos);
    }

    /// Gets the number of requests captured.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Gets the number of responses captured for the given status class.
    pub fn responses(&self, class: StatusClass) -> u64 {
        self.responses[class.index()].load(Ordering::Relaxed)
    }

    /// Reads the request rate meter.
    pub fn rate(&self) -> MeterSnapshot {
        self.rate.snapshot()
    }

    /// Gets the one-minute request rate, in requests per second.
    pub fn rate1(&self) -> f64 {
        self.rate.rate1()
    }

    /// Takes a sorted copy of the latency reservoir, in nanoseconds.
    pub fn latency(&self) -> SampleSnapshot {
        self.latency.snapshot()
    }

    /// Produces the document block for this metric.
    pub fn snapshot(&self, quantiles: &[Quantile]) -> MetricSnapshot {
        let rate = self.rate.snapshot();
        let latency = self.latency.snapshot();
        let latency = quantiles
            .iter()
            .map(|q| (q.label().to_owned(), latency.quantile(q.value())))
            .collect();

        MetricSnapshot {
            requests: self.requests(),
            rate: [rate.rate1, rate.rate5, rate.rate15],
            responses_2xx: self.responses(StatusClass::Success),
            responses_3xx: self.responses(StatusClass::Redirection),
            responses_4xx: self.responses(StatusClass::ClientError),
            responses_5xx: self.responses(StatusClass::ServerError),
            responses_xxx: self.responses(StatusClass::Other),
            latency,
        }
    }
}

impl Default for HttpMetric {
    fn default() -> Self {
        HttpMetric::new(&MetricSettings::default())
    }
}

/// A frozen read of an [`HttpMetric`], as it appears in the varz document.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// Total requests captured.
    pub requests: u64,
    /// One, five and fifteen minute request rates, in requests per second.
    pub rate: [f64; 3],
    /// Responses with a `2xx` status.
    pub responses_2xx: u64,
    /// Responses with a `3xx` status.
    pub responses_3xx: u64,
    /// Responses with a `4xx` status.
    pub responses_4xx: u64,
    /// Responses with a `5xx` status.
    pub responses_5xx: u64,
    /// Responses with any other status, or with no status at all.
    pub responses_xxx: u64,
    /// Latency percentiles in nanoseconds, keyed by percentile label.
    pub latency: BTreeMap<String, f64>,
}
