//! A forward-decaying sampling reservoir.

use std::{
    cell::UnsafeCell,
    cmp::Reverse,
    collections::BinaryHeap,
    num::NonZeroUsize,
    time::Duration,
};

use ordered_float::OrderedFloat;
use parking_lot::Mutex;
use quanta::{Clock, Instant};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use crate::Quantile;

/// How long the reservoir keeps a landmark before rescaling all priorities against a new one.
const RESCALE_THRESHOLD: Duration = Duration::from_secs(60 * 60);

thread_local! {
    static FAST_RNG: UnsafeCell<Xoshiro256StarStar> = {
        UnsafeCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()))
    };
}

/// Returns a uniformly distributed value in `(0.0, 1.0]`.
fn fastrand_unit() -> f64 {
    FAST_RNG.with(|rng| {
        // SAFETY: We know it's safe to take a mutable reference since we're getting a pointer to a thread-local value,
        // and the reference never outlives the closure executing on this thread.
        let rng = unsafe { &mut *rng.get() };
        1.0 - rng.random::<f64>()
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct WeightedSample {
    priority: OrderedFloat<f64>,
    value: u64,
}

struct State {
    // Min-heap on priority: the root is always the next sample to evict.
    samples: BinaryHeap<Reverse<WeightedSample>>,
    count: u64,
    landmark: Instant,
    next_rescale: Instant,
}

/// A reservoir that keeps a bounded, recency-biased sample of a stream.
///
/// `ExpDecaySample` implements forward-decaying priority sampling, as described by Cormode et
/// al. in ["Forward Decay: A Practical Time Decay Model for Streaming Systems"][forward_decay].
/// Every inserted value is assigned the priority `exp(alpha * age) / u`, where `age` is the time
/// elapsed since the reservoir's landmark and `u` is drawn uniformly from `(0, 1]`.  Once the
/// reservoir is full, a new value replaces the lowest-priority sample if its own priority is
/// higher, and is discarded otherwise.  Newer values carry exponentially larger weights, so older
/// samples become progressively more likely to be evicted.
///
/// To keep priorities finite, the landmark is moved forward once an hour and every stored
/// priority is rescaled by `exp(-alpha * shift)`.
///
/// With the defaults used by the router (1028 samples, `alpha` of 0.015), the sample is
/// representative of roughly the last five minutes.
///
/// [forward_decay]: http://dimacs.rutgers.edu/~graham/pubs/papers/fwddecay.pdf
pub struct ExpDecaySample {
    state: Mutex<State>,
    capacity: usize,
    alpha: f64,
    clock: Clock,
}

impl ExpDecaySample {
    /// Creates a new `ExpDecaySample` holding at most `capacity` samples, decaying with `alpha`.
    pub fn new(capacity: NonZeroUsize, alpha: f64, clock: Clock) -> Self {
        let now = clock.now();
        let capacity = capacity.get();

        Self {
            state: Mutex::new(State {
                samples: BinaryHeap::with_capacity(capacity),
                count: 0,
                landmark: now,
                next_rescale: now + RESCALE_THRESHOLD,
            }),
            capacity,
            alpha,
            clock,
        }
    }

    /// Returns the maximum number of samples this reservoir holds.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of samples currently held.
    pub fn len(&self) -> usize {
        self.state.lock().samples.len()
    }

    /// Returns `true` if no value has been held yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of values ever pushed into the reservoir.
    pub fn count(&self) -> u64 {
        self.state.lock().count
    }

    /// Pushes a value into the reservoir.
    pub fn update(&self, value: u64) {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if now >= state.next_rescale {
            self.rescale(&mut state, now);
        }

        state.count += 1;

        let age = now.saturating_duration_since(state.landmark).as_secs_f64();
        let priority = OrderedFloat((self.alpha * age).exp() / fastrand_unit());
        let sample = WeightedSample { priority, value };

        if state.samples.len() < self.capacity {
            state.samples.push(Reverse(sample));
            return;
        }

        if let Some(mut lowest) = state.samples.peek_mut() {
            if lowest.0.priority < priority {
                *lowest = Reverse(sample);
            }
        };
    }

    fn rescale(&self, state: &mut State, now: Instant) {
        let shift = now.saturating_duration_since(state.landmark).as_secs_f64();
        let factor = (-self.alpha * shift).exp();

        let rescaled: BinaryHeap<_> = state
            .samples
            .drain()
            .map(|Reverse(mut sample)| {
                sample.priority = OrderedFloat(sample.priority.0 * factor);
                Reverse(sample)
            })
            .collect();

        state.samples = rescaled;
        state.landmark = now;
        state.next_rescale = now + RESCALE_THRESHOLD;
    }

    /// Takes a sorted copy of the current samples.
    pub fn snapshot(&self) -> SampleSnapshot {
        let state = self.state.lock();
        let mut values = state.samples.iter().map(|Reverse(s)| s.value).collect::<Vec<_>>();
        let count = state.count;
        drop(state);

        values.sort_unstable();
        SampleSnapshot { values, count }
    }
}

/// A point-in-time, sorted copy of the values held by an [`ExpDecaySample`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSnapshot {
    values: Vec<u64>,
    count: u64,
}

impl SampleSnapshot {
    /// Creates a snapshot over the given values.
    pub fn from_values(mut values: Vec<u64>) -> Self {
        values.sort_unstable();
        let count = values.len() as u64;
        Self { values, count }
    }

    /// Gets the sorted values.
    pub fn values(&self) -> &[u64] {
        &self.values
    }

    /// Gets the number of values ever pushed into the originating reservoir.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Gets the smallest held value, or zero if empty.
    pub fn min(&self) -> u64 {
        self.values.first().copied().unwrap_or(0)
    }

    /// Gets the largest held value, or zero if empty.
    pub fn max(&self) -> u64 {
        self.values.last().copied().unwrap_or(0)
    }

    /// Gets the arithmetic mean of the held values, or zero if empty.
    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }

        let sum = self.values.iter().map(|v| *v as f64).sum::<f64>();
        sum / self.values.len() as f64
    }

    /// Estimates the value at the given quantile.
    ///
    /// The rank is `q * (n + 1)`, interpolating linearly between the two neighbouring values and
    /// clamping to the smallest and largest values at either end.  An empty snapshot yields zero.
    pub fn quantile(&self, q: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }

        let pos = q.max(0.0).min(1.0) * (n + 1) as f64;
        if pos.is_nan() || pos < 1.0 {
            self.values[0] as f64
        } else if pos >= n as f64 {
            self.values[n - 1] as f64
        } else {
            let idx = pos as usize;
            let lower = self.values[idx - 1] as f64;
            let upper = self.values[idx] as f64;
            lower + (pos - pos.floor()) * (upper - lower)
        }
    }

    /// Estimates the value at each of the given quantiles, in order.
    pub fn quantiles(&self, quantiles: &[Quantile]) -> Vec<f64> {
        quantiles.iter().map(|q| self.quantile(q.value())).collect()
    }
}
