//! Exponentially-weighted rate meters.
use std::time::Duration;

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use quanta::{Clock, Instant};

/// The interval at which meters fold their uncounted events into their moving averages.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// An exponentially-weighted moving average of an event rate.
///
/// The average is advanced in fixed ticks: on every tick, the number of events seen during the
/// tick is converted into an instantaneous per-second rate, and folded into the average with a
/// weight of `alpha`.  The very first tick seeds the average directly.
#[derive(Clone, Debug)]
struct Ewma {
    alpha: f64,
    rate: f64,
    initialized: bool,
}

impl Ewma {
    /// Creates an average spanning `window`, ticked every `tick`.
    fn new(window: Duration, tick: Duration) -> Ewma {
        let alpha = 1.0 - (-tick.as_secs_f64() / window.as_secs_f64()).exp();
        Ewma { alpha, rate: 0.0, initialized: false }
    }

    fn tick(&mut self, count: u64, tick: Duration) {
        let instant_rate = count as f64 / tick.as_secs_f64();
        if self.initialized {
            self.rate += self.alpha * (instant_rate - self.rate);
        } else {
            self.rate = instant_rate;
            self.initialized = true;
        }
    }
}

#[derive(Clone, Debug)]
struct Rates {
    m1: Ewma,
    m5: Ewma,
    m15: Ewma,
}

impl Rates {
    fn tick(&mut self, count: u64, tick: Duration) {
        self.m1.tick(count, tick);
        self.m5.tick(count, tick);
        self.m15.tick(count, tick);
    }
}

/// A point-in-time read of a [`Meter`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    /// Total number of events marked.
    pub count: u64,
    /// One-minute moving average, in events per second.
    pub rate1: f64,
    /// Five-minute moving average, in events per second.
    pub rate5: f64,
    /// Fifteen-minute moving average, in events per second.
    pub rate15: f64,
    /// Average rate since the meter was created, in events per second.
    pub rate_mean: f64,
}

/// Measures the rate at which a set of events occur.
///
/// Marking an event only touches atomics.  The moving averages are advanced lazily: whichever
/// caller first observes that a tick interval has elapsed wins a compare-and-swap on the last tick
/// time, and folds all events accumulated since into the averages.  Readers advance the meter the
/// same way before reading, so rates decay even when no events are being marked.
pub struct Meter {
    count: AtomicU64,
    uncounted: AtomicU64,
    last_tick: AtomicU64,
    tick_interval: Duration,
    rates: Mutex<Rates>,
    start: Instant,
    clock: Clock,
}

impl Meter {
    /// Creates a new `Meter` with the given tick interval.
    ///
    /// A zero `tick_interval` is replaced by [`DEFAULT_TICK_INTERVAL`].
    pub fn new(tick_interval: Duration, clock: Clock) -> Meter {
        let tick_interval =
            if tick_interval.is_zero() { DEFAULT_TICK_INTERVAL } else { tick_interval };
        let minute = Duration::from_secs(60);

        Meter {
            count: AtomicU64::new(0),
            uncounted: AtomicU64::new(0),
            last_tick: AtomicU64::new(0),
            tick_interval,
            rates: Mutex::new(Rates {
                m1: Ewma::new(minute, tick_interval),
                m5: Ewma::new(minute * 5, tick_interval),
                m15: Ewma::new(minute * 15, tick_interval),
            }),
            start: clock.now(),
            clock,
        }
    }

    /// Marks the occurrence of `n` events.
    pub fn mark(&self, n: u64) {
        self.tick_if_necessary();
        self.count.fetch_add(n, Ordering::Relaxed);
        self.uncounted.fetch_add(n, Ordering::Relaxed);
    }

    /// Gets the total number of events marked.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Gets the one-minute moving average rate, in events per second.
    pub fn rate1(&self) -> f64 {
        self.tick_if_necessary();
        self.rates.lock().m1.rate
    }

    /// Takes a snapshot of the meter, advancing its averages first.
    pub fn snapshot(&self) -> MeterSnapshot {
        self.tick_if_necessary();
        let rates = self.rates.lock().clone();
        let count = self.count();

        let elapsed = self.elapsed().as_secs_f64();
        let rate_mean = if elapsed > 0.0 { count as f64 / elapsed } else { 0.0 };

        MeterSnapshot {
            count,
            rate1: rates.m1.rate,
            rate5: rates.m5.rate,
            rate15: rates.m15.rate,
            rate_mean,
        }
    }

    fn elapsed(&self) -> Duration {
        self.clock.now().saturating_duration_since(self.start)
    }

    fn tick_if_necessary(&self) {
        let interval = self.tick_interval.as_nanos() as u64;
        let old_tick = self.last_tick.load(Ordering::Acquire);
        let now = self.elapsed().as_nanos() as u64;
        let age = now.saturating_sub(old_tick);
        if age < interval {
            return;
        }

        let new_tick = now - age % interval;
        if self
            .last_tick
            .compare_exchange(old_tick, new_tick, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            // Another caller won the race and is advancing the averages.
            return;
        }

        let ticks = age / interval;
        let mut rates = self.rates.lock();
        let uncounted = self.uncounted.swap(0, Ordering::AcqRel);
        rates.tick(uncounted, self.tick_interval);
        for _ in 1..ticks {
            rates.tick(0, self.tick_interval);
        }
    }
}
