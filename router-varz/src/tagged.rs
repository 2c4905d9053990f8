use std::{collections::BTreeMap, num::NonZeroUsize, sync::Arc, time::Duration};

use hashbrown::HashMap;
use parking_lot::RwLock;
use portable_atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use crate::{HttpMetric, MetricSettings, MetricSnapshot, Quantile};

/// The tag value that absorbs new tag values once a capped dimension is full.
pub const OVERFLOW_TAG: &str = "_other";

/// [`HttpMetric`]s keyed by the value of one tag dimension.
///
/// Metrics are created the first time a tag value is seen and are never removed.  Creation is
/// idempotent: concurrent first accesses for the same value all observe the same metric.
///
/// Tag values are expected to come from operator-controlled labels, so by default the number of
/// values is unbounded.  When a capacity is configured, any value first seen after the
/// dimension is full is folded into the [`OVERFLOW_TAG`] metric instead.
pub struct TaggedHttpMetric {
    name: &'static str,
    metrics: RwLock<HashMap<String, Arc<HttpMetric>>>,
    settings: MetricSettings,
    capacity: Option<NonZeroUsize>,
    overflowed: AtomicBool,
}

impl TaggedHttpMetric {
    /// Creates an empty, unbounded `TaggedHttpMetric` for the named dimension.
    pub fn new(name: &'static str, settings: MetricSettings) -> Self {
        Self::with_capacity(name, settings, None)
    }

    /// Creates an empty `TaggedHttpMetric` holding at most `capacity` distinct tag values.
    pub fn with_capacity(
        name: &'static str,
        settings: MetricSettings,
        capacity: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            name,
            metrics: RwLock::new(HashMap::new()),
            settings,
            capacity,
            overflowed: AtomicBool::new(false),
        }
    }

    /// Gets the name of the dimension.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Gets the metric for the given tag value, creating it if it does not yet exist.
    pub fn get(&self, tag: &str) -> Arc<HttpMetric> {
        // Try and get the metric if it exists.
        let metrics = self.metrics.read();
        if let Some(metric) = metrics.get(tag) {
            return Arc::clone(metric);
        }
        drop(metrics);

        // Switch to the write guard and insert the metric first.
        let mut metrics = self.metrics.write();
        if let Some(metric) = metrics.get(tag) {
            return Arc::clone(metric);
        }

        let tag = match self.capacity {
            Some(capacity) if metrics.len() >= capacity.get() => {
                if !self.overflowed.swap(true, Ordering::Relaxed) {
                    warn!(
                        dimension = self.name,
                        capacity = capacity.get(),
                        "tag dimension is full; folding new tag values into {}",
                        OVERFLOW_TAG
                    );
                }
                OVERFLOW_TAG
            }
            _ => tag,
        };

        let metric = metrics
            .entry(tag.to_owned())
            .or_insert_with(|| {
                debug!(dimension = self.name, tag, "tracking new tag value");
                Arc::new(HttpMetric::new(&self.settings))
            });

        Arc::clone(metric)
    }

    /// Records an incoming request for the given tag value.
    pub fn capture_request(&self, tag: &str) {
        self.get(tag).capture_request();
    }

    /// Records a completed response for the given tag value.
    pub fn capture_response(&self, tag: &str, status: Option<u16>, elapsed: Duration) {
        self.get(tag).capture_response(status, elapsed);
    }

    /// Gets the number of distinct tag values tracked.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    /// Returns `true` if no tag value has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produces the document blocks for every tag value, ordered by tag value.
    pub fn snapshot(&self, quantiles: &[Quantile]) -> BTreeMap<String, MetricSnapshot> {
        let metrics = self.metrics.read();
        metrics.iter().map(|(tag, metric)| (tag.clone(), metric.snapshot(quantiles))).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use quanta::Clock;

    use super::{TaggedHttpMetric, OVERFLOW_TAG};
    use crate::{default_quantiles, MetricSettings};

    fn tagged() -> TaggedHttpMetric {
        let (clock, _mock) = Clock::mock();
        TaggedHttpMetric::new("component", MetricSettings::with_clock(clock))
    }

    #[test]
    fn test_get_returns_same_metric() {
        let tagged = tagged();
        assert!(tagged.is_empty());

        let first = tagged.get("cloud_controller");
        let second = tagged.get("cloud_controller");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tagged.len(), 1);

        let other = tagged.get("uaa");
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(tagged.len(), 2);
    }

    #[test]
    fn test_capture_delegates_to_tag() {
        let tagged = tagged();
        tagged.capture_request("dea");
        tagged.capture_request("dea");
        tagged.capture_response("dea", Some(500), Duration::from_millis(1));
        tagged.capture_request("router");

        let snapshot = tagged.snapshot(&default_quantiles());
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["dea"].requests, 2);
        assert_eq!(snapshot["dea"].responses_5xx, 1);
        assert_eq!(snapshot["router"].requests, 1);
        assert_eq!(snapshot["router"].responses_5xx, 0);
    }

    #[test]
    fn test_concurrent_first_access_creates_one_metric() {
        let tagged = Arc::new(tagged());
        let barrier = Arc::new(Barrier::new(16));

        let handles = (0..16)
            .map(|_| {
                let tagged = Arc::clone(&tagged);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let metric = tagged.get("ruby19");
                    metric.capture_request();
                    metric
                })
            })
            .collect::<Vec<_>>();

        let metrics = handles
            .into_iter()
            .map(|h| h.join().expect("capture thread panicked"))
            .collect::<Vec<_>>();

        assert_eq!(tagged.len(), 1);
        assert!(metrics.iter().all(|m| Arc::ptr_eq(m, &metrics[0])));
        assert_eq!(metrics[0].requests(), 16);
    }

    #[test]
    fn test_capacity_folds_new_values_into_overflow() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let (clock, _mock) = Clock::mock();
        let tagged = TaggedHttpMetric::with_capacity(
            "framework",
            MetricSettings::with_clock(clock),
            NonZeroUsize::new(2),
        );

        tagged.capture_request("rails");
        tagged.capture_request("sinatra");
        tagged.capture_request("node");
        tagged.capture_request("play");
        tagged.capture_request("rails");

        let snapshot = tagged.snapshot(&default_quantiles());
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot["rails"].requests, 2);
        assert_eq!(snapshot["sinatra"].requests, 1);
        assert_eq!(snapshot[OVERFLOW_TAG].requests, 2);
        assert!(!snapshot.contains_key("node"));
    }
}
