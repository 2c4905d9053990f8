use std::{num::NonZeroUsize, time::Duration};

use quanta::Clock;
use thiserror::Error as ThisError;

use crate::{
    meter::DEFAULT_TICK_INTERVAL,
    metric::{DEFAULT_DECAY_ALPHA, DEFAULT_RESERVOIR_SIZE},
    quantile::parse_quantiles,
    BackendRegistry, MetricSettings, Quantile, Varz,
};

/// Default window over which the most active applications are ranked.
pub const DEFAULT_TOP_APPS_WINDOW: Duration = Duration::from_secs(60);

/// Default number of applications reported in the ranking.
pub const DEFAULT_TOP_APPS_LIMIT: usize = 10;

/// Default latency percentiles: the median, the 75th and the 99th.
pub const DEFAULT_PERCENTILES: [f64; 3] = [0.5, 0.75, 0.99];

/// Errors that could occur while building a [`Varz`].
#[derive(Debug, ThisError, PartialEq)]
pub enum BuildError {
    /// No latency percentiles were configured.
    #[error("at least one latency percentile must be configured")]
    EmptyPercentiles,

    /// A latency percentile was not a finite number.
    #[error("latency percentiles must be finite, got {0}")]
    InvalidPercentile(f64),

    /// The latency reservoir would hold no samples.
    #[error("reservoir size must be greater than zero")]
    InvalidReservoirSize,

    /// The decay factor was not a finite, positive number.
    #[error("decay alpha must be finite and greater than zero, got {0}")]
    InvalidDecayAlpha(f64),

    /// The meter tick interval was zero.
    #[error("meter tick interval must be greater than zero")]
    InvalidTickInterval,

    /// The top-apps window was shorter than one second.
    #[error("top apps window must be at least one second, got {0:?}")]
    InvalidTopAppsWindow(Duration),
}

#[derive(Clone, Debug)]
pub(crate) struct VarzConfig {
    pub(crate) metric: MetricSettings,
    pub(crate) quantiles: Vec<Quantile>,
    pub(crate) top_apps_window: Duration,
    pub(crate) top_apps_limit: usize,
    pub(crate) max_tags_per_dimension: Option<NonZeroUsize>,
}

impl Default for VarzConfig {
    fn default() -> Self {
        VarzConfig {
            metric: MetricSettings::default(),
            quantiles: parse_quantiles(&DEFAULT_PERCENTILES),
            top_apps_window: DEFAULT_TOP_APPS_WINDOW,
            top_apps_limit: DEFAULT_TOP_APPS_LIMIT,
            max_tags_per_dimension: None,
        }
    }
}

/// Builder for creating and configuring a [`Varz`].
#[derive(Clone, Debug)]
pub struct VarzBuilder {
    reservoir_size: usize,
    decay_alpha: f64,
    tick_interval: Duration,
    top_apps_window: Duration,
    top_apps_limit: usize,
    max_tags_per_dimension: Option<NonZeroUsize>,
    percentiles: Vec<f64>,
}

impl VarzBuilder {
    /// Creates a new [`VarzBuilder`] with the default settings.
    pub fn new() -> Self {
        VarzBuilder {
            reservoir_size: DEFAULT_RESERVOIR_SIZE,
            decay_alpha: DEFAULT_DECAY_ALPHA,
            tick_interval: DEFAULT_TICK_INTERVAL,
            top_apps_window: DEFAULT_TOP_APPS_WINDOW,
            top_apps_limit: DEFAULT_TOP_APPS_LIMIT,
            max_tags_per_dimension: None,
            percentiles: DEFAULT_PERCENTILES.to_vec(),
        }
    }

    /// Sets the number of latency samples each metric keeps.
    ///
    /// Defaults to 1028.
    #[must_use]
    pub fn reservoir_size(mut self, size: usize) -> Self {
        self.reservoir_size = size;
        self
    }

    /// Sets the decay factor of the latency reservoir.  Larger values bias the sample more
    /// strongly towards recent latencies.
    ///
    /// Defaults to 0.015.
    #[must_use]
    pub fn decay_alpha(mut self, alpha: f64) -> Self {
        self.decay_alpha = alpha;
        self
    }

    /// Sets the interval at which rate meters advance their moving averages.
    ///
    /// Defaults to five seconds.
    #[must_use]
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Sets the window over which the most active applications are ranked.
    ///
    /// The same window converts each application's request count into a per-second rate.
    /// Defaults to sixty seconds.
    #[must_use]
    pub fn top_apps_window(mut self, window: Duration) -> Self {
        self.top_apps_window = window;
        self
    }

    /// Sets the maximum number of applications reported in the ranking.
    ///
    /// Defaults to 10.
    #[must_use]
    pub fn top_apps_limit(mut self, limit: usize) -> Self {
        self.top_apps_limit = limit;
        self
    }

    /// Caps the number of distinct tag values tracked per dimension.
    ///
    /// Values first seen once a dimension is full are aggregated under
    /// [`OVERFLOW_TAG`](crate::OVERFLOW_TAG).  Unbounded by default.
    #[must_use]
    pub fn max_tags_per_dimension(mut self, max: usize) -> Self {
        self.max_tags_per_dimension = NonZeroUsize::new(max);
        self
    }

    /// Sets the latency percentiles reported for every metric.
    ///
    /// Values are clamped to `[0.0, 1.0]`.  Defaults to `[0.5, 0.75, 0.99]`.
    #[must_use]
    pub fn set_percentiles(mut self, percentiles: &[f64]) -> Self {
        self.percentiles = percentiles.to_vec();
        self
    }

    /// Builds the [`Varz`] using the system clock.
    ///
    /// # Errors
    ///
    /// If any of the configured settings are invalid, an error variant will be returned
    /// describing the error.
    pub fn build<R>(self, registry: R) -> Result<Varz<R>, BuildError>
    where
        R: BackendRegistry,
    {
        self.build_with_clock(registry, Clock::new())
    }

    /// Builds the [`Varz`] using the given clock.
    ///
    /// # Errors
    ///
    /// If any of the configured settings are invalid, an error variant will be returned
    /// describing the error.
    pub fn build_with_clock<R>(self, registry: R, clock: Clock) -> Result<Varz<R>, BuildError>
    where
        R: BackendRegistry,
    {
        let config = self.into_config(clock)?;
        Ok(Varz::from_config(registry, config))
    }

    fn into_config(self, clock: Clock) -> Result<VarzConfig, BuildError> {
        if self.percentiles.is_empty() {
            return Err(BuildError::EmptyPercentiles);
        }
        if let Some(&invalid) = self.percentiles.iter().find(|p| !p.is_finite()) {
            return Err(BuildError::InvalidPercentile(invalid));
        }
        let reservoir_size =
            NonZeroUsize::new(self.reservoir_size).ok_or(BuildError::InvalidReservoirSize)?;
        if !self.decay_alpha.is_finite() || self.decay_alpha <= 0.0 {
            return Err(BuildError::InvalidDecayAlpha(self.decay_alpha));
        }
        if self.tick_interval.is_zero() {
            return Err(BuildError::InvalidTickInterval);
        }
        if self.top_apps_window < Duration::from_secs(1) {
            return Err(BuildError::InvalidTopAppsWindow(self.top_apps_window));
        }

        Ok(VarzConfig {
            metric: MetricSettings {
                reservoir_size,
                decay_alpha: self.decay_alpha,
                tick_interval: self.tick_interval,
                clock,
            },
            quantiles: parse_quantiles(&self.percentiles),
            top_apps_window: self.top_apps_window,
            top_apps_limit: self.top_apps_limit,
            max_tags_per_dimension: self.max_tags_per_dimension,
        })
    }
}

impl Default for VarzBuilder {
    fn default() -> Self {
        VarzBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quanta::Clock;

    use super::{BuildError, VarzBuilder};
    use crate::{StaticRegistry, TopAppsEntry, OVERFLOW_TAG};

    fn build(builder: VarzBuilder) -> Result<(), BuildError> {
        let (clock, _mock) = Clock::mock();
        builder.build_with_clock(StaticRegistry::new(), clock).map(|_| ())
    }

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(build(VarzBuilder::default()), Ok(()));
    }

    #[test]
    fn test_invalid_settings() {
        assert_eq!(
            build(VarzBuilder::new().set_percentiles(&[])),
            Err(BuildError::EmptyPercentiles)
        );
        assert_eq!(
            build(VarzBuilder::new().set_percentiles(&[0.5, f64::INFINITY])),
            Err(BuildError::InvalidPercentile(f64::INFINITY))
        );
        assert!(matches!(
            build(VarzBuilder::new().set_percentiles(&[f64::NAN])),
            Err(BuildError::InvalidPercentile(p)) if p.is_nan()
        ));
        assert_eq!(
            build(VarzBuilder::new().reservoir_size(0)),
            Err(BuildError::InvalidReservoirSize)
        );
        assert_eq!(
            build(VarzBuilder::new().decay_alpha(-1.0)),
            Err(BuildError::InvalidDecayAlpha(-1.0))
        );
        assert!(matches!(
            build(VarzBuilder::new().decay_alpha(f64::NAN)),
            Err(BuildError::InvalidDecayAlpha(_))
        ));
        assert_eq!(
            build(VarzBuilder::new().tick_interval(Duration::ZERO)),
            Err(BuildError::InvalidTickInterval)
        );
        assert_eq!(
            build(VarzBuilder::new().top_apps_window(Duration::from_millis(500))),
            Err(BuildError::InvalidTopAppsWindow(Duration::from_millis(500)))
        );
    }

    #[test]
    fn test_custom_percentiles() {
        let (clock, _mock) = Clock::mock();
        let varz = VarzBuilder::new()
            .set_percentiles(&[0.9, 0.999])
            .build_with_clock(StaticRegistry::new(), clock)
            .expect("valid settings");

        varz.capture_backend_response(&[("runtime", "go")], Some(200), Duration::from_nanos(7));
        let snapshot = varz.snapshot();
        let labels: Vec<_> = snapshot.all.latency.keys().cloned().collect();
        assert_eq!(labels, vec!["90".to_string(), "999".to_string()]);
    }

    #[test]
    fn test_top_apps_settings() {
        let (clock, _mock) = Clock::mock();
        let registry = Arc::new(StaticRegistry::new());
        registry.set_top_apps((1..=5).map(|i| TopAppsEntry::new(format!("app-{i}"), i * 100)).collect());

        let varz = VarzBuilder::new()
            .top_apps_window(Duration::from_secs(100))
            .top_apps_limit(2)
            .build_with_clock(Arc::clone(&registry), clock)
            .expect("valid settings");

        let top = varz.snapshot().top_apps;
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].application_id, "app-5");
        assert_eq!(top[0].requests_per_second, 5);
        assert_eq!(top[0].requests_per_minute, 500);
    }

    #[test]
    fn test_max_tags_per_dimension() {
        let (clock, _mock) = Clock::mock();
        let varz = VarzBuilder::new()
            .max_tags_per_dimension(1)
            .build_with_clock(StaticRegistry::new(), clock)
            .expect("valid settings");

        varz.capture_backend_request(&[("component", "a")]);
        varz.capture_backend_request(&[("component", "b")]);

        let component = varz.snapshot().tags.component;
        assert_eq!(component.len(), 2);
        assert_eq!(component["a"].requests, 1);
        assert_eq!(component[OVERFLOW_TAG].requests, 1);
    }
}
