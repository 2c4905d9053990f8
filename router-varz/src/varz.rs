use std::{
    collections::{BTreeMap, HashMap},
    hash::BuildHasher,
    time::Duration,
};

use parking_lot::Mutex;
use serde::{Serialize, Serializer};

use crate::{
    builder::VarzConfig, BackendRegistry, HttpMetric, MetricSnapshot, Quantile, TaggedHttpMetric,
    TopAppsEntry,
};

/// A dimension along which backend traffic is segmented.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TagDimension {
    /// The router component the backend belongs to.
    Component,
    /// The application framework the backend runs.
    Framework,
    /// The language runtime the backend runs on.
    Runtime,
}

impl TagDimension {
    /// All dimensions, in document order.
    pub const ALL: [TagDimension; 3] =
        [TagDimension::Component, TagDimension::Framework, TagDimension::Runtime];

    /// Gets the backend tag name for this dimension.
    pub fn tag_name(self) -> &'static str {
        match self {
            TagDimension::Component => "component",
            TagDimension::Framework => "framework",
            TagDimension::Runtime => "runtime",
        }
    }
}

/// Tags attached to a backend.
pub trait BackendTags {
    /// Gets the value of the named tag, if the backend carries it.
    fn tag(&self, name: &str) -> Option<&str>;
}

impl<S: BuildHasher> BackendTags for HashMap<String, String, S> {
    fn tag(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl<S: BuildHasher> BackendTags for hashbrown::HashMap<String, String, S> {
    fn tag(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl BackendTags for BTreeMap<String, String> {
    fn tag(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl BackendTags for [(&str, &str)] {
    fn tag(&self, name: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| *v)
    }
}

impl<const N: usize> BackendTags for [(&str, &str); N] {
    fn tag(&self, name: &str) -> Option<&str> {
        self.as_slice().tag(name)
    }
}

/// One entry of the most-active-applications ranking in the varz document.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TopAppsRate {
    /// The application identifier.
    pub application_id: String,
    /// Approximate requests per second over the window.
    #[serde(rename = "rps")]
    pub requests_per_second: u64,
    /// Requests counted during the window.
    #[serde(rename = "rpm")]
    pub requests_per_minute: u64,
}

impl TopAppsRate {
    /// Converts a windowed request count into per-second and per-window rates.
    pub fn from_entry(entry: TopAppsEntry, window: Duration) -> TopAppsRate {
        let seconds = window.as_secs().max(1);
        TopAppsRate {
            application_id: entry.application_id,
            requests_per_second: entry.requests / seconds,
            requests_per_minute: entry.requests,
        }
    }
}

/// Per-tag metric blocks for each dimension.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TagsSnapshot {
    /// Metrics keyed by component.
    pub component: BTreeMap<String, MetricSnapshot>,
    /// Metrics keyed by framework.
    pub framework: BTreeMap<String, MetricSnapshot>,
    /// Metrics keyed by runtime.
    pub runtime: BTreeMap<String, MetricSnapshot>,
}

/// A consistent, point-in-time read of a [`Varz`]: the varz document.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct VarzSnapshot {
    /// Metrics across every backend.
    pub all: MetricSnapshot,
    /// Metrics segmented by backend tag.
    pub tags: TagsSnapshot,
    /// Number of registered routes.
    pub urls: usize,
    /// Number of registered backends.
    pub droplets: usize,
    /// Number of malformed or unroutable requests.
    pub bad_requests: u64,
    /// One-minute request rate across every backend.
    pub requests_per_sec: f64,
    /// The most active applications, busiest first.
    #[serde(rename = "top10_app_requests")]
    pub top_apps: Vec<TopAppsRate>,
}

struct State {
    all: HttpMetric,
    component: TaggedHttpMetric,
    framework: TaggedHttpMetric,
    runtime: TaggedHttpMetric,
    bad_requests: u64,
}

impl State {
    fn dimension(&self, dimension: TagDimension) -> &TaggedHttpMetric {
        match dimension {
            TagDimension::Component => &self.component,
            TagDimension::Framework => &self.framework,
            TagDimension::Runtime => &self.runtime,
        }
    }
}

/// Live request/response statistics for the router.
///
/// `Varz` aggregates backend traffic into one untagged metric and three tagged dimensions, and
/// produces the varz document on demand.  Capture operations and snapshots share one lock, so a
/// snapshot never interleaves with a capture: the counters, and the fields derived from the
/// backend registry, all describe the same instant.
pub struct Varz<R> {
    state: Mutex<State>,
    registry: R,
    quantiles: Vec<Quantile>,
    top_apps_window: Duration,
    top_apps_limit: usize,
}

impl<R> Varz<R>
where
    R: BackendRegistry,
{
    /// Creates a new `Varz` with default settings.
    pub fn new(registry: R) -> Varz<R> {
        Varz::from_config(registry, VarzConfig::default())
    }

    pub(crate) fn from_config(registry: R, config: VarzConfig) -> Varz<R> {
        let tagged = |dimension: TagDimension| {
            TaggedHttpMetric::with_capacity(
                dimension.tag_name(),
                config.metric.clone(),
                config.max_tags_per_dimension,
            )
        };

        let state = State {
            all: HttpMetric::new(&config.metric),
            component: tagged(TagDimension::Component),
            framework: tagged(TagDimension::Framework),
            runtime: tagged(TagDimension::Runtime),
            bad_requests: 0,
        };

        Varz {
            state: Mutex::new(state),
            registry,
            quantiles: config.quantiles,
            top_apps_window: config.top_apps_window,
            top_apps_limit: config.top_apps_limit,
        }
    }

    /// Gets the backend registry.
    pub fn registry(&self) -> &R {
        &self.registry
    }

    /// Records a malformed or unroutable request.
    pub fn capture_bad_request(&self) {
        self.state.lock().bad_requests += 1;
    }

    /// Records a request dispatched to a backend.
    ///
    /// The request is counted once in the untagged metric, and once in each dimension for which
    /// the backend carries a tag.
    pub fn capture_backend_request<T>(&self, tags: &T)
    where
        T: BackendTags + ?Sized,
    {
        let state = self.state.lock();
        for dimension in TagDimension::ALL {
            if let Some(tag) = tags.tag(dimension.tag_name()) {
                state.dimension(dimension).capture_request(tag);
            }
        }

        state.all.capture_request();
    }

    /// Records the response, or the failure to get one, for a request dispatched to a backend.
    pub fn capture_backend_response<T>(&self, tags: &T, status: Option<u16>, elapsed: Duration)
    where
        T: BackendTags + ?Sized,
    {
        let state = self.state.lock();
        for dimension in TagDimension::ALL {
            if let Some(tag) = tags.tag(dimension.tag_name()) {
                state.dimension(dimension).capture_response(tag, status, elapsed);
            }
        }

        state.all.capture_response(status, elapsed);
    }

    /// Produces the varz document.
    pub fn snapshot(&self) -> VarzSnapshot {
        let state = self.state.lock();

        let all = state.all.snapshot(&self.quantiles);
        let requests_per_sec = all.rate[0];
        let urls = self.registry.num_uris();
        let droplets = self.registry.num_backends();
        let top_apps = self
            .registry
            .top_apps(self.top_apps_window, self.top_apps_limit)
            .into_iter()
            .take(self.top_apps_limit)
            .map(|entry| TopAppsRate::from_entry(entry, self.top_apps_window))
            .collect();

        VarzSnapshot {
            all,
            tags: TagsSnapshot {
                component: state.component.snapshot(&self.quantiles),
                framework: state.framework.snapshot(&self.quantiles),
                runtime: state.runtime.snapshot(&self.quantiles),
            },
            urls,
            droplets,
            bad_requests: state.bad_requests,
            requests_per_sec,
            top_apps,
        }
    }

    /// Renders the varz document as JSON.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }
}

impl<R> Serialize for Varz<R>
where
    R: BackendRegistry,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.snapshot().serialize(serializer)
    }
}
