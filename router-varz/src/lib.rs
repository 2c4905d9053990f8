//! Live request/response statistics for an HTTP routing tier.
//!
//! A [`Varz`] aggregates the traffic a router sends to its backends into a single untagged
//! [`HttpMetric`], plus one [`TaggedHttpMetric`] for each backend tag dimension: `component`,
//! `framework` and `runtime`.  On demand, it produces the varz document: a JSON object describing
//! request counts, request rates, response status classes and latency percentiles, along with a
//! few fields derived from the backend registry.
//!
//! # Metrics
//! Every [`HttpMetric`] tracks:
//! - the number of requests seen
//! - one, five and fifteen minute exponentially-weighted request rates
//! - responses bucketed by status class: `2xx`, `3xx`, `4xx`, `5xx`, and everything else
//! - a forward-decaying reservoir of response latencies, biased towards the last five minutes
//!
//! # Consistency
//! Captures and snapshots are serialized behind a single lock, so a document never reflects half
//! of a capture.  Capture paths are short and allocation-free once a tag value has been seen.
//!
//! # Usage
//! ```
//! use std::time::Duration;
//! use router_varz::{StaticRegistry, VarzBuilder};
//!
//! let varz = VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings");
//!
//! let backend = [("component", "cloud_controller"), ("runtime", "ruby19")];
//! varz.capture_backend_request(&backend);
//! varz.capture_backend_response(&backend, Some(200), Duration::from_millis(12));
//!
//! let document = varz.render().expect("varz document serializes");
//! assert!(document.contains("cloud_controller"));
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{
    BuildError, VarzBuilder, DEFAULT_PERCENTILES, DEFAULT_TOP_APPS_LIMIT, DEFAULT_TOP_APPS_WINDOW,
};

mod meter;
pub use self::meter::{Meter, MeterSnapshot, DEFAULT_TICK_INTERVAL};

mod metric;
pub use self::metric::{
    HttpMetric, MetricSettings, MetricSnapshot, StatusClass, DEFAULT_DECAY_ALPHA,
    DEFAULT_RESERVOIR_SIZE,
};

mod quantile;
pub use self::quantile::{default_quantiles, parse_quantiles, Quantile};

mod registry;
pub use self::registry::{BackendRegistry, StaticRegistry, TopAppsEntry};

mod sample;
pub use self::sample::{ExpDecaySample, SampleSnapshot};

mod tagged;
pub use self::tagged::{TaggedHttpMetric, OVERFLOW_TAG};

mod varz;
pub use self::varz::{BackendTags, TagDimension, TagsSnapshot, TopAppsRate, Varz, VarzSnapshot};
