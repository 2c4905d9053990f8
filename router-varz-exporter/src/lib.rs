//! Serves the router's varz document over HTTP.
//!
//! The exporter runs a small HTTP/1 server that responds to two paths:
//! - the document path (`/varz` by default) returns the JSON varz document of a
//!   [`Varz`](router_varz::Varz)
//! - `/health` returns `OK`
//!
//! Every other path returns 404.  Access can be restricted with an IP allowlist, which applies to
//! every path, and with HTTP basic authentication, which applies to the document path.
//!
//! # Usage
//! ```no_run
//! use std::sync::Arc;
//! use router_varz::{StaticRegistry, VarzBuilder};
//! use router_varz_exporter::VarzExporterBuilder;
//!
//! let varz = Arc::new(VarzBuilder::new().build(StaticRegistry::new()).expect("valid settings"));
//!
//! VarzExporterBuilder::new()
//!     .with_http_listener(([127, 0, 0, 1], 8080))
//!     .with_basic_auth("router", "s3cret")
//!     .install(Arc::clone(&varz))
//!     .expect("failed to install varz exporter");
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod builder;
pub use self::builder::{VarzExporterBuilder, DEFAULT_LISTEN_ADDRESS, DEFAULT_PATH};

mod common;
pub use self::common::{BuildError, ExporterError, ExporterFuture};

mod http_listener;
