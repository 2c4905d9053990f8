//! Classifies failed backend connections by cause.
//!
//! Each classifier is a [`Classifier`]: a side-effect free predicate that recognizes one exact
//! error shape, such as a failed dial or a TLS alert sent by the backend.  Classifiers can be
//! invoked on their own, or probed in order through a [`ClassifierGroup`] or
//! [`FailureCategory::of`], which yield [`FailureCategory::Unclassified`] when nothing matches.
//!
//! Network failures are expected as [`OpError`]s, which tag an underlying error with the
//! operation that was in flight.  TLS failures are recognized as [`rustls::Error`]s, either bare
//! or wrapped in a [`std::io::Error`].
//!
//! ```
//! use std::io;
//! use router_error_classifiers::{Classifier, Dial, FailureCategory, Op, OpError};
//!
//! let err = OpError::new(Op::Dial, io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
//! assert!(Dial.classify(&err));
//! assert_eq!(FailureCategory::of(Some(&err)), FailureCategory::Dial);
//! ```
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod classifier;
pub use self::classifier::{
    AttemptedTlsWithNonTlsBackend, Classifier, ClassifierFn, ConnectionResetOnRead, Dial,
    HostnameMismatch, RemoteFailedCertCheck, RemoteHandshakeFailure, UntrustedCert,
};

mod group;
pub use self::group::{ClassifierGroup, FailureCategory};

mod op_error;
pub use self::op_error::{Op, OpError};
