use std::{borrow::Cow, error::Error, fmt};

use crate::{
    AttemptedTlsWithNonTlsBackend, Classifier, ConnectionResetOnRead, Dial, HostnameMismatch,
    RemoteFailedCertCheck, RemoteHandshakeFailure, UntrustedCert,
};

/// The cause of a backend connection failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FailureCategory {
    /// The backend could not be reached.
    Dial,
    /// The backend reset the connection while the router was reading.
    ConnectionResetOnRead,
    /// The backend does not speak TLS.
    AttemptedTlsWithNonTlsBackend,
    /// The backend rejected the router's certificate.
    RemoteFailedCertCheck,
    /// The backend aborted the TLS handshake.
    RemoteHandshakeFailure,
    /// The backend's certificate does not match its expected name.
    HostnameMismatch,
    /// The backend's certificate was issued by an untrusted authority.
    UntrustedCert,
    /// None of the known causes matched.
    Unclassified,
}

impl FailureCategory {
    /// Every classifiable category, in the order they are probed.
    ///
    /// Categories are not mutually exclusive, so the first match wins.
    pub const PRECEDENCE: [FailureCategory; 7] = [
        FailureCategory::Dial,
        FailureCategory::ConnectionResetOnRead,
        FailureCategory::AttemptedTlsWithNonTlsBackend,
        FailureCategory::RemoteFailedCertCheck,
        FailureCategory::RemoteHandshakeFailure,
        FailureCategory::HostnameMismatch,
        FailureCategory::UntrustedCert,
    ];

    /// Gets the stable name of this category.
    pub fn name(self) -> &'static str {
        match self {
            FailureCategory::Dial => "dial",
            FailureCategory::ConnectionResetOnRead => "connection_reset_on_read",
            FailureCategory::AttemptedTlsWithNonTlsBackend => "attempted_tls_with_non_tls_backend",
            FailureCategory::RemoteFailedCertCheck => "remote_failed_cert_check",
            FailureCategory::RemoteHandshakeFailure => "remote_handshake_failure",
            FailureCategory::HostnameMismatch => "hostname_mismatch",
            FailureCategory::UntrustedCert => "untrusted_cert",
            FailureCategory::Unclassified => "unclassified",
        }
    }

    /// Gets the classifier that identifies this category.
    pub fn classifier(self) -> Option<&'static dyn Classifier> {
        match self {
            FailureCategory::Dial => Some(&Dial),
            FailureCategory::ConnectionResetOnRead => Some(&ConnectionResetOnRead),
            FailureCategory::AttemptedTlsWithNonTlsBackend => Some(&AttemptedTlsWithNonTlsBackend),
            FailureCategory::RemoteFailedCertCheck => Some(&RemoteFailedCertCheck),
            FailureCategory::RemoteHandshakeFailure => Some(&RemoteHandshakeFailure),
            FailureCategory::HostnameMismatch => Some(&HostnameMismatch),
            FailureCategory::UntrustedCert => Some(&UntrustedCert),
            FailureCategory::Unclassified => None,
        }
    }

    /// Finds the first category, in precedence order, that matches `err`.
    pub fn of(err: Option<&(dyn Error + 'static)>) -> FailureCategory {
        FailureCategory::PRECEDENCE
            .into_iter()
            .find(|category| category.classifier().is_some_and(|c| c.classify_opt(err)))
            .unwrap_or(FailureCategory::Unclassified)
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

struct Entry {
    name: Cow<'static, str>,
    classifier: Box<dyn Classifier>,
}

/// An ordered, named set of classifiers.
///
/// Classifiers are probed in the order they were added and the first match names the failure.
/// [`ClassifierGroup::default`] holds the built-in classifiers in [`FailureCategory::PRECEDENCE`]
/// order; callers can append their own.
pub struct ClassifierGroup {
    entries: Vec<Entry>,
}

impl ClassifierGroup {
    /// Creates an empty `ClassifierGroup`.
    pub fn new() -> ClassifierGroup {
        ClassifierGroup { entries: Vec::new() }
    }

    /// Appends a classifier, probed after every classifier already in the group.
    #[must_use]
    pub fn with<N, C>(mut self, name: N, classifier: C) -> ClassifierGroup
    where
        N: Into<Cow<'static, str>>,
        C: Classifier + 'static,
    {
        self.push(name, classifier);
        self
    }

    /// Appends a classifier, probed after every classifier already in the group.
    pub fn push<N, C>(&mut self, name: N, classifier: C)
    where
        N: Into<Cow<'static, str>>,
        C: Classifier + 'static,
    {
        self.entries.push(Entry { name: name.into(), classifier: Box::new(classifier) });
    }

    /// Gets the names of the classifiers in the group, in probe order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_ref())
    }

    /// Gets the number of classifiers in the group.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the group has no classifiers.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finds the name of the first classifier that matches `err`.
    ///
    /// Returns `None`, meaning the failure is unclassified, if nothing matches or `err` is absent.
    pub fn classify(&self, err: Option<&(dyn Error + 'static)>) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.classifier.classify_opt(err))
            .map(|entry| entry.name.as_ref())
    }

    /// Like [`classify`](ClassifierGroup::classify), but names unmatched errors
    /// [`FailureCategory::Unclassified`].
    pub fn classify_or_unclassified(&self, err: Option<&(dyn Error + 'static)>) -> &str {
        self.classify(err).unwrap_or(FailureCategory::Unclassified.name())
    }
}

impl Default for ClassifierGroup {
    fn default() -> ClassifierGroup {
        let mut group = ClassifierGroup::new();
        for category in FailureCategory::PRECEDENCE {
            if let Some(classifier) = category.classifier() {
                group.push(category.name(), classifier);
            }
        }
        group
    }
}

impl fmt::Debug for ClassifierGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierGroup").field("names", &self.names().collect::<Vec<_>>()).finish()
    }
}
