use std::{error::Error, fmt, io};

use rustls::{AlertDescription, CertificateError, InvalidMessage};

use crate::{Op, OpError};

/// A predicate over errors that identifies one cause of backend connection failure.
///
/// Classifiers never panic and have no side effects.  Errors that do not have the exact shape a
/// classifier looks for, including absent errors, are never matched.
pub trait Classifier: Send + Sync {
    /// Returns `true` if `err` belongs to this classifier's category.
    fn classify(&self, err: &(dyn Error + 'static)) -> bool;

    /// Like [`classify`](Classifier::classify), but for an error that may be absent.
    fn classify_opt(&self, err: Option<&(dyn Error + 'static)>) -> bool {
        err.is_some_and(|err| self.classify(err))
    }
}

impl<C> Classifier for &C
where
    C: Classifier + ?Sized,
{
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        (**self).classify(err)
    }
}

impl<C> Classifier for Box<C>
where
    C: Classifier + ?Sized,
{
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        (**self).classify(err)
    }
}

/// A [`Classifier`] backed by a function or closure.
#[derive(Clone, Copy)]
pub struct ClassifierFn<F>(pub F);

impl<F> fmt::Debug for ClassifierFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierFn").finish_non_exhaustive()
    }
}

impl<F> Classifier for ClassifierFn<F>
where
    F: Fn(&(dyn Error + 'static)) -> bool + Send + Sync,
{
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        (self.0)(err)
    }
}

/// Finds a TLS error, either as the error itself or wrapped in an `io::Error`, which is how TLS
/// streams surface it.
fn tls_error<'a>(err: &'a (dyn Error + 'static)) -> Option<&'a rustls::Error> {
    if let Some(tls) = err.downcast_ref::<rustls::Error>() {
        return Some(tls);
    }

    err.downcast_ref::<io::Error>()
        .and_then(|io_err| io_err.get_ref())
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
}

fn op_error<'a>(err: &'a (dyn Error + 'static), op: Op) -> Option<&'a OpError> {
    err.downcast_ref::<OpError>().filter(|op_err| op_err.op() == op)
}

fn is_alert(err: &(dyn Error + 'static), alert: AlertDescription) -> bool {
    matches!(tls_error(err), Some(rustls::Error::AlertReceived(received)) if *received == alert)
}

/// Matches an alert the backend sent during the TLS handshake.
fn remote_alert(err: &(dyn Error + 'static), alert: AlertDescription, message: &str) -> bool {
    if let Some(op_err) = err.downcast_ref::<OpError>() {
        return op_err.op() == Op::RemoteError
            && (op_err.inner().to_string() == message || is_alert(op_err.inner(), alert));
    }

    is_alert(err, alert)
}

/// The backend did not speak TLS: the first bytes it sent back could not be parsed as a TLS
/// record header.
#[derive(Clone, Copy, Debug, Default)]
pub struct AttemptedTlsWithNonTlsBackend;

impl Classifier for AttemptedTlsWithNonTlsBackend {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        matches!(
            tls_error(err),
            Some(rustls::Error::InvalidMessage(
                InvalidMessage::InvalidContentType
                    | InvalidMessage::UnknownProtocolVersion
                    | InvalidMessage::MessageTooLarge
            ))
        )
    }
}

/// The connection to the backend could not be established.
#[derive(Clone, Copy, Debug, Default)]
pub struct Dial;

impl Classifier for Dial {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        op_error(err, Op::Dial).is_some()
    }
}

/// The backend reset the connection while the router was reading from it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionResetOnRead;

impl Classifier for ConnectionResetOnRead {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        op_error(err, Op::Read).is_some_and(|op_err| {
            let inner = op_err.inner();
            let is_reset = inner
                .downcast_ref::<io::Error>()
                .is_some_and(|io_err| io_err.kind() == io::ErrorKind::ConnectionReset);

            is_reset || inner.to_string() == "read: connection reset by peer"
        })
    }
}

/// The backend rejected the certificate the router presented.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoteFailedCertCheck;

impl Classifier for RemoteFailedCertCheck {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        remote_alert(err, AlertDescription::BadCertificate, "tls: bad certificate")
    }
}

/// The backend aborted the TLS handshake.
#[derive(Clone, Copy, Debug, Default)]
pub struct RemoteHandshakeFailure;

impl Classifier for RemoteHandshakeFailure {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        remote_alert(err, AlertDescription::HandshakeFailure, "tls: handshake failure")
    }
}

/// The backend's certificate is not valid for the name the router expected.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostnameMismatch;

impl Classifier for HostnameMismatch {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        matches!(
            tls_error(err),
            Some(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. }
            ))
        )
    }
}

/// The backend's certificate chain does not lead to a trusted authority.
#[derive(Clone, Copy, Debug, Default)]
pub struct UntrustedCert;

impl Classifier for UntrustedCert {
    fn classify(&self, err: &(dyn Error + 'static)) -> bool {
        matches!(
            tls_error(err),
            Some(rustls::Error::InvalidCertificate(CertificateError::UnknownIssuer))
        )
    }
}
